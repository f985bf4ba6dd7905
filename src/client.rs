use std::collections::{HashMap, VecDeque};

use tracing::{debug, info, warn};

use crate::auth::{AuthConfig, Resolver, Session};
use crate::config::{ClientConfig, GET_PARAMETERS_BATCH};
use crate::error::{Error, Result, StoreError};
use crate::ssm_parameters::{ParameterRecord, RemoteParameter};
use crate::store::{Connect, DescribeQuery, ParameterStore, PutRequest};

/// Typed access to the parameter store for one auth config.
///
/// Holds the resolved session; once it is past its expiry, or the store rejects its
/// credentials, the next call resolves a fresh one and reconnects instead of reusing stale
/// credentials.
pub struct ParameterClient<'r, C: Connect> {
    resolver: &'r Resolver,
    auth: AuthConfig,
    connector: C,
    session: Session,
    store: C::Store,
    config: ClientConfig,
}

impl<'r, C: Connect> ParameterClient<'r, C> {
    pub fn connect(resolver: &'r Resolver, auth: AuthConfig, connector: C, config: ClientConfig) -> Result<Self> {
        let session = resolver.resolve(&auth)?;
        let store = connector.connect(&session)?;
        Ok(ParameterClient { resolver, auth, connector, session, store, config })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn store(&mut self) -> Result<&C::Store> {
        if self.session.is_expired() {
            info!(method = %self.session.method(), "session expired, resolving credentials again");
            self.reconnect()?;
        }
        Ok(&self.store)
    }

    fn reconnect(&mut self) -> Result<()> {
        self.session = self.resolver.resolve(&self.auth)?;
        self.store = self.connector.connect(&self.session)?;
        Ok(())
    }

    /// Runs `op` under the retry policy. When the store rejects the session's credentials the
    /// cached session is dropped, a fresh one resolved and `op` tried once more.
    fn call<T, F>(&mut self, operation: &str, op: F) -> Result<T>
    where
        F: Fn(&C::Store) -> std::result::Result<T, StoreError>,
    {
        let retry = self.config.retry.clone();
        let result = {
            let store = self.store()?;
            retry.run(operation, || op(store))
        };
        match result {
            Err(ref err) if err.is_credentials_rejected() => {
                warn!(operation, method = %self.session.method(), "credentials rejected, resolving them again");
                self.resolver.invalidate(&self.auth);
                self.reconnect()?;
                let store = &self.store;
                Ok(retry.run(operation, || op(store))?)
            }
            other => Ok(other?),
        }
    }

    /// Cheap authenticated call to confirm credentials and permissions.
    pub fn verify(&mut self) -> Result<()> {
        let query = DescribeQuery { max_results: 1, ..Default::default() };
        self.call("describe", |store| store.describe_parameters(&query))?;
        Ok(())
    }

    pub fn get(&mut self, key: &str, decrypt: bool) -> Result<RemoteParameter> {
        self.call("get", |store| store.get_parameter(key, decrypt))
    }

    /// `get` plus the metadata only DescribeParameters reports (tier, KMS key, last modified).
    pub fn describe(&mut self, key: &str, decrypt: bool) -> Result<RemoteParameter> {
        let mut param = self.call("get", |store| store.get_parameter(key, decrypt))?;
        let query = DescribeQuery { name: Some(key.to_string()), max_results: 1, next_token: None };
        let page = self.call("describe", |store| store.describe_parameters(&query))?;
        if let Some(meta) = page.parameters.into_iter().find(|m| m.key == key) {
            param.tier = meta.tier;
            param.kms_key_id = meta.kms_key_id;
            param.last_modified = meta.last_modified.or(param.last_modified);
        }
        Ok(param)
    }

    pub fn put(&mut self, record: &ParameterRecord, overwrite: bool) -> Result<()> {
        record.validate().map_err(|message| StoreError::Validation { key: record.key.clone(), message })?;
        let request = PutRequest {
            key: record.key.clone(),
            value: record.wire_value(),
            kind: record.kind,
            tier: record.tier,
            kms_key_id: record.resolved_kms_key(&self.config.kms_key_alias),
            overwrite,
        };
        self.call("put", |store| store.put_parameter(&request))?;
        debug!(key = %record.key, kind = %record.kind, tier = %record.tier, overwrite, "put parameter");
        Ok(())
    }

    pub fn delete(&mut self, key: &str) -> Result<()> {
        self.call("delete", |store| store.delete_parameter(key))?;
        debug!(key, "deleted parameter");
        Ok(())
    }

    /// Every parameter in the store, fetched page by page as the iterator advances.
    /// Stops after the first error; a new call starts over from the first page.
    pub fn list_all(&mut self, decrypt: bool) -> ParameterIter<'_, 'r, C> {
        ParameterIter { client: self, decrypt, buffer: VecDeque::new(), next_token: None, done: false }
    }

    fn fetch_page(&mut self, next_token: Option<String>, decrypt: bool) -> Result<(Vec<RemoteParameter>, Option<String>)> {
        let query = DescribeQuery { name: None, max_results: self.config.page_size(), next_token };
        let page = self.call("describe", |store| store.describe_parameters(&query))?;

        let mut parameters = Vec::with_capacity(page.parameters.len());
        for chunk in page.parameters.chunks(GET_PARAMETERS_BATCH) {
            let names: Vec<String> = chunk.iter().map(|m| m.key.clone()).collect();
            let values: HashMap<String, RemoteParameter> = self
                .call("get-batch", |store| store.get_parameters(&names, decrypt))?
                .into_iter()
                .map(|p| (p.key.clone(), p))
                .collect();
            for meta in chunk {
                match values.get(&meta.key) {
                    Some(value) => parameters.push(RemoteParameter {
                        key: meta.key.clone(),
                        value: value.value.clone(),
                        kind: meta.kind,
                        version: value.version,
                        last_modified: meta.last_modified.or(value.last_modified),
                        tier: meta.tier,
                        kms_key_id: meta.kms_key_id.clone(),
                    }),
                    None => debug!(key = %meta.key, "parameter disappeared while listing"),
                }
            }
        }
        Ok((parameters, page.next_token))
    }
}

/// Lazy listing returned by [`ParameterClient::list_all`].
pub struct ParameterIter<'c, 'r, C: Connect> {
    client: &'c mut ParameterClient<'r, C>,
    decrypt: bool,
    buffer: VecDeque<RemoteParameter>,
    next_token: Option<String>,
    done: bool,
}

impl<'c, 'r, C: Connect> Iterator for ParameterIter<'c, 'r, C> {
    type Item = Result<RemoteParameter>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(param) = self.buffer.pop_front() {
                return Some(Ok(param));
            }
            if self.done {
                return None;
            }
            match self.client.fetch_page(self.next_token.take(), self.decrypt) {
                Ok((parameters, next_token)) => {
                    self.buffer.extend(parameters);
                    self.done = next_token.is_none();
                    self.next_token = next_token;
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// True when `err` is the store saying the key doesn't exist.
pub fn is_not_found(err: &Error) -> bool {
    match err {
        Error::Store(StoreError::NotFound { .. }) => true,
        _ => false,
    }
}
