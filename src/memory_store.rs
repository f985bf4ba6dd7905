//! In-process parameter store with the same observable rules as the remote one.
//! Used by the test suite and for offline dry runs of a sync.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use crate::auth::Session;
use crate::error::{Result, StoreError};
use crate::ssm_parameters::{ParameterType, RemoteParameter};
use crate::store::{Connect, DescribeQuery, ParameterMetadata, ParameterPage, ParameterStore, PutRequest};

/// Placeholder returned for SecureString values read without decryption.
pub const CIPHERTEXT_PLACEHOLDER: &str = "<encrypted>";

#[derive(Debug, Default)]
struct State {
    parameters: BTreeMap<String, RemoteParameter>,
    denied: HashSet<String>,
    kms_denied: HashSet<String>,
    rejected_keys: HashSet<String>,
    throttle_remaining: u32,
    writes: usize,
    reads: usize,
}

/// Cloning yields another handle onto the same parameters.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    access_key_id: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Every subsequent call touching `key` fails with `AccessDenied`.
    pub fn deny(&self, key: &str) {
        self.lock().denied.insert(key.to_string());
    }

    /// Decrypting reads of `key` fail with `KmsDecryptDenied`.
    pub fn deny_decrypt(&self, key: &str) {
        self.lock().kms_denied.insert(key.to_string());
    }

    /// Handles connected with this access key fail every call with `CredentialsRejected`,
    /// the way the store answers an expired or revoked key.
    pub fn reject_credentials(&self, access_key_id: &str) {
        self.lock().rejected_keys.insert(access_key_id.to_string());
    }

    /// Access key of the session this handle was connected with.
    pub fn access_key_id(&self) -> Option<&str> {
        self.access_key_id.as_deref()
    }

    /// The next `count` calls fail with `Throttled`.
    pub fn throttle_next(&self, count: u32) {
        self.lock().throttle_remaining = count;
    }

    /// Number of successful put/delete calls.
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    /// Number of get/describe calls that reached the store.
    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    pub fn len(&self) -> usize {
        self.lock().parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw stored value, bypassing every access rule.
    pub fn value_of(&self, key: &str) -> Option<String> {
        self.lock().parameters.get(key).map(|p| p.value.clone())
    }

    fn check(&self, state: &mut State, key: &str) -> std::result::Result<(), StoreError> {
        if let Some(access_key_id) = &self.access_key_id {
            if state.rejected_keys.contains(access_key_id) {
                return Err(StoreError::CredentialsRejected {
                    key: key.to_string(),
                    message: "The security token included in the request is expired".to_string(),
                });
            }
        }
        if state.throttle_remaining > 0 {
            state.throttle_remaining -= 1;
            return Err(StoreError::Throttled { key: key.to_string(), message: "Rate exceeded".to_string() });
        }
        if state.denied.contains(key) {
            return Err(StoreError::AccessDenied {
                key: key.to_string(),
                message: format!("not authorized to access {}", key),
            });
        }
        Ok(())
    }

    fn read(state: &State, param: &RemoteParameter, decrypt: bool) -> std::result::Result<RemoteParameter, StoreError> {
        let mut param = param.clone();
        if param.kind == ParameterType::SecureString {
            if !decrypt {
                param.value = CIPHERTEXT_PLACEHOLDER.to_string();
            } else if state.kms_denied.contains(&param.key) {
                return Err(StoreError::KmsDecryptDenied {
                    key: param.key,
                    message: "kms:Decrypt denied".to_string(),
                });
            }
        }
        Ok(param)
    }
}

impl ParameterStore for MemoryStore {
    fn get_parameter(&self, key: &str, decrypt: bool) -> std::result::Result<RemoteParameter, StoreError> {
        let mut state = self.lock();
        self.check(&mut state, key)?;
        state.reads += 1;
        let state = &*state;
        match state.parameters.get(key) {
            Some(param) => MemoryStore::read(state, param, decrypt),
            None => Err(StoreError::NotFound { key: key.to_string() }),
        }
    }

    fn get_parameters(&self, keys: &[String], decrypt: bool) -> std::result::Result<Vec<RemoteParameter>, StoreError> {
        let mut state = self.lock();
        for key in keys {
            self.check(&mut state, key)?;
        }
        state.reads += 1;
        let state = &*state;
        keys.iter()
            .filter_map(|key| state.parameters.get(key))
            .map(|param| MemoryStore::read(state, param, decrypt))
            .collect()
    }

    fn put_parameter(&self, request: &PutRequest) -> std::result::Result<(), StoreError> {
        let mut state = self.lock();
        self.check(&mut state, &request.key)?;
        if request.kms_key_id.is_some() && request.kind != ParameterType::SecureString {
            return Err(StoreError::Validation {
                key: request.key.clone(),
                message: "KeyId is only valid for SecureString parameters".to_string(),
            });
        }
        let version = match state.parameters.get(&request.key) {
            Some(_) if !request.overwrite => {
                return Err(StoreError::AlreadyExists { key: request.key.clone() });
            }
            Some(existing) => existing.version + 1,
            None => 1,
        };
        state.parameters.insert(
            request.key.clone(),
            RemoteParameter {
                key: request.key.clone(),
                value: request.value.clone(),
                kind: request.kind,
                version,
                last_modified: Some(Utc::now()),
                tier: Some(request.tier),
                kms_key_id: request.kms_key_id.clone(),
            },
        );
        state.writes += 1;
        Ok(())
    }

    fn delete_parameter(&self, key: &str) -> std::result::Result<(), StoreError> {
        let mut state = self.lock();
        self.check(&mut state, key)?;
        match state.parameters.remove(key) {
            Some(_) => {
                state.writes += 1;
                Ok(())
            }
            None => Err(StoreError::NotFound { key: key.to_string() }),
        }
    }

    fn describe_parameters(&self, query: &DescribeQuery) -> std::result::Result<ParameterPage, StoreError> {
        let mut state = self.lock();
        self.check(&mut state, query.name.as_ref().map(String::as_str).unwrap_or("/"))?;
        state.reads += 1;
        let start = match &query.next_token {
            Some(token) => token.parse::<usize>().map_err(|_| StoreError::Validation {
                key: "/".to_string(),
                message: format!("invalid next token '{}'", token),
            })?,
            None => 0,
        };
        let page_size = query.max_results.max(1) as usize;
        let matching: Vec<&RemoteParameter> = state
            .parameters
            .values()
            .filter(|p| query.name.as_ref().map_or(true, |name| &p.key == name))
            .collect();
        let parameters = matching
            .iter()
            .skip(start)
            .take(page_size)
            .map(|p| ParameterMetadata {
                key: p.key.clone(),
                kind: p.kind,
                tier: p.tier,
                kms_key_id: p.kms_key_id.clone(),
                version: p.version,
                last_modified: p.last_modified,
            })
            .collect();
        let next = start + page_size;
        Ok(ParameterPage {
            parameters,
            next_token: if next < matching.len() { Some(next.to_string()) } else { None },
        })
    }
}

impl Connect for MemoryStore {
    type Store = MemoryStore;

    fn connect(&self, session: &Session) -> Result<MemoryStore> {
        Ok(MemoryStore {
            state: Arc::clone(&self.state),
            access_key_id: Some(session.credentials().aws_access_key_id().to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssm_parameters::Tier;
    use crate::auth::AuthMethod;
    use rusoto_credential::AwsCredentials;

    fn put(store: &MemoryStore, key: &str, value: &str, overwrite: bool) -> std::result::Result<(), StoreError> {
        store.put_parameter(&PutRequest {
            key: key.to_string(),
            value: value.to_string(),
            kind: ParameterType::String,
            tier: Tier::Standard,
            kms_key_id: None,
            overwrite,
        })
    }

    #[test]
    fn put_without_overwrite_refuses_existing_keys() {
        let store = MemoryStore::new();
        put(&store, "/a", "1", false).unwrap();
        assert_eq!(put(&store, "/a", "2", false), Err(StoreError::AlreadyExists { key: "/a".into() }));
        put(&store, "/a", "2", true).unwrap();
        let param = store.get_parameter("/a", false).unwrap();
        assert_eq!(param.value, "2");
        assert_eq!(param.version, 2);
    }

    #[test]
    fn secure_strings_are_masked_unless_decrypted() {
        let store = MemoryStore::new();
        store
            .put_parameter(&PutRequest {
                key: "/s".into(),
                value: "hidden".into(),
                kind: ParameterType::SecureString,
                tier: Tier::Standard,
                kms_key_id: Some("alias/aws/ssm".into()),
                overwrite: false,
            })
            .unwrap();
        assert_eq!(store.get_parameter("/s", false).unwrap().value, CIPHERTEXT_PLACEHOLDER);
        assert_eq!(store.get_parameter("/s", true).unwrap().value, "hidden");
        store.deny_decrypt("/s");
        assert!(matches!(store.get_parameter("/s", true), Err(StoreError::KmsDecryptDenied { .. })));
    }

    #[test]
    fn describe_paginates_with_tokens() {
        let store = MemoryStore::new();
        for i in 0..5 {
            put(&store, &format!("/p/{}", i), "v", false).unwrap();
        }
        let first = store.describe_parameters(&DescribeQuery { max_results: 2, ..Default::default() }).unwrap();
        assert_eq!(first.parameters.len(), 2);
        let token = first.next_token.clone();
        assert!(token.is_some());
        let second = store
            .describe_parameters(&DescribeQuery { max_results: 2, next_token: token, ..Default::default() })
            .unwrap();
        assert_eq!(second.parameters[0].key, "/p/2");
        let last = store
            .describe_parameters(&DescribeQuery { max_results: 2, next_token: second.next_token, ..Default::default() })
            .unwrap();
        assert_eq!(last.parameters.len(), 1);
        assert!(last.next_token.is_none());
    }

    fn session(access_key_id: &str) -> Session {
        Session::from_credentials(AwsCredentials::new(access_key_id, "s", None, None), "us-east-1", AuthMethod::AccessKey)
    }

    #[test]
    fn rejected_credentials_fail_until_reconnected_with_other_keys() {
        let store = MemoryStore::new();
        put(&store, "/a", "1", false).unwrap();
        store.reject_credentials("AKIDOLD");

        let old = store.connect(&session("AKIDOLD")).unwrap();
        assert_eq!(old.access_key_id(), Some("AKIDOLD"));
        assert!(matches!(old.get_parameter("/a", false), Err(StoreError::CredentialsRejected { .. })));

        let new = store.connect(&session("AKIDNEW")).unwrap();
        assert_eq!(new.get_parameter("/a", false).unwrap().value, "1");
        // Unconnected handles carry no credentials and are never rejected.
        assert_eq!(store.get_parameter("/a", false).unwrap().value, "1");
    }

    #[test]
    fn delete_missing_is_not_found() {
        let store = MemoryStore::new();
        assert_eq!(store.delete_parameter("/nope"), Err(StoreError::NotFound { key: "/nope".into() }));
    }
}
