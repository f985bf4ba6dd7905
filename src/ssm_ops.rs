use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusoto_core::{HttpClient, Region, RusotoError};
use rusoto_credential::StaticProvider;
use rusoto_ssm::{
    DeleteParameterError, DeleteParameterRequest, DescribeParametersError, DescribeParametersRequest,
    GetParameterError, GetParameterRequest, GetParametersError, GetParametersRequest, Parameter,
    ParameterStringFilter, PutParameterError, PutParameterRequest, Ssm, SsmClient,
};
use tracing::debug;

use crate::auth::Session;
use crate::error::{AuthError, Result, StoreError};
use crate::ssm_parameters::{ParameterType, RemoteParameter, Tier};
use crate::store::{Connect, DescribeQuery, ParameterMetadata, ParameterPage, ParameterStore, PutRequest};

/// Parameter store client over rusoto_ssm, scoped to one session.
pub struct SSMOps {
    region: String,
    ssm_client: SsmClient,
    timeout: Duration,
}

impl fmt::Debug for SSMOps {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{ region: {}, timeout: {:?} }}", self.region, self.timeout)
    }
}

impl SSMOps {
    pub fn new(session: &Session, timeout: Duration) -> Result<Self> {
        let region = session.region().parse::<Region>().map_err(|e| AuthError::InvalidConfig {
            method: session.method(),
            reason: format!("unknown region '{}': {}", session.region(), e),
        })?;
        let dispatcher = HttpClient::new().map_err(|e| StoreError::Unavailable {
            key: "/".to_string(),
            message: format!("cannot build HTTP client: {}", e),
        })?;
        let creds = session.credentials();
        let provider = StaticProvider::new(
            creds.aws_access_key_id().to_string(),
            creds.aws_secret_access_key().to_string(),
            creds.token().clone(),
            None,
        );
        Ok(SSMOps {
            region: session.region().to_string(),
            ssm_client: SsmClient::new_with(dispatcher, provider, region),
            timeout,
        })
    }
}

/// Opens an [`SSMOps`] for each session handed to it.
#[derive(Debug, Clone)]
pub struct SSMConnector {
    pub timeout: Duration,
}

impl Connect for SSMConnector {
    type Store = SSMOps;

    fn connect(&self, session: &Session) -> Result<SSMOps> {
        debug!(region = session.region(), "connecting to SSM");
        SSMOps::new(session, self.timeout)
    }
}

fn timestamp(epoch_seconds: Option<f64>) -> Option<DateTime<Utc>> {
    let secs = epoch_seconds?;
    let whole = secs.trunc() as i64;
    let nanos = ((secs - secs.trunc()) * 1e9) as u32;
    Utc.timestamp_opt(whole, nanos).single()
}

fn parameter_type(raw: Option<&str>) -> ParameterType {
    raw.and_then(|t| t.parse().ok()).unwrap_or(ParameterType::String)
}

fn into_remote(p: Parameter) -> RemoteParameter {
    RemoteParameter {
        kind: parameter_type(p.type_.as_ref().map(String::as_str)),
        key: p.name.unwrap_or_default(),
        value: p.value.unwrap_or_default(),
        version: p.version.unwrap_or_default(),
        last_modified: timestamp(p.last_modified_date),
        tier: None,
        kms_key_id: None,
    }
}

/// Maps an error response rusoto could not decode into a store error.
pub fn classify_response(key: &str, status: u16, body: &str, decrypt: bool) -> StoreError {
    let key = key.to_string();
    let message = body.to_string();
    if status == 429 || body.contains("ThrottlingException") || body.contains("TooManyUpdates") {
        StoreError::Throttled { key, message }
    } else if body.contains("ParameterNotFound") {
        StoreError::NotFound { key }
    } else if body.contains("ParameterAlreadyExists") {
        StoreError::AlreadyExists { key }
    } else if body.contains("ExpiredToken") || body.contains("UnrecognizedClient") || body.contains("InvalidSignature") {
        StoreError::CredentialsRejected { key, message }
    } else if body.contains("AccessDenied") {
        if decrypt && (body.contains("KMS") || body.contains("kms:")) {
            StoreError::KmsDecryptDenied { key, message }
        } else {
            StoreError::AccessDenied { key, message }
        }
    } else if status == 403 {
        StoreError::AccessDenied { key, message }
    } else if status >= 500 {
        StoreError::Unavailable { key, message }
    } else {
        StoreError::Validation { key, message }
    }
}

fn classify<E, F>(key: &str, decrypt: bool, err: RusotoError<E>, service: F) -> StoreError
where
    E: std::error::Error + 'static,
    F: FnOnce(E) -> StoreError,
{
    match err {
        RusotoError::Service(e) => service(e),
        RusotoError::HttpDispatch(e) => StoreError::Unavailable { key: key.to_string(), message: e.to_string() },
        RusotoError::Credentials(e) => StoreError::CredentialsRejected { key: key.to_string(), message: e.to_string() },
        RusotoError::Unknown(response) => classify_response(
            key,
            response.status.as_u16(),
            &String::from_utf8_lossy(&response.body),
            decrypt,
        ),
        other => StoreError::Validation { key: key.to_string(), message: other.to_string() },
    }
}

impl ParameterStore for SSMOps {
    fn get_parameter(&self, key: &str, decrypt: bool) -> std::result::Result<RemoteParameter, StoreError> {
        let input = GetParameterRequest { name: key.to_string(), with_decryption: Some(decrypt), ..Default::default() };
        let output = self
            .ssm_client
            .get_parameter(input)
            .with_timeout(self.timeout)
            .sync()
            .map_err(|err| {
                classify(key, decrypt, err, |e| match e {
                    GetParameterError::ParameterNotFound(_) => StoreError::NotFound { key: key.to_string() },
                    GetParameterError::InvalidKeyId(m) => StoreError::KmsDecryptDenied { key: key.to_string(), message: m },
                    GetParameterError::InternalServerError(m) => StoreError::Unavailable { key: key.to_string(), message: m },
                    other => StoreError::Validation { key: key.to_string(), message: other.to_string() },
                })
            })?;
        output.parameter.map(into_remote).ok_or_else(|| StoreError::NotFound { key: key.to_string() })
    }

    fn get_parameters(&self, keys: &[String], decrypt: bool) -> std::result::Result<Vec<RemoteParameter>, StoreError> {
        let first = keys.first().map(String::as_str).unwrap_or("/");
        let input = GetParametersRequest { names: keys.to_vec(), with_decryption: Some(decrypt), ..Default::default() };
        let output = self
            .ssm_client
            .get_parameters(input)
            .with_timeout(self.timeout)
            .sync()
            .map_err(|err| {
                classify(first, decrypt, err, |e| match e {
                    GetParametersError::InvalidKeyId(m) => StoreError::KmsDecryptDenied { key: first.to_string(), message: m },
                    GetParametersError::InternalServerError(m) => StoreError::Unavailable { key: first.to_string(), message: m },
                    #[allow(unreachable_patterns)]
                    other => StoreError::Validation { key: first.to_string(), message: other.to_string() },
                })
            })?;
        if let Some(invalid) = output.invalid_parameters.as_ref().filter(|i| !i.is_empty()) {
            debug!("GetParameters skipped unknown names: {}", invalid.join(", "));
        }
        Ok(output.parameters.unwrap_or_default().into_iter().map(into_remote).collect())
    }

    fn put_parameter(&self, request: &PutRequest) -> std::result::Result<(), StoreError> {
        let key = request.key.as_str();
        let input = PutParameterRequest {
            name: request.key.clone(),
            value: request.value.clone(),
            type_: request.kind.as_str().to_string(),
            tier: Some(request.tier.as_str().to_string()),
            key_id: request.kms_key_id.clone(),
            overwrite: Some(request.overwrite),
            ..Default::default()
        };
        self.ssm_client
            .put_parameter(input)
            .with_timeout(self.timeout)
            .sync()
            .map_err(|err| {
                classify(key, false, err, |e| match e {
                    PutParameterError::ParameterAlreadyExists(_) => StoreError::AlreadyExists { key: key.to_string() },
                    PutParameterError::TooManyUpdates(m) => StoreError::Throttled { key: key.to_string(), message: m },
                    PutParameterError::InternalServerError(m) => StoreError::Unavailable { key: key.to_string(), message: m },
                    other => StoreError::Validation { key: key.to_string(), message: other.to_string() },
                })
            })?;
        Ok(())
    }

    fn delete_parameter(&self, key: &str) -> std::result::Result<(), StoreError> {
        let input = DeleteParameterRequest { name: key.to_string() };
        self.ssm_client
            .delete_parameter(input)
            .with_timeout(self.timeout)
            .sync()
            .map_err(|err| {
                classify(key, false, err, |e| match e {
                    DeleteParameterError::ParameterNotFound(_) => StoreError::NotFound { key: key.to_string() },
                    DeleteParameterError::InternalServerError(m) => StoreError::Unavailable { key: key.to_string(), message: m },
                    #[allow(unreachable_patterns)]
                    other => StoreError::Validation { key: key.to_string(), message: other.to_string() },
                })
            })?;
        Ok(())
    }

    fn describe_parameters(&self, query: &DescribeQuery) -> std::result::Result<ParameterPage, StoreError> {
        let key = query.name.as_ref().map(String::as_str).unwrap_or("/");
        let input = DescribeParametersRequest {
            max_results: Some(query.max_results),
            next_token: query.next_token.clone(),
            parameter_filters: query.name.as_ref().map(|name| {
                vec![ParameterStringFilter {
                    key: "Name".to_string(),
                    option: Some("Equals".to_string()),
                    values: Some(vec![name.clone()]),
                }]
            }),
            ..Default::default()
        };
        let output = self
            .ssm_client
            .describe_parameters(input)
            .with_timeout(self.timeout)
            .sync()
            .map_err(|err| {
                classify(key, false, err, |e| match e {
                    DescribeParametersError::InternalServerError(m) => StoreError::Unavailable { key: key.to_string(), message: m },
                    other => StoreError::Validation { key: key.to_string(), message: other.to_string() },
                })
            })?;
        let parameters = output
            .parameters
            .unwrap_or_default()
            .into_iter()
            .map(|p| ParameterMetadata {
                kind: parameter_type(p.type_.as_ref().map(String::as_str)),
                key: p.name.unwrap_or_default(),
                tier: p.tier.as_ref().and_then(|t| t.parse::<Tier>().ok()),
                kms_key_id: p.key_id.filter(|k| !k.is_empty()),
                version: p.version.unwrap_or_default(),
                last_modified: timestamp(p.last_modified_date),
            })
            .collect();
        Ok(ParameterPage { parameters, next_token: output.next_token })
    }
}
