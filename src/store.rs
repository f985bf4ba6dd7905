//! The remote parameter store as a capability: the handful of calls the manager needs,
//! independent of the SDK that carries them.

use chrono::{DateTime, Utc};

use crate::auth::Session;
use crate::error::{Result, StoreError};
use crate::ssm_parameters::{ParameterType, RemoteParameter, Tier};

/// PutParameter input. `value` is already in the store's wire form.
#[derive(Debug, Clone, PartialEq)]
pub struct PutRequest {
    pub key: String,
    pub value: String,
    pub kind: ParameterType,
    pub tier: Tier,
    pub kms_key_id: Option<String>,
    pub overwrite: bool,
}

/// One DescribeParameters call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescribeQuery {
    /// Exact-name filter.
    pub name: Option<String>,
    pub max_results: i64,
    pub next_token: Option<String>,
}

/// Parameter metadata as listed by DescribeParameters (no value).
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterMetadata {
    pub key: String,
    pub kind: ParameterType,
    pub tier: Option<Tier>,
    pub kms_key_id: Option<String>,
    pub version: i64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterPage {
    pub parameters: Vec<ParameterMetadata>,
    pub next_token: Option<String>,
}

pub trait ParameterStore {
    fn get_parameter(&self, key: &str, decrypt: bool) -> std::result::Result<RemoteParameter, StoreError>;

    /// Batch read; unknown names are silently left out of the result.
    fn get_parameters(&self, keys: &[String], decrypt: bool) -> std::result::Result<Vec<RemoteParameter>, StoreError>;

    fn put_parameter(&self, request: &PutRequest) -> std::result::Result<(), StoreError>;

    fn delete_parameter(&self, key: &str) -> std::result::Result<(), StoreError>;

    fn describe_parameters(&self, query: &DescribeQuery) -> std::result::Result<ParameterPage, StoreError>;
}

/// Builds a store client scoped to one resolved session.
pub trait Connect {
    type Store: ParameterStore;

    fn connect(&self, session: &Session) -> Result<Self::Store>;
}
