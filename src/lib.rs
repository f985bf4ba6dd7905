//! Manage AWS Systems Manager parameters: resolve credentials six different ways, then read,
//! write, list, or bulk-sync parameters from CSV.

#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate failure_derive;

pub mod auth;
pub mod client;
pub mod config;
pub mod conflict;
pub mod error;
pub mod memory_store;
pub mod ssm_ops;
pub mod ssm_parameters;
pub mod store;
pub mod sync;
pub mod tabular;

pub use crate::auth::{AuthConfig, AuthMethod, Resolver, Session, SessionCache};
pub use crate::client::{ParameterClient, ParameterIter};
pub use crate::config::{ClientConfig, RetryPolicy};
pub use crate::conflict::{AlwaysOverwrite, AlwaysSkip, ConflictDecision, ConflictPolicy, Interactive};
pub use crate::error::{AuthError, Error, InputError, Result, StoreError};
pub use crate::memory_store::MemoryStore;
pub use crate::ssm_ops::{SSMConnector, SSMOps};
pub use crate::ssm_parameters::{ParameterRecord, ParameterType, RemoteParameter, Tier};
pub use crate::sync::{sync, CancelFlag, SyncAction, SyncEngine, SyncOutcome, SyncReport};
