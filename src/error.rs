use std::io;

use crate::auth::AuthMethod;
use crate::sync::SyncReport;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures while turning an `AuthConfig` into a live `Session`.
#[derive(Debug, Fail, Clone, PartialEq)]
pub enum AuthError {
    #[fail(display = "AWS profile not found: {}", profile)]
    ProfileNotFound { profile: String },
    #[fail(display = "SSO token for {} is expired or missing, run `aws sso login` first", start_url)]
    SsoTokenExpired { start_url: String },
    #[fail(display = "MFA device {} is configured but no MFA token was supplied", mfa_serial)]
    MfaRequired { mfa_serial: String },
    #[fail(display = "Missing credentials: {}", reason)]
    MissingCredentials { reason: String },
    #[fail(display = "No credentials found in the default provider chain")]
    NoCredentialsFound,
    #[fail(display = "No region configured and none found in the environment")]
    RegionRequired,
    #[fail(display = "Invalid {} configuration: {}", method, reason)]
    InvalidConfig { method: AuthMethod, reason: String },
    #[fail(display = "{} authentication failed: {}", method, reason)]
    ProviderFailed { method: AuthMethod, reason: String },
}

/// Failures reported by the remote parameter store. Every variant names the parameter it concerns.
#[derive(Debug, Fail, Clone, PartialEq)]
pub enum StoreError {
    #[fail(display = "Parameter not found: {}", key)]
    NotFound { key: String },
    #[fail(display = "Parameter already exists: {}", key)]
    AlreadyExists { key: String },
    #[fail(display = "Access denied for {}: {}", key, message)]
    AccessDenied { key: String, message: String },
    /// The session's credentials were refused outright (expired, revoked or unknown key).
    #[fail(display = "Credentials rejected for {}: {}", key, message)]
    CredentialsRejected { key: String, message: String },
    #[fail(display = "KMS decryption denied for {}: {}", key, message)]
    KmsDecryptDenied { key: String, message: String },
    #[fail(display = "Validation failed for {}: {}", key, message)]
    Validation { key: String, message: String },
    #[fail(display = "Request throttled for {}: {}", key, message)]
    Throttled { key: String, message: String },
    #[fail(display = "Parameter store unavailable for {}: {}", key, message)]
    Unavailable { key: String, message: String },
}

impl StoreError {
    /// Transient errors are worth retrying; everything else is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Throttled { .. } | StoreError::Unavailable { .. } => true,
            _ => false,
        }
    }

    /// Rejected credentials may succeed after the session is resolved again.
    pub fn is_credentials_rejected(&self) -> bool {
        match self {
            StoreError::CredentialsRejected { .. } => true,
            _ => false,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            StoreError::NotFound { key }
            | StoreError::AlreadyExists { key }
            | StoreError::AccessDenied { key, .. }
            | StoreError::CredentialsRejected { key, .. }
            | StoreError::KmsDecryptDenied { key, .. }
            | StoreError::Validation { key, .. }
            | StoreError::Throttled { key, .. }
            | StoreError::Unavailable { key, .. } => key,
        }
    }

    /// Short machine-friendly name of the error kind, used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "NotFound",
            StoreError::AlreadyExists { .. } => "AlreadyExists",
            StoreError::AccessDenied { .. } => "AccessDenied",
            StoreError::CredentialsRejected { .. } => "CredentialsRejected",
            StoreError::KmsDecryptDenied { .. } => "KMSDecryptDenied",
            StoreError::Validation { .. } => "ValidationError",
            StoreError::Throttled { .. } => "Throttled",
            StoreError::Unavailable { .. } => "Unavailable",
        }
    }
}

/// Failures reading or writing tabular parameter definitions.
#[derive(Debug, Fail)]
pub enum InputError {
    #[fail(display = "Malformed row {}: {}", row, reason)]
    MalformedRow { row: usize, reason: String },
    #[fail(display = "CSV error: {}", _0)]
    Csv(#[cause] csv::Error),
    #[fail(display = "IO error: {}", _0)]
    Io(#[cause] io::Error),
}

#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "{}", _0)]
    Auth(#[cause] AuthError),
    #[fail(display = "{}", _0)]
    Store(#[cause] StoreError),
    #[fail(display = "{}", _0)]
    Input(#[cause] InputError),
    #[fail(display = "Batch aborted: {}", _0)]
    BatchAborted(SyncReport),
    #[fail(display = "Batch cancelled: {}", _0)]
    Cancelled(SyncReport),
}

impl Error {
    /// The partial report of an aborted or cancelled batch.
    pub fn partial_report(&self) -> Option<&SyncReport> {
        match self {
            Error::BatchAborted(report) | Error::Cancelled(report) => Some(report),
            _ => None,
        }
    }
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        Error::Auth(err)
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::Store(err)
    }
}

impl From<InputError> for Error {
    fn from(err: InputError) -> Self {
        Error::Input(err)
    }
}

impl From<csv::Error> for InputError {
    fn from(err: csv::Error) -> Self {
        InputError::Csv(err)
    }
}

impl From<io::Error> for InputError {
    fn from(err: io::Error) -> Self {
        InputError::Io(err)
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Input(InputError::Csv(err))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Input(InputError::Io(err))
    }
}
