//! Where credentials come from. The resolver only talks to [`CredentialSources`]; the
//! rusoto-backed [`AwsSources`] is the production implementation.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Future;
use rusoto_core::{HttpClient, Region};
use rusoto_credential::{AwsCredentials, ChainProvider, EnvironmentProvider, ProfileProvider, ProvideAwsCredentials};
use rusoto_sts::{AssumeRoleRequest, Sts, StsClient};
use tracing::debug;

use crate::auth::profiles;
use crate::auth::sso::{self, SsoToken};
use crate::auth::AuthMethod;
use crate::error::AuthError;

/// Input to an STS AssumeRole call.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleRequest {
    pub role_arn: String,
    pub session_name: String,
    pub external_id: Option<String>,
    pub mfa_serial: Option<String>,
    pub mfa_token: Option<String>,
}

pub trait CredentialSources: Send + Sync {
    /// Credentials from process environment variables only.
    fn environment(&self) -> Option<AwsCredentials>;

    /// `AWS_REGION`, then `AWS_DEFAULT_REGION`.
    fn environment_region(&self) -> Option<String>;

    fn profile(&self, name: &str) -> Result<AwsCredentials, AuthError>;

    fn profile_region(&self, name: &str) -> Option<String>;

    fn sso_token(&self, start_url: &str) -> Result<Option<SsoToken>, AuthError>;

    fn sso_role_credentials(
        &self,
        token: &SsoToken,
        sso_region: &str,
        account_id: &str,
        role_name: &str,
        start_url: &str,
    ) -> Result<AwsCredentials, AuthError>;

    fn assume_role(&self, request: &RoleRequest, region: &str) -> Result<AwsCredentials, AuthError>;

    /// Environment, shared credentials file, shared config file, container role, instance role.
    fn default_chain(&self) -> Option<AwsCredentials>;
}

#[derive(Debug, Clone)]
pub struct AwsSources {
    pub credentials_file: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub sso_cache_dir: Option<PathBuf>,
    pub timeout: Duration,
}

impl Default for AwsSources {
    fn default() -> Self {
        AwsSources {
            credentials_file: profiles::credentials_path(),
            config_file: profiles::config_path(),
            sso_cache_dir: sso::cache_dir(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl AwsSources {
    pub fn new() -> Self {
        AwsSources::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn static_credentials(keys: profiles::StaticKeys) -> AwsCredentials {
    AwsCredentials::new(keys.access_key_id, keys.secret_access_key, keys.session_token, None)
}

fn provider_failed(method: AuthMethod, reason: impl ToString) -> AuthError {
    AuthError::ProviderFailed { method, reason: reason.to_string() }
}

impl CredentialSources for AwsSources {
    fn environment(&self) -> Option<AwsCredentials> {
        match EnvironmentProvider::default().credentials().wait() {
            Ok(creds) => Some(creds),
            Err(e) => {
                debug!("no environment credentials: {}", e);
                None
            }
        }
    }

    fn environment_region(&self) -> Option<String> {
        non_empty_var("AWS_REGION").or_else(|| non_empty_var("AWS_DEFAULT_REGION"))
    }

    fn profile(&self, name: &str) -> Result<AwsCredentials, AuthError> {
        let exists = profiles::profile_exists_in(name, self.credentials_file.as_deref(), self.config_file.as_deref())
            .map_err(|e| provider_failed(AuthMethod::Profile, e))?;
        if !exists {
            return Err(AuthError::ProfileNotFound { profile: name.to_string() });
        }
        if let Some(credentials_file) = &self.credentials_file {
            let has_section = profiles::has_credentials_section(name, credentials_file)
                .map_err(|e| provider_failed(AuthMethod::Profile, e))?;
            if has_section {
                return ProfileProvider::with_configuration(credentials_file.clone(), name)
                    .credentials()
                    .wait()
                    .map_err(|e| provider_failed(AuthMethod::Profile, e));
            }
        }
        // Only the config file knows this profile.
        match profiles::static_keys_in(name, None, self.config_file.as_deref()) {
            Ok(Some(keys)) => Ok(static_credentials(keys)),
            Ok(None) => Err(provider_failed(
                AuthMethod::Profile,
                format!("profile '{}' has no aws_access_key_id/aws_secret_access_key pair", name),
            )),
            Err(e) => Err(provider_failed(AuthMethod::Profile, e)),
        }
    }

    fn profile_region(&self, name: &str) -> Option<String> {
        self.config_file.as_ref().and_then(|config| profiles::profile_region_in(name, config))
    }

    fn sso_token(&self, start_url: &str) -> Result<Option<SsoToken>, AuthError> {
        match &self.sso_cache_dir {
            Some(dir) => sso::find_token(dir, start_url).map_err(|e| provider_failed(AuthMethod::Sso, e)),
            None => Ok(None),
        }
    }

    fn sso_role_credentials(
        &self,
        token: &SsoToken,
        sso_region: &str,
        account_id: &str,
        role_name: &str,
        start_url: &str,
    ) -> Result<AwsCredentials, AuthError> {
        sso::role_credentials(token, sso_region, account_id, role_name, start_url, self.timeout)
    }

    fn assume_role(&self, request: &RoleRequest, region: &str) -> Result<AwsCredentials, AuthError> {
        let region = region.parse::<Region>().map_err(|e| AuthError::InvalidConfig {
            method: AuthMethod::AssumeRole,
            reason: e.to_string(),
        })?;
        let dispatcher = HttpClient::new().map_err(|e| provider_failed(AuthMethod::AssumeRole, e))?;
        let sts = StsClient::new_with(dispatcher, ChainProvider::new(), region);
        let input = AssumeRoleRequest {
            role_arn: request.role_arn.clone(),
            role_session_name: request.session_name.clone(),
            external_id: request.external_id.clone(),
            serial_number: request.mfa_serial.clone(),
            token_code: request.mfa_token.clone(),
            ..Default::default()
        };
        let output = sts
            .assume_role(input)
            .with_timeout(self.timeout)
            .sync()
            .map_err(|e| provider_failed(AuthMethod::AssumeRole, e))?;
        let creds = output
            .credentials
            .ok_or_else(|| provider_failed(AuthMethod::AssumeRole, "STS returned no credentials"))?;
        let expires_at = DateTime::parse_from_rfc3339(&creds.expiration)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| provider_failed(AuthMethod::AssumeRole, format!("bad expiration '{}': {}", creds.expiration, e)))?;
        Ok(AwsCredentials::new(
            creds.access_key_id,
            creds.secret_access_key,
            Some(creds.session_token),
            Some(expires_at),
        ))
    }

    fn default_chain(&self) -> Option<AwsCredentials> {
        let mut chain = ChainProvider::new();
        chain.set_timeout(self.timeout);
        match chain.credentials().wait() {
            Ok(creds) => Some(creds),
            Err(e) => {
                debug!("default credential chain exhausted: {}", e);
                let name = non_empty_var("AWS_PROFILE").unwrap_or_else(|| profiles::DEFAULT_PROFILE.to_string());
                match profiles::static_keys_in(&name, self.credentials_file.as_deref(), self.config_file.as_deref()) {
                    Ok(keys) => keys.map(static_credentials),
                    Err(e) => {
                        debug!(profile = %name, "cannot read shared profile files: {}", e);
                        None
                    }
                }
            }
        }
    }
}
