use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::auth::sources::{AwsSources, CredentialSources, RoleRequest};
use crate::auth::{default_role_session_name, AuthConfig, AuthMethod, Session, SessionCache};
use crate::error::AuthError;

/// Turns an [`AuthConfig`] into a [`Session`].
///
/// Region precedence: the config's own region, then (for profiles) the profile's configured
/// region, then the environment, then the resolver's default region.
pub struct Resolver {
    sources: Box<dyn CredentialSources>,
    cache: Option<Arc<SessionCache>>,
    default_region: Option<String>,
}

impl Resolver {
    /// Resolver backed by the real AWS credential sources, without a cache.
    pub fn new(default_region: Option<&str>) -> Self {
        let resolver = Resolver::with_sources(AwsSources::default());
        match default_region {
            Some(region) => resolver.with_default_region(region),
            None => resolver,
        }
    }

    pub fn with_sources<S: CredentialSources + 'static>(sources: S) -> Self {
        Resolver { sources: Box::new(sources), cache: None, default_region: None }
    }

    pub fn with_cache(mut self, cache: Arc<SessionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_default_region(mut self, region: &str) -> Self {
        self.default_region = Some(region.to_string()).filter(|r| !r.is_empty());
        self
    }

    pub fn resolve(&self, config: &AuthConfig) -> Result<Session, AuthError> {
        match &self.cache {
            Some(cache) => cache.get_or_resolve(config.fingerprint(), || self.resolve_uncached(config)),
            None => self.resolve_uncached(config),
        }
    }

    /// Drops any cached session for `config`, e.g. after the store rejected its credentials.
    pub fn invalidate(&self, config: &AuthConfig) {
        if let Some(cache) = &self.cache {
            cache.invalidate(config.fingerprint());
        }
    }

    pub fn resolve_region(&self, config: &AuthConfig) -> Result<String, AuthError> {
        let profile_region = || match config {
            AuthConfig::Profile { name, .. } => self.sources.profile_region(name),
            _ => None,
        };
        config
            .region()
            .map(str::to_string)
            .or_else(profile_region)
            .or_else(|| self.sources.environment_region())
            .or_else(|| self.default_region.clone())
            .ok_or(AuthError::RegionRequired)
    }

    fn resolve_uncached(&self, config: &AuthConfig) -> Result<Session, AuthError> {
        let method = config.method();
        let region = self.resolve_region(config)?;
        debug!(%method, %region, "resolving credentials");

        let session = match config {
            AuthConfig::AccessKey { access_key_id, secret_access_key, session_token, .. } => {
                if access_key_id.trim().is_empty() || secret_access_key.trim().is_empty() {
                    return Err(AuthError::MissingCredentials {
                        reason: "access key id and secret access key are both required".to_string(),
                    });
                }
                let token = session_token.clone().filter(|t| !t.is_empty());
                let credentials = rusoto_credential::AwsCredentials::new(
                    access_key_id.trim(),
                    secret_access_key.trim(),
                    token,
                    None,
                );
                Session::from_credentials(credentials, &region, method)
            }
            AuthConfig::Profile { name, .. } => {
                if name.trim().is_empty() {
                    return Err(invalid(method, "profile name is required"));
                }
                Session::from_credentials(self.sources.profile(name)?, &region, method)
            }
            AuthConfig::Sso { start_url, sso_region, account_id, role_name, .. } => {
                if [start_url, sso_region, account_id, role_name].iter().any(|f| f.trim().is_empty()) {
                    return Err(invalid(method, "start url, SSO region, account id and role name are all required"));
                }
                let expired = || AuthError::SsoTokenExpired { start_url: start_url.clone() };
                let token = self.sources.sso_token(start_url)?.ok_or_else(expired)?;
                if token.is_expired_at(Utc::now()) {
                    return Err(expired());
                }
                let credentials =
                    self.sources.sso_role_credentials(&token, sso_region, account_id, role_name, start_url)?;
                Session::from_credentials(credentials, &region, method)
            }
            AuthConfig::AssumeRole { role_arn, session_name, external_id, mfa_serial, mfa_token, .. } => {
                if role_arn.trim().is_empty() {
                    return Err(invalid(method, "role ARN is required"));
                }
                let mfa_serial = mfa_serial.clone().filter(|s| !s.is_empty());
                let mfa_token = mfa_token.clone().filter(|t| !t.is_empty());
                if let (Some(serial), None) = (&mfa_serial, &mfa_token) {
                    return Err(AuthError::MfaRequired { mfa_serial: serial.clone() });
                }
                let request = RoleRequest {
                    role_arn: role_arn.clone(),
                    session_name: Some(session_name.clone())
                        .filter(|s| !s.is_empty())
                        .unwrap_or_else(default_role_session_name),
                    external_id: external_id.clone().filter(|e| !e.is_empty()),
                    mfa_serial,
                    mfa_token,
                };
                Session::from_credentials(self.sources.assume_role(&request, &region)?, &region, method)
            }
            AuthConfig::Environment { .. } => {
                let credentials = self.sources.environment().ok_or_else(|| AuthError::MissingCredentials {
                    reason: "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY are not set".to_string(),
                })?;
                Session::from_credentials(credentials, &region, method)
            }
            AuthConfig::DefaultChain { .. } => {
                let credentials = self.sources.default_chain().ok_or(AuthError::NoCredentialsFound)?;
                Session::from_credentials(credentials, &region, method)
            }
        };

        info!(%method, region = session.region(), expiry = ?session.expiry(), "resolved AWS session");
        Ok(session)
    }
}

fn invalid(method: AuthMethod, reason: &str) -> AuthError {
    AuthError::InvalidConfig { method, reason: reason.to_string() }
}
