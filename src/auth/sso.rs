//! SSO: the token cache left behind by `aws sso login`, and the portal call that trades a
//! cached token for role credentials. Logging in is left to the AWS CLI.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusoto_credential::AwsCredentials;
use tracing::debug;

use crate::auth::AuthMethod;
use crate::error::AuthError;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct CachedToken {
    start_url: Option<String>,
    region: Option<String>,
    access_token: Option<String>,
    expires_at: Option<String>,
}

#[derive(Clone, PartialEq)]
pub struct SsoToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub region: Option<String>,
}

impl SsoToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl std::fmt::Debug for SsoToken {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SsoToken").field("expires_at", &self.expires_at).field("region", &self.region).finish()
    }
}

pub fn cache_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".aws").join("sso").join("cache"))
}

/// Accepts RFC 3339 as well as the `...UTC` suffix older CLI versions wrote.
pub fn parse_expiry(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let normalized = match value.strip_suffix("UTC") {
        Some(stem) => format!("{}Z", stem),
        None => value.to_string(),
    };
    DateTime::parse_from_rfc3339(&normalized).ok().map(|dt| dt.with_timezone(&Utc))
}

/// Newest cached token issued for `start_url`, if any.
pub fn find_token(dir: &Path, start_url: &str) -> io::Result<Option<SsoToken>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let wanted = start_url.trim_end_matches('/');
    let mut best: Option<SsoToken> = None;
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let cached: CachedToken = match fs::read_to_string(&path).ok().and_then(|t| serde_json::from_str(&t).ok()) {
            Some(cached) => cached,
            None => {
                debug!(path = %path.display(), "ignoring unreadable SSO cache entry");
                continue;
            }
        };
        let token = match cached {
            CachedToken { start_url: Some(url), access_token: Some(access_token), expires_at: Some(expires_at), region }
                if url.trim_end_matches('/') == wanted =>
            {
                match parse_expiry(&expires_at) {
                    Some(expires_at) => SsoToken { access_token, expires_at, region },
                    None => continue,
                }
            }
            _ => continue,
        };
        if best.as_ref().map_or(true, |b| token.expires_at > b.expires_at) {
            best = Some(token);
        }
    }
    Ok(best)
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RoleCredentialsResponse {
    role_credentials: RoleCredentials,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RoleCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
    /// Milliseconds since the epoch.
    expiration: i64,
}

pub fn portal_url(sso_region: &str) -> String {
    format!("https://portal.sso.{}.amazonaws.com/federation/credentials", sso_region)
}

/// GetRoleCredentials against the SSO portal.
pub fn role_credentials(
    token: &SsoToken,
    sso_region: &str,
    account_id: &str,
    role_name: &str,
    start_url: &str,
    timeout: Duration,
) -> Result<AwsCredentials, AuthError> {
    let failed = |reason: String| AuthError::ProviderFailed { method: AuthMethod::Sso, reason };
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| failed(e.to_string()))?;
    let response = client
        .get(portal_url(sso_region))
        .query(&[("account_id", account_id), ("role_name", role_name)])
        .header("x-amz-sso_bearer_token", token.access_token.as_str())
        .send()
        .map_err(|e| failed(e.to_string()))?;

    let status = response.status();
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(AuthError::SsoTokenExpired { start_url: start_url.to_string() });
    }
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(failed(format!("portal returned {}: {}", status, body)));
    }
    let parsed: RoleCredentialsResponse = response.json().map_err(|e| failed(e.to_string()))?;
    into_credentials(parsed.role_credentials).ok_or_else(|| failed("invalid credential expiration".to_string()))
}

fn into_credentials(creds: RoleCredentials) -> Option<AwsCredentials> {
    let expires_at = Utc.timestamp_millis_opt(creds.expiration).single()?;
    Some(AwsCredentials::new(creds.access_key_id, creds.secret_access_key, creds.session_token, Some(expires_at)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn parses_both_expiry_formats() {
        let rfc = parse_expiry("2030-11-14T04:05:45Z").unwrap();
        let legacy = parse_expiry("2030-11-14T04:05:45UTC").unwrap();
        assert_eq!(rfc, legacy);
        assert!(parse_expiry("tomorrow").is_none());
    }

    #[test]
    fn finds_newest_token_for_start_url() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "a.json",
            r#"{"startUrl":"https://example.awsapps.com/start","region":"us-east-1","accessToken":"old","expiresAt":"2030-01-01T00:00:00Z"}"#,
        );
        write(
            dir.path(),
            "b.json",
            r#"{"startUrl":"https://example.awsapps.com/start/","region":"us-east-1","accessToken":"new","expiresAt":"2031-01-01T00:00:00UTC"}"#,
        );
        write(
            dir.path(),
            "c.json",
            r#"{"startUrl":"https://other.awsapps.com/start","accessToken":"other","expiresAt":"2032-01-01T00:00:00Z"}"#,
        );
        write(dir.path(), "botocore-client.json", r#"{"clientId":"x"}"#);
        write(dir.path(), "notes.txt", "not json");

        let token = find_token(dir.path(), "https://example.awsapps.com/start").unwrap().unwrap();
        assert_eq!(token.access_token, "new");
        assert_eq!(token.region.as_deref(), Some("us-east-1"));
    }

    #[test]
    fn missing_cache_dir_means_no_token() {
        let dir = tempfile::tempdir().unwrap();
        let token = find_token(&dir.path().join("absent"), "https://example.awsapps.com/start").unwrap();
        assert!(token.is_none());
    }

    #[test]
    fn portal_url_is_regional() {
        assert_eq!(portal_url("eu-west-1"), "https://portal.sso.eu-west-1.amazonaws.com/federation/credentials");
    }

    #[test]
    fn role_credentials_carry_expiration() {
        let creds = into_credentials(RoleCredentials {
            access_key_id: "ASIA".into(),
            secret_access_key: "secret".into(),
            session_token: Some("token".into()),
            expiration: 1_900_000_000_000,
        })
        .unwrap();
        assert_eq!(creds.expires_at().map(|t| t.timestamp()), Some(1_900_000_000));
    }
}
