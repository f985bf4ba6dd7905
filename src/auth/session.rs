use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusoto_credential::AwsCredentials;
use tracing::debug;

use crate::auth::AuthMethod;
use crate::error::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Long-lived keys.
    Never,
    /// Temporary credentials whose lifetime we were not told; re-resolve on auth failure.
    Unknown,
    At(DateTime<Utc>),
}

/// Live credentials plus the region they are used in.
#[derive(Clone)]
pub struct Session {
    credentials: AwsCredentials,
    expiry: Expiry,
    region: String,
    method: AuthMethod,
}

impl Session {
    pub fn new(credentials: AwsCredentials, expiry: Expiry, region: &str, method: AuthMethod) -> Self {
        Session { credentials, expiry, region: region.to_string(), method }
    }

    /// Expiry as reported by the credentials themselves.
    pub fn from_credentials(credentials: AwsCredentials, region: &str, method: AuthMethod) -> Self {
        let expiry = match (credentials.expires_at(), credentials.token()) {
            (Some(at), _) => Expiry::At(*at),
            (None, Some(_)) => Expiry::Unknown,
            (None, None) => Expiry::Never,
        };
        Session::new(credentials, expiry, region, method)
    }

    pub fn credentials(&self) -> &AwsCredentials {
        &self.credentials
    }

    pub fn expiry(&self) -> Expiry {
        self.expiry
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn method(&self) -> AuthMethod {
        self.method
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Expiry::At(at) => at <= now,
            Expiry::Never | Expiry::Unknown => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Session")
            .field("method", &self.method)
            .field("region", &self.region)
            .field("expiry", &self.expiry)
            .field("access_key_id", &self.credentials.aws_access_key_id())
            .finish()
    }
}

type Slot = Arc<Mutex<Option<Session>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Sessions keyed by `AuthConfig::fingerprint`. Entries past their expiry are resolved again
/// on read; at most one resolution per fingerprint runs at a time.
#[derive(Default)]
pub struct SessionCache {
    slots: Mutex<HashMap<u64, Slot>>,
}

impl SessionCache {
    pub fn new() -> Self {
        SessionCache::default()
    }

    pub fn get_or_resolve<F>(&self, fingerprint: u64, resolve: F) -> Result<Session, AuthError>
    where
        F: FnOnce() -> Result<Session, AuthError>,
    {
        let slot = lock(&self.slots).entry(fingerprint).or_insert_with(Slot::default).clone();
        // Held across `resolve` so concurrent callers for the same config wait for this one.
        let mut cached = lock(&slot);
        if let Some(session) = cached.as_ref() {
            if !session.is_expired() {
                debug!(fingerprint, method = %session.method(), "session cache hit");
                return Ok(session.clone());
            }
            debug!(fingerprint, method = %session.method(), "cached session expired");
        }
        let session = resolve()?;
        *cached = Some(session.clone());
        Ok(session)
    }

    pub fn get(&self, fingerprint: u64) -> Option<Session> {
        let slot = lock(&self.slots).get(&fingerprint).cloned()?;
        let cached = lock(&slot);
        cached.as_ref().filter(|s| !s.is_expired()).cloned()
    }

    pub fn invalidate(&self, fingerprint: u64) {
        lock(&self.slots).remove(&fingerprint);
    }

    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionCache").field("entries", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::cell::Cell;

    fn session(expiry: Expiry) -> Session {
        Session::new(AwsCredentials::new("AKID", "SECRET", None, None), expiry, "us-east-1", AuthMethod::AccessKey)
    }

    #[test]
    fn expiry_is_derived_from_credentials() {
        let long_lived = Session::from_credentials(
            AwsCredentials::new("AKID", "SECRET", None, None),
            "us-east-1",
            AuthMethod::AccessKey,
        );
        assert_eq!(long_lived.expiry(), Expiry::Never);
        let with_token = Session::from_credentials(
            AwsCredentials::new("AKID", "SECRET", Some("TOKEN".into()), None),
            "us-east-1",
            AuthMethod::AccessKey,
        );
        assert_eq!(with_token.expiry(), Expiry::Unknown);
        let at = Utc::now() + Duration::hours(1);
        let temporary = Session::from_credentials(
            AwsCredentials::new("AKID", "SECRET", Some("TOKEN".into()), Some(at)),
            "us-east-1",
            AuthMethod::AssumeRole,
        );
        assert_eq!(temporary.expiry(), Expiry::At(at));
    }

    #[test]
    fn only_timed_sessions_expire() {
        let now = Utc::now();
        assert!(!session(Expiry::Never).is_expired_at(now));
        assert!(!session(Expiry::Unknown).is_expired_at(now));
        assert!(session(Expiry::At(now - Duration::seconds(1))).is_expired_at(now));
        assert!(!session(Expiry::At(now + Duration::minutes(5))).is_expired_at(now));
    }

    #[test]
    fn cache_reuses_live_sessions() {
        let cache = SessionCache::new();
        let calls = Cell::new(0);
        for _ in 0..3 {
            cache
                .get_or_resolve(1, || {
                    calls.set(calls.get() + 1);
                    Ok(session(Expiry::Never))
                })
                .unwrap();
        }
        assert_eq!(calls.get(), 1);
        assert!(cache.get(1).is_some());
    }

    #[test]
    fn cache_resolves_again_once_expired() {
        let cache = SessionCache::new();
        let calls = Cell::new(0);
        for _ in 0..2 {
            cache
                .get_or_resolve(7, || {
                    calls.set(calls.get() + 1);
                    Ok(session(Expiry::At(Utc::now() - Duration::seconds(1))))
                })
                .unwrap();
        }
        assert_eq!(calls.get(), 2);
        assert!(cache.get(7).is_none());
    }

    #[test]
    fn failed_resolution_is_not_cached() {
        let cache = SessionCache::new();
        let result = cache.get_or_resolve(3, || Err(AuthError::NoCredentialsFound));
        assert_eq!(result.unwrap_err(), AuthError::NoCredentialsFound);
        assert!(cache.get(3).is_none());
        cache.invalidate(3);
        assert!(cache.is_empty());
    }
}
