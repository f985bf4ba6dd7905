use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::error::StoreError;

/// Region used when neither the auth config nor the environment names one.
pub const DEFAULT_REGION: &str = "us-east-1";
/// KMS key applied to SecureString parameters that don't name their own.
pub const DEFAULT_KMS_KEY: &str = "alias/aws/ssm";
/// DescribeParameters refuses page sizes above this.
pub const MAX_PAGE_SIZE: i64 = 50;
/// GetParameters accepts at most this many names per call.
pub const GET_PARAMETERS_BATCH: usize = 10;

/// Settings for the parameter client facade.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub page_size: i64,
    pub kms_key_alias: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            page_size: MAX_PAGE_SIZE,
            kms_key_alias: DEFAULT_KMS_KEY.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_kms_key_alias(mut self, alias: &str) -> Self {
        self.kms_key_alias = alias.to_string();
        self
    }

    /// Page size clamped to what DescribeParameters accepts.
    pub fn page_size(&self) -> i64 {
        self.page_size.max(1).min(MAX_PAGE_SIZE)
    }
}

/// Bounded exponential backoff for transient store errors.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn none() -> Self {
        RetryPolicy { max_attempts: 1, ..RetryPolicy::default() }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::max_value());
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    pub fn run<T, F>(&self, operation: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Result<T, StoreError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        key = err.key(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient error, retrying: {}",
                        err
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn quick() -> RetryPolicy {
        RetryPolicy { max_attempts: 3, base_delay: Duration::from_millis(0), max_delay: Duration::from_millis(0) }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(10), Duration::from_secs(2));
        assert_eq!(policy.delay_for(64), Duration::from_secs(2));
    }

    #[test]
    fn retries_transient_errors_until_success() {
        let calls = Cell::new(0);
        let result = quick().run("get", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(StoreError::Throttled { key: "/a".into(), message: "rate".into() })
            } else {
                Ok(7)
            }
        });
        assert_eq!(result, Ok(7));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), _> = quick().run("put", || {
            calls.set(calls.get() + 1);
            Err(StoreError::Unavailable { key: "/a".into(), message: "timeout".into() })
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn does_not_retry_permanent_errors() {
        let calls = Cell::new(0);
        let result: Result<(), _> = quick().run("get", || {
            calls.set(calls.get() + 1);
            Err(StoreError::NotFound { key: "/a".into() })
        });
        assert_eq!(result, Err(StoreError::NotFound { key: "/a".into() }));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn page_size_is_clamped() {
        let mut config = ClientConfig::default();
        config.page_size = 500;
        assert_eq!(config.page_size(), MAX_PAGE_SIZE);
        config.page_size = 0;
        assert_eq!(config.page_size(), 1);
    }
}
