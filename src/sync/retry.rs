// src/sync/retry.rs
use metrics::counter;
use std::future::Future;
use std::time::Duration;

use crate::sync::store::StoreError;

/// How a failed call should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Wait this long (or the policy default) then retry.
    RateLimited(Option<Duration>),
    /// Retry with exponential backoff.
    Transient,
    /// Do not retry.
    Permanent,
}

pub fn classify(err: &StoreError) -> RetryClass {
    match err {
        StoreError::RateLimited { retry_after } => RetryClass::RateLimited(*retry_after),
        StoreError::Server { .. } | StoreError::Network(_) => RetryClass::Transient,
        StoreError::Client { .. } | StoreError::Schema(_) | StoreError::Decode(_) => {
            RetryClass::Permanent
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, first call included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Used for 429 responses without a usable `Retry-After`.
    pub rate_limit_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            rate_limit_wait: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based): base·2^(attempt-1),
    /// capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, hits a permanent error, or runs out of
    /// attempts. The last error is returned.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match op().await {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };
            let wait = match classify(&err) {
                RetryClass::Permanent => return Err(err),
                _ if attempt >= max => return Err(err),
                RetryClass::RateLimited(after) => after.unwrap_or(self.rate_limit_wait),
                RetryClass::Transient => self.backoff(attempt),
            };
            tracing::warn!(
                target: "sync",
                op = what,
                attempt,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "store call failed, retrying"
            );
            counter!("sync_retries_total").increment(1);
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            rate_limit_wait: Duration::from_millis(1),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            ..RetryPolicy::default()
        };
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(350));
        assert_eq!(p.backoff(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = fast()
            .run("t", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Client {
                    status: 422,
                    message: "bad".into(),
                })
            })
            .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_errors_retry_until_success() {
        let calls = AtomicU32::new(0);
        let res = fast()
            .run("t", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(StoreError::Server {
                        status: 502,
                        message: String::new(),
                    })
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(res.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_attempts_return_last_error() {
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = fast()
            .run("t", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Network("reset".into()))
            })
            .await;
        assert!(matches!(res, Err(StoreError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
