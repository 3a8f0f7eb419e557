//! Bounded exponential backoff for store writes
//!
//! SQLite reports write contention as `SQLITE_BUSY` / `SQLITE_LOCKED`, and the
//! pool reports it as an acquire timeout. Those are retried; every other error
//! is returned on the first attempt.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy shared by every store writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100), Duration::from_secs(2))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff before attempt `attempt + 1` (attempts count from 1)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op`, retrying on write contention
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if is_contention(&err) => {
                    if attempt >= self.max_attempts {
                        warn!(
                            "{} gave up after {} attempts: {}",
                            operation, attempt, err
                        );
                        return Err(Error::StoreUnavailable(format!(
                            "{} failed after {} attempts: {}",
                            operation, attempt, err
                        )));
                    }
                    let delay = self.delay_for(attempt);
                    debug!(
                        "{} hit contention (attempt {}), retrying in {:?}",
                        operation, attempt, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Whether an error is transient lock contention
pub fn is_contention(err: &Error) -> bool {
    match err {
        Error::Database(sqlx::Error::PoolTimedOut) => true,
        Error::Database(sqlx::Error::Database(db)) => {
            // 5 = SQLITE_BUSY, 6 = SQLITE_LOCKED, plus their extended codes
            let busy_code = db
                .code()
                .and_then(|c| c.parse::<i32>().ok())
                .map(|c| matches!(c & 0xff, 5 | 6))
                .unwrap_or(false);
            busy_code || db.message().contains("database is locked")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(4))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(6, Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_contention_exhausts_into_store_unavailable() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast_policy(3)
            .run("append", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Database(sqlx::Error::PoolTimedOut))
            })
            .await;

        assert!(matches!(result, Err(Error::StoreUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_contention() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(4)
            .run("append", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Database(sqlx::Error::PoolTimedOut))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast_policy(5)
            .run("set_links", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::InvalidLink(vec!["x".to_string()]))
            })
            .await;

        assert!(matches!(result, Err(Error::InvalidLink(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
