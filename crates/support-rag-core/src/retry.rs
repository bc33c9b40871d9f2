//! Bounded exponential backoff for service calls.
//!
//! Only errors reporting [`crate::error::Error::is_transient`] are
//! retried. Permanent failures return on the first attempt. The caller's
//! future is awaited afresh on every attempt, so no state (and no lock)
//! survives across the sleep.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;

/// How often and how patiently to retry a transient failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. `1` disables retries.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay after the `failed`-th failed attempt: base, 2×base, 4×base, … capped.
    pub fn delay_for(&self, failed: u32) -> Duration {
        let exp = failed.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

/// Run `f` until it succeeds, fails permanently, or attempts run out.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, op: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    op,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ServiceError};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> Error {
        Error::embedding("test", ServiceError::transient("503"))
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry(&RetryPolicy::default(), "embed", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient())
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = retry(&RetryPolicy::default(), "embed", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = retry(&RetryPolicy::default(), "generate", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::generation("q", ServiceError::permanent("400")))
        })
        .await;
        assert!(!result.unwrap_err().is_transient());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
