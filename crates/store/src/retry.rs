//! Retry policy for blob operations — exponential backoff with jitter.
//!
//! Only transient failures (timeouts, rate limits, generic storage errors)
//! are retried; everything else propagates immediately. Exhausted retries
//! return the last failure.

use everloop_core::StoreError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded exponential backoff with ±25% jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry (doubles each attempt)
    pub base_delay_ms: u64,
    /// Cap on any single delay
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 250,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails non-transiently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        warn!(op = label, attempts = attempt, error = %e, "Retries exhausted");
                        return Err(e);
                    }
                    let delay = self.delay_for(attempt);
                    debug!(op = label, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Transient failure, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Exponential delay for the given 1-based retry attempt, jittered ±25%.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1).min(16)));
        let capped = exp.min(self.max_delay_ms);
        Duration::from_millis(jitter(capped))
    }
}

/// Apply ±25% jitter to prevent thundering-herd effects.
fn jitter(base_ms: u64) -> u64 {
    let range = base_ms / 4;
    if range == 0 {
        return base_ms.max(1);
    }
    let offset = rand::thread_rng().gen_range(0..=range * 2) as i64 - range as i64;
    (base_ms as i64 + offset).max(1) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };
        let calls = AtomicU32::new(0);
        let result = policy
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(StoreError::RateLimited)
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_propagates_immediately() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::NotFound("x".into())) }
            })
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_attempts_return_last_error() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::Timeout("slow".into())) }
            })
            .await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let j = jitter(1000);
            assert!((750..=1250).contains(&j));
        }
        assert!(jitter(0) >= 1);
    }
}
