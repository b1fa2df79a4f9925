//! Bounded retry with exponential backoff and full jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::UpstreamError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles each retry.
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Full-jitter delay for the given zero-based retry index: a uniform
    /// sample from `[0, base × 2^idx]`.
    fn jittered_delay(&self, retry_idx: u32) -> Duration {
        let ceiling = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(retry_idx));
        let ceiling_ms = ceiling.as_millis().min(u64::MAX as u128) as u64;
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling_ms))
    }
}

/// Run `operation` with at most `policy.max_attempts` attempts.
///
/// Only errors whose [`UpstreamError::is_retryable`] is true are retried;
/// everything else returns immediately with the error.
pub async fn retry_with_backoff<T, F, Fut>(
    name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let max = policy.max_attempts.max(1);

    for attempt in 0..max {
        match operation().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt + 1 < max => {
                let delay = policy.jittered_delay(attempt);
                warn!(
                    operation = name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient upstream failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }

    // The final attempt always returns out of the loop.
    unreachable!()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
        };
        let out = retry_with_backoff("test", &policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(UpstreamError::Timeout)
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;
        assert_eq!(out.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_millis(1),
        };
        let out: Result<(), _> = retry_with_backoff("test", &policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(UpstreamError::Http {
                    status: 404,
                    message: "unknown account".to_string(),
                })
            }
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_429_surfaces_a_fallback_eligible_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
        };
        let out: Result<(), _> = retry_with_backoff("test", &policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(UpstreamError::Http {
                    status: 429,
                    message: "slow down".to_string(),
                })
            }
        })
        .await;

        // Retried to exhaustion, and the surfaced error still qualifies for
        // the stale-snapshot cache.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let err = out.unwrap_err();
        assert!(err.falls_back());
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
        };
        let out: Result<(), _> = retry_with_backoff("test", &policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(UpstreamError::Timeout) }
        })
        .await;
        assert_eq!(out.unwrap_err(), UpstreamError::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
