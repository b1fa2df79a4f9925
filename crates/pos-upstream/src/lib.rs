//! Resilient client for the upstream Portfolio Manager.
//!
//! # Design
//!
//! One HTTP dependency, wrapped outer → inner as
//! **rate-limiter → bulkhead → circuit-breaker → retry → HTTP call**:
//! reject cheaply at the edge, isolate in-flight concurrency, short-circuit
//! a known-bad dependency, and retry only transient faults inside the
//! breaker's accounting.
//!
//! Every degraded path falls back to the per-account snapshot cache; a
//! cached snapshot is returned with its status rewritten to `STALE_CACHE`,
//! never silently as fresh.

use std::fmt;

use chrono::NaiveDate;

use pos_schemas::Snapshot;

pub mod breaker;
pub mod client;
pub mod limiter;
pub mod retry;

pub use breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use client::{MspmClient, MspmClientConfig};
pub use limiter::{Bulkhead, TokenBucket};
pub use retry::{retry_with_backoff, RetryPolicy};

// ---------------------------------------------------------------------------
// Boundary trait
// ---------------------------------------------------------------------------

/// Source of authoritative position snapshots.
///
/// The production implementation is [`MspmClient`]; tests script one.
/// Degraded availability is expressed in the returned snapshot's `status`
/// (`STALE_CACHE` / `UNAVAILABLE`), not as an `Err`. `Err` is reserved for
/// calls that cannot produce a snapshot shape at all (bad request, decode
/// failure).
#[async_trait::async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<Snapshot, UpstreamError>;
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors the upstream pipeline can surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// Transport-level failure (connection refused/reset, DNS).
    Unavailable(String),
    /// The per-call deadline elapsed.
    Timeout,
    /// Upstream said 429 and retries were exhausted.
    RateLimited,
    /// Local token bucket refused the call.
    Throttled,
    /// Bulkhead at capacity.
    Saturated,
    /// Circuit breaker is OPEN.
    CircuitOpen,
    /// Upstream returned an HTTP error status.
    Http { status: u16, message: String },
    /// The response body could not be decoded.
    Decode(String),
}

impl UpstreamError {
    /// Only idempotent failures are retried: timeouts, transport faults,
    /// 5xx, 408 and 429. Every other 4xx is terminal, as are the local
    /// guards (they fail fast by design of the composition order).
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Timeout | UpstreamError::Unavailable(_) => true,
            UpstreamError::Http { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            UpstreamError::RateLimited => true,
            UpstreamError::Throttled
            | UpstreamError::Saturated
            | UpstreamError::CircuitOpen
            | UpstreamError::Decode(_) => false,
        }
    }

    /// Whether the snapshot-cache fallback applies: open circuit, saturated
    /// bulkhead, local throttle, timeout, or exhausted transient retries.
    /// Exactly the retryable HTTP statuses qualify — an error worth
    /// retrying is, once retries are spent, an exhausted-retries failure.
    pub fn falls_back(&self) -> bool {
        match self {
            UpstreamError::Timeout
            | UpstreamError::Unavailable(_)
            | UpstreamError::RateLimited
            | UpstreamError::Throttled
            | UpstreamError::Saturated
            | UpstreamError::CircuitOpen => true,
            UpstreamError::Http { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            UpstreamError::Decode(_) => false,
        }
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::Unavailable(m) => write!(f, "upstream unavailable: {m}"),
            UpstreamError::Timeout => write!(f, "upstream call timed out"),
            UpstreamError::RateLimited => write!(f, "upstream rate limited"),
            UpstreamError::Throttled => write!(f, "local rate limit exceeded"),
            UpstreamError::Saturated => write!(f, "UPSTREAM_SATURATED: bulkhead at capacity"),
            UpstreamError::CircuitOpen => write!(f, "circuit breaker open"),
            UpstreamError::Http { status, message } => {
                write!(f, "upstream returned {status}: {message}")
            }
            UpstreamError::Decode(m) => write!(f, "snapshot decode failed: {m}"),
        }
    }
}

impl std::error::Error for UpstreamError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> UpstreamError {
        UpstreamError::Http {
            status,
            message: String::new(),
        }
    }

    #[test]
    fn transient_faults_are_retryable_and_fall_back() {
        for e in [
            UpstreamError::Timeout,
            UpstreamError::Unavailable("connection reset".to_string()),
            UpstreamError::RateLimited,
            http(500),
            http(503),
            http(408),
            http(429),
        ] {
            assert!(e.is_retryable(), "{e} should be retryable");
            assert!(e.falls_back(), "{e} should consult the cache");
        }
    }

    #[test]
    fn client_errors_are_terminal_with_no_fallback() {
        for e in [
            http(400),
            http(404),
            http(422),
            UpstreamError::Decode("bad json".to_string()),
        ] {
            assert!(!e.is_retryable(), "{e} must not be retried");
            assert!(!e.falls_back(), "{e} must surface, not mask as stale data");
        }
    }

    #[test]
    fn local_guards_fail_fast_but_fall_back() {
        for e in [
            UpstreamError::Throttled,
            UpstreamError::Saturated,
            UpstreamError::CircuitOpen,
        ] {
            assert!(!e.is_retryable(), "{e} must not be retried");
            assert!(e.falls_back(), "{e} should consult the cache");
        }
    }
}
