//! Error kinds surfaced by the EOD engine.

use std::fmt;

use pos_upstream::UpstreamError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EodError {
    UpstreamUnavailable(String),
    UpstreamTimeout,
    UpstreamRateLimited,
    Validation(String),
    DuplicateSnapshot,
    BatchValidation(String),
    ConcurrencyConflict(String),
    Cancelled,
    NotFound(String),
    InvalidArgument(String),
    Internal(String),
}

impl EodError {
    /// Short machine tag stored in `eod_status.last_error` and alerts.
    pub fn code(&self) -> &'static str {
        match self {
            EodError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            EodError::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            EodError::UpstreamRateLimited => "UPSTREAM_RATE_LIMITED",
            EodError::Validation(_) => "VALIDATION_ERROR",
            EodError::DuplicateSnapshot => "DUPLICATE_SNAPSHOT",
            EodError::BatchValidation(_) => "BATCH_VALIDATION_ERROR",
            EodError::ConcurrencyConflict(_) => "CONCURRENCY_CONFLICT",
            EodError::Cancelled => "CANCELLED",
            EodError::NotFound(_) => "NOT_FOUND",
            EodError::InvalidArgument(_) => "INVALID_ARGUMENT",
            EodError::Internal(_) => "INTERNAL",
        }
    }
}

impl fmt::Display for EodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EodError::UpstreamUnavailable(m) => write!(f, "upstream unavailable: {m}"),
            EodError::UpstreamTimeout => write!(f, "upstream timed out"),
            EodError::UpstreamRateLimited => write!(f, "upstream rate limited"),
            EodError::Validation(m) => write!(f, "validation failed: {m}"),
            EodError::DuplicateSnapshot => write!(f, "duplicate snapshot"),
            EodError::BatchValidation(m) => write!(f, "batch validation failed: {m}"),
            EodError::ConcurrencyConflict(m) => write!(f, "concurrency conflict: {m}"),
            EodError::Cancelled => write!(f, "cancelled"),
            EodError::NotFound(m) => write!(f, "not found: {m}"),
            EodError::InvalidArgument(m) => write!(f, "invalid argument: {m}"),
            EodError::Internal(m) => write!(f, "internal error: {m}"),
        }
    }
}

impl std::error::Error for EodError {}

impl From<UpstreamError> for EodError {
    fn from(e: UpstreamError) -> Self {
        match e {
            UpstreamError::Timeout => EodError::UpstreamTimeout,
            UpstreamError::RateLimited | UpstreamError::Throttled => EodError::UpstreamRateLimited,
            UpstreamError::Http { status: 404, .. } => {
                EodError::NotFound("account unknown upstream".to_string())
            }
            other => EodError::UpstreamUnavailable(other.to_string()),
        }
    }
}
