//! Typed view of the merged configuration document.
//!
//! Every field has a serde default matching production, so a partial (or
//! empty) document is always usable. Unknown keys are left in place — the
//! canonical hash covers them even when no section reads them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub orchestrator: OrchestratorSection,
    pub validation: ValidationSection,
    pub upstream: UpstreamSection,
    pub upload: UploadSection,
    pub retention: RetentionSection,
    /// How far in the past a late EOD trigger may reach, in days.
    pub late_eod_max_days: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            orchestrator: OrchestratorSection::default(),
            validation: ValidationSection::default(),
            upstream: UpstreamSection::default(),
            upload: UploadSection::default(),
            retention: RetentionSection::default(),
            late_eod_max_days: 5,
        }
    }
}

impl LoaderConfig {
    pub fn production_defaults() -> Self {
        Self::default()
    }
}

// Serde quirk: `#[serde(default)]` on the struct uses `Default`, so the
// numeric defaults live in the Default impls below.

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub max_concurrency: usize,
    pub per_account_timeout_secs: u64,
    pub orchestrator_timeout_secs: u64,
    pub retry_failed: bool,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        OrchestratorSection {
            max_concurrency: 50,
            per_account_timeout_secs: 120,
            orchestrator_timeout_secs: 30 * 60,
            retry_failed: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSection {
    pub strict: bool,
    pub zero_price_threshold_pct: u32,
    pub max_quantity_jump_pct: u32,
}

impl Default for ValidationSection {
    fn default() -> Self {
        ValidationSection {
            strict: true,
            zero_price_threshold_pct: 10,
            max_quantity_jump_pct: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSection {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub circuit_breaker: CircuitBreakerSection,
    pub retry: RetrySection,
    pub bulkhead: BulkheadSection,
    pub rate_limit: RateLimitSection,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        UpstreamSection {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_secs: 10,
            circuit_breaker: CircuitBreakerSection::default(),
            retry: RetrySection::default(),
            bulkhead: BulkheadSection::default(),
            rate_limit: RateLimitSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSection {
    /// Failure-rate threshold in percent over the sliding window.
    pub failure_rate_pct: u32,
    /// Calls required before the rate is evaluated.
    pub min_calls: usize,
    /// How long the breaker stays OPEN before probing.
    pub open_duration_secs: u64,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        CircuitBreakerSection {
            failure_rate_pct: 50,
            min_calls: 10,
            open_duration_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        RetrySection {
            max_attempts: 3,
            base_backoff_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadSection {
    pub max_concurrent: usize,
}

impl Default for BulkheadSection {
    fn default() -> Self {
        BulkheadSection { max_concurrent: 25 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    /// Tokens added per second.
    pub rate_per_sec: u32,
    /// Bucket capacity.
    pub burst: u32,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        RateLimitSection {
            rate_per_sec: 100,
            burst: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    pub max_upload_positions: usize,
    pub max_file_size_mb: u64,
    pub max_accounts_per_batch: usize,
}

impl Default for UploadSection {
    fn default() -> Self {
        UploadSection {
            max_upload_positions: 50_000,
            max_file_size_mb: 16,
            max_accounts_per_batch: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSection {
    /// ARCHIVED batches kept per account beyond the ACTIVE one.
    pub keep_archived_batches: u32,
    pub archive_retention_days: u32,
    /// ROLLED_BACK rows older than this are purged by the weekly job.
    pub purge_after_days: u32,
}

impl Default for RetentionSection {
    fn default() -> Self {
        RetentionSection {
            keep_archived_batches: 3,
            archive_retention_days: 30,
            purge_after_days: 90,
        }
    }
}
