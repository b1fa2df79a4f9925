//! Snapshot validation, normalization and duplicate detection.
//!
//! Three layers, strictly ordered:
//! - `normalizer` — decimal strings → integer micros, structural checks.
//! - `rules` — per-position, cross-position and day-over-day rules.
//! - `hash` — canonical content hash for idempotent EOD replays.

pub mod hash;
pub mod normalizer;
pub mod rules;

pub use hash::{content_hash, SnapshotDigest};
pub use normalizer::{decimal_to_micros, micros_to_plain, mul_micros, NormalizedPosition, NormalizeError};
pub use rules::{
    validate_snapshot, RuleCode, RuleViolation, Severity, ValidationConfig, ValidationOutcome,
    ValidationReport,
};
