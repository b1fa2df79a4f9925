//! The per-account EOD engine: idempotent, transactional end-of-day loads,
//! late EOD, rollback, reset, uploads and intraday adjustments.

pub mod engine;
pub mod error;
pub mod ports;

pub use engine::{EodEngine, EodEngineConfig, EodOutcome, SkipReason};
pub use error::EodError;
pub use ports::{CancelFlag, PositionStore, StagedPosition};
