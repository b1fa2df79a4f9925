//! Day-over-day reconciliation and position diffing. Pure computation; the
//! daemon loads positions and decides what to do with the verdicts.

pub mod diff;
pub mod engine;
pub mod types;

pub use diff::compute_position_diff;
pub use engine::reconcile;
pub use types::{
    Anomaly, AnomalyKind, DiffKind, DiffReport, PositionDelta, ReconPosition, ReconcileReport,
    ReconcileStatus, ReconcileThresholds, Severity,
};
