use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use pos_schemas::StoredPosition;

/// Minimal position shape for reconciliation. Only fields that can cause a
/// day-over-day anomaly are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconPosition {
    pub product_id: String,
    pub position_type: String,
    pub quantity_micros: i64,
    pub price_micros: i64,
    pub market_value_micros: i64,
}

impl ReconPosition {
    pub fn new(
        product_id: impl Into<String>,
        quantity_micros: i64,
        price_micros: i64,
        market_value_micros: i64,
    ) -> Self {
        ReconPosition {
            product_id: product_id.into(),
            position_type: "SETTLED".to_string(),
            quantity_micros,
            price_micros,
            market_value_micros,
        }
    }
}

impl From<&StoredPosition> for ReconPosition {
    fn from(p: &StoredPosition) -> Self {
        ReconPosition {
            product_id: p.product_id.clone(),
            position_type: p.position_type.clone(),
            quantity_micros: p.quantity_micros,
            price_micros: p.price_micros,
            market_value_micros: p.market_value_micros,
        }
    }
}

/// Per-product day-over-day classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiffKind {
    New,
    Closed,
    Increased,
    Decreased,
    Unchanged,
    PriceOnly,
}

/// One product's day-over-day delta.
///
/// `value_change_bps` is the market-value change in basis points of the
/// previous value; `None` for NEW and CLOSED where no base exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionDelta {
    pub product_id: String,
    pub position_type: String,
    pub kind: DiffKind,
    pub quantity_before_micros: i64,
    pub quantity_after_micros: i64,
    pub value_before_micros: i64,
    pub value_after_micros: i64,
    pub value_change_bps: Option<i64>,
}

/// Pure position diff: classification counts plus per-product deltas sorted
/// by absolute percent change descending (NEW/CLOSED first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DiffReport {
    pub new_count: u32,
    pub closed_count: u32,
    pub increased_count: u32,
    pub decreased_count: u32,
    pub unchanged_count: u32,
    pub price_only_count: u32,
    pub deltas: Vec<PositionDelta>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyKind {
    ValueChange,
    CountChange,
    MissingData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub message: String,
}

/// Overall verdict: worst anomaly severity, or OK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileStatus {
    Ok,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub account_id: String,
    pub business_date: NaiveDate,
    pub status: ReconcileStatus,
    pub anomalies: Vec<Anomaly>,
    /// Total market-value change in basis points of yesterday's total.
    pub total_value_change_bps: Option<i64>,
    /// Position-count change in basis points of yesterday's count.
    pub position_count_change_bps: Option<i64>,
    pub diff: DiffReport,
}

/// Anomaly thresholds in whole percent. Defaults match production.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileThresholds {
    pub value_warn_pct: u32,
    pub value_crit_pct: u32,
    pub count_warn_pct: u32,
    pub count_crit_pct: u32,
}

impl Default for ReconcileThresholds {
    fn default() -> Self {
        ReconcileThresholds {
            value_warn_pct: 20,
            value_crit_pct: 50,
            count_warn_pct: 30,
            count_crit_pct: 50,
        }
    }
}
