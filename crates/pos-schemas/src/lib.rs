use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Micros scale (1e-6) used for all quantity / price / market-value fields.
pub const MICROS_SCALE: i64 = 1_000_000;

// ---------------------------------------------------------------------------
// Snapshot wire types (upstream Portfolio Manager response)
// ---------------------------------------------------------------------------

/// Availability of an upstream snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotStatus {
    Available,
    Unavailable,
    StaleCache,
    Error,
}

impl SnapshotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotStatus::Available => "AVAILABLE",
            SnapshotStatus::Unavailable => "UNAVAILABLE",
            SnapshotStatus::StaleCache => "STALE_CACHE",
            SnapshotStatus::Error => "ERROR",
        }
    }
}

/// A position exactly as the upstream returns it.
///
/// Quantity / price / market value are decimal strings so normalization to
/// integer micros happens deterministically on our side, never upstream of a
/// float round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPosition {
    pub product_id: String,
    /// Settled vs traded bucket; upstream omits it for single-bucket feeds.
    #[serde(default = "default_position_type")]
    pub position_type: String,
    pub quantity: String,
    pub price: Option<String>,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_currency: Option<String>,
}

fn default_position_type() -> String {
    "SETTLED".to_string()
}

/// The authoritative per-account snapshot pulled from the Portfolio Manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub account_id: String,
    pub client_id: String,
    pub business_date: NaiveDate,
    pub status: SnapshotStatus,
    #[serde(default)]
    pub positions: Vec<RawPosition>,
}

impl Snapshot {
    /// An `UNAVAILABLE` snapshot with no positions, used as the terminal
    /// fallback when neither the upstream nor the stale cache can serve.
    pub fn unavailable(account_id: &str, business_date: NaiveDate) -> Self {
        Snapshot {
            account_id: account_id.to_string(),
            client_id: String::new(),
            business_date,
            status: SnapshotStatus::Unavailable,
            positions: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Store-facing enums
// ---------------------------------------------------------------------------

/// Where a stored position row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSource {
    MspmEod,
    Intraday,
    ManualUpload,
    Upload,
}

impl PositionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSource::MspmEod => "MSPM_EOD",
            PositionSource::Intraday => "INTRADAY",
            PositionSource::ManualUpload => "MANUAL_UPLOAD",
            PositionSource::Upload => "UPLOAD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MSPM_EOD" => Some(PositionSource::MspmEod),
            "INTRADAY" => Some(PositionSource::Intraday),
            "MANUAL_UPLOAD" => Some(PositionSource::ManualUpload),
            "UPLOAD" => Some(PositionSource::Upload),
            _ => None,
        }
    }
}

/// Batch lifecycle: STAGING → ACTIVE → ARCHIVED, with ROLLED_BACK terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Staging,
    Active,
    Archived,
    RolledBack,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Staging => "STAGING",
            BatchStatus::Active => "ACTIVE",
            BatchStatus::Archived => "ARCHIVED",
            BatchStatus::RolledBack => "ROLLED_BACK",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STAGING" => Some(BatchStatus::Staging),
            "ACTIVE" => Some(BatchStatus::Active),
            "ARCHIVED" => Some(BatchStatus::Archived),
            "ROLLED_BACK" => Some(BatchStatus::RolledBack),
            _ => None,
        }
    }
}

/// Per (account, business date) end-of-day processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EodState {
    NotStarted,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl EodState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EodState::NotStarted => "NOT_STARTED",
            EodState::InProgress => "IN_PROGRESS",
            EodState::Completed => "COMPLETED",
            EodState::Failed => "FAILED",
            EodState::Skipped => "SKIPPED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NOT_STARTED" => Some(EodState::NotStarted),
            "IN_PROGRESS" => Some(EodState::InProgress),
            "COMPLETED" => Some(EodState::Completed),
            "FAILED" => Some(EodState::Failed),
            "SKIPPED" => Some(EodState::Skipped),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Store records shared across crates
// ---------------------------------------------------------------------------

/// A batch row: one version of an account's positions for a business date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub account_id: String,
    pub batch_id: i64,
    pub business_date: NaiveDate,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub position_count: i64,
}

/// A bitemporal position row. `system_to` is `None` while the row is in
/// force; closing a row sets it to the close instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPosition {
    pub account_id: String,
    pub product_id: String,
    pub position_type: String,
    pub business_date: NaiveDate,
    pub batch_id: i64,
    pub quantity_micros: i64,
    pub price_micros: i64,
    pub currency: String,
    pub market_value_micros: i64,
    pub source: PositionSource,
    pub system_from: DateTime<Utc>,
    pub system_to: Option<DateTime<Utc>>,
}

/// Per (account, business date) EOD status row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EodStatusRecord {
    pub account_id: String,
    pub business_date: NaiveDate,
    pub state: EodState,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub position_count: i64,
    pub last_error: Option<String>,
}

impl EodStatusRecord {
    pub fn not_started(account_id: &str, business_date: NaiveDate) -> Self {
        EodStatusRecord {
            account_id: account_id.to_string(),
            business_date,
            state: EodState::NotStarted,
            started_at: None,
            completed_at: None,
            position_count: 0,
            last_error: None,
        }
    }
}

/// Stored content hash of the last accepted snapshot for
/// (account, business date); the duplicate-detection anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHashRecord {
    pub account_id: String,
    pub business_date: NaiveDate,
    pub content_hash: String,
    pub position_count: i64,
    pub total_quantity_micros: i64,
    pub total_market_value_micros: i64,
    pub stored_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Outbound events
// ---------------------------------------------------------------------------

/// What caused a position-change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeEventType {
    EodComplete,
    IntradayUpdate,
    ManualUpload,
}

impl ChangeEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeEventType::EodComplete => "EOD_COMPLETE",
            ChangeEventType::IntradayUpdate => "INTRADAY_UPDATE",
            ChangeEventType::ManualUpload => "MANUAL_UPLOAD",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionChange {
    pub event_type: ChangeEventType,
    pub account_id: String,
    pub client_id: String,
    pub business_date: NaiveDate,
    pub position_count: i64,
    pub ts_utc: DateTime<Utc>,
}

/// Emitted once per client per business date, when the last of the client's
/// accounts reaches COMPLETED. `account_count` is the real completed count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSignOff {
    pub client_id: String,
    pub business_date: NaiveDate,
    pub account_count: i64,
    pub ts_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
    Page,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Critical => "CRITICAL",
            AlertLevel::Page => "PAGE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub level: AlertLevel,
    pub source: String,
    pub alert_type: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub ts_utc: DateTime<Utc>,
}

/// Envelope wrapped around every outbound bus record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub event_id: Uuid,
    pub ts_utc: DateTime<Utc>,
    pub topic: String,
    pub event_type: String,
    /// Partition key — account or client id, preserving per-entity ordering.
    pub key: String,
    pub payload: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_status_round_trips_wire_names() {
        let s: SnapshotStatus = serde_json::from_str("\"STALE_CACHE\"").unwrap();
        assert_eq!(s, SnapshotStatus::StaleCache);
        assert_eq!(serde_json::to_string(&s).unwrap(), "\"STALE_CACHE\"");
    }

    #[test]
    fn raw_position_defaults_position_type() {
        let p: RawPosition = serde_json::from_str(
            r#"{"productId":"P1","quantity":"100","price":"1.5","currency":"USD"}"#,
        )
        .unwrap();
        assert_eq!(p.position_type, "SETTLED");
        assert_eq!(p.price.as_deref(), Some("1.5"));
    }

    #[test]
    fn batch_status_parse_rejects_unknown() {
        assert_eq!(BatchStatus::parse("ACTIVE"), Some(BatchStatus::Active));
        assert_eq!(BatchStatus::parse("active"), None);
    }
}
