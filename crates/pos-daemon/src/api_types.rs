//! Request / response DTOs for the operator API.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use pos_schemas::{EodStatusRecord, RawPosition, StoredPosition};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
    pub config_hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEodRequest {
    pub account_id: String,
    pub business_date: NaiveDate,
    /// Run through the late-EOD window checks instead of the standard path.
    #[serde(default)]
    pub late: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EodResultResponse {
    pub account_id: String,
    pub business_date: NaiveDate,
    pub outcome: String,
    pub position_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAllRequest {
    /// Explicit set; when empty, every known account runs.
    #[serde(default)]
    pub account_ids: Vec<String>,
    pub business_date: NaiveDate,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAllAccepted {
    pub business_date: NaiveDate,
    pub accounts: usize,
    /// Poll `/v1/eod/progress?businessDate=…` for the run state.
    pub progress_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EodStatusResponse {
    pub status: EodStatusRecord,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EodHistoryResponse {
    pub account_id: String,
    pub history: Vec<EodStatusRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRequest {
    pub account_id: String,
    pub business_date: NaiveDate,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResponse {
    pub account_id: String,
    pub business_date: NaiveDate,
    pub rolled_back: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequest {
    pub account_id: String,
    pub business_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub account_id: String,
    pub client_id: String,
    pub business_date: NaiveDate,
    pub positions: Vec<RawPosition>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub account_id: String,
    pub business_date: NaiveDate,
    pub loaded: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustRequest {
    pub account_id: String,
    pub business_date: NaiveDate,
    pub product_id: String,
    #[serde(default = "default_position_type")]
    pub position_type: String,
    pub quantity: String,
    pub price: String,
    pub currency: String,
    /// INTRADAY (default) or MANUAL_UPLOAD.
    #[serde(default)]
    pub source: Option<String>,
}

fn default_position_type() -> String {
    "SETTLED".to_string()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsResponse {
    pub account_id: String,
    pub business_date: NaiveDate,
    pub positions: Vec<StoredPosition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayRequest {
    pub topic: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayResponse {
    pub topic: String,
    pub replayed: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}
