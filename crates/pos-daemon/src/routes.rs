//! Axum router and all HTTP handlers for pos-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and
//! attaches middleware layers. Handlers are `pub(crate)` so in-process
//! tests can compose the bare router.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;

use pos_eod::{CancelFlag, EodError, EodOutcome};
use pos_events::{TOPIC_CLIENT_SIGNOFF, TOPIC_POSITION_CHANGE, TOPIC_SYSTEM_ALERTS};
use pos_reconcile::{compute_position_diff, reconcile, ReconPosition, ReconcileThresholds};
use pos_schemas::{PositionSource, Snapshot, SnapshotStatus};

use crate::api_types::*;
use crate::state::AppState;
use crate::upload::{parse_csv_positions, UploadGuards};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/eod/run", post(eod_run))
        .route("/v1/eod/run-all", post(eod_run_all))
        .route("/v1/eod/status", get(eod_status))
        .route("/v1/eod/history", get(eod_history))
        .route("/v1/eod/progress", get(eod_progress))
        .route("/v1/eod/rollback", post(eod_rollback))
        .route("/v1/eod/reset", post(eod_reset))
        .route("/v1/positions", get(positions_get))
        .route("/v1/positions/upload", post(positions_upload))
        .route("/v1/positions/upload-csv", post(positions_upload_csv))
        .route("/v1/positions/adjust", post(positions_adjust))
        .route("/v1/recon/run", post(recon_run))
        .route("/v1/recon/run-all", post(recon_run_all))
        .route("/v1/recon/diff", get(recon_diff))
        .route("/v1/dlt/replay", post(dlt_replay))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn eod_error(e: EodError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &e {
        EodError::NotFound(_) => StatusCode::NOT_FOUND,
        EodError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        EodError::Validation(_) | EodError::BatchValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EodError::DuplicateSnapshot
        | EodError::ConcurrencyConflict(_)
        | EodError::Cancelled => StatusCode::CONFLICT,
        EodError::UpstreamUnavailable(_)
        | EodError::UpstreamTimeout
        | EodError::UpstreamRateLimited => StatusCode::BAD_GATEWAY,
        EodError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            code: e.code().to_string(),
        }),
    )
}

fn internal_error(e: anyhow::Error) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: format!("{e:#}"),
            code: "INTERNAL".to_string(),
        }),
    )
}

fn outcome_label(outcome: &EodOutcome) -> (String, Option<i64>) {
    match outcome {
        EodOutcome::Completed { position_count } => ("COMPLETED".to_string(), Some(*position_count)),
        EodOutcome::AlreadyCompleted => ("ALREADY_COMPLETED".to_string(), None),
        EodOutcome::Skipped(reason) => (format!("SKIPPED:{}", reason.as_str()), None),
    }
}

// ---------------------------------------------------------------------------
// Query shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountDateQuery {
    account_id: String,
    business_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HistoryQuery {
    account_id: String,
    #[serde(default = "default_history_limit")]
    limit: i64,
}

fn default_history_limit() -> i64 {
    30
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProgressQuery {
    business_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadCsvQuery {
    /// Optional when the file carries its own accountId column.
    account_id: Option<String>,
    client_id: String,
    business_date: NaiveDate,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
            config_hash: st.config_hash.clone(),
        }),
    )
}

pub(crate) async fn eod_run(
    State(st): State<Arc<AppState>>,
    Json(req): Json<TriggerEodRequest>,
) -> impl IntoResponse {
    let cancel = CancelFlag::new();
    let result = if req.late {
        st.engine
            .process_late_eod(&req.account_id, req.business_date, &cancel)
            .await
    } else {
        st.engine
            .process_eod(&req.account_id, req.business_date, &cancel)
            .await
    };

    match result {
        Ok(outcome) => {
            let (label, position_count) = outcome_label(&outcome);
            (
                StatusCode::OK,
                Json(EodResultResponse {
                    account_id: req.account_id,
                    business_date: req.business_date,
                    outcome: label,
                    position_count,
                }),
            )
                .into_response()
        }
        Err(e) => eod_error(e).into_response(),
    }
}

pub(crate) async fn eod_run_all(
    State(st): State<Arc<AppState>>,
    Json(req): Json<RunAllRequest>,
) -> impl IntoResponse {
    let accounts = if req.account_ids.is_empty() {
        match pos_store::list_accounts(&st.pool).await {
            Ok(rows) => rows.into_iter().map(|(a, _)| a).collect(),
            Err(e) => return internal_error(e).into_response(),
        }
    } else {
        req.account_ids
    };

    let count = accounts.len();
    info!(business_date = %req.business_date, accounts = count, "EOD run-all accepted");

    let orchestrator = Arc::clone(&st.orchestrator);
    let business_date = req.business_date;
    tokio::spawn(async move {
        orchestrator.process_all(accounts, business_date).await;
    });

    (
        StatusCode::ACCEPTED,
        Json(RunAllAccepted {
            business_date: req.business_date,
            accounts: count,
            progress_url: format!("/v1/eod/progress?businessDate={}", req.business_date),
        }),
    )
        .into_response()
}

pub(crate) async fn eod_status(
    State(st): State<Arc<AppState>>,
    Query(q): Query<AccountDateQuery>,
) -> impl IntoResponse {
    match pos_store::get_eod_status(&st.pool, &q.account_id, q.business_date).await {
        Ok(status) => (StatusCode::OK, Json(EodStatusResponse { status })).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

pub(crate) async fn eod_history(
    State(st): State<Arc<AppState>>,
    Query(q): Query<HistoryQuery>,
) -> impl IntoResponse {
    match pos_store::list_eod_history(&st.pool, &q.account_id, q.limit).await {
        Ok(history) => (
            StatusCode::OK,
            Json(EodHistoryResponse {
                account_id: q.account_id,
                history,
            }),
        )
            .into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

pub(crate) async fn eod_progress(
    State(st): State<Arc<AppState>>,
    Query(q): Query<ProgressQuery>,
) -> impl IntoResponse {
    match st.orchestrator.progress().snapshot(q.business_date) {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("no run recorded for {}", q.business_date),
                code: "NOT_FOUND".to_string(),
            }),
        )
            .into_response(),
    }
}

pub(crate) async fn eod_rollback(
    State(st): State<Arc<AppState>>,
    Json(req): Json<RollbackRequest>,
) -> impl IntoResponse {
    match st.engine.rollback_eod(&req.account_id, req.business_date).await {
        Ok(rolled_back) => (
            StatusCode::OK,
            Json(RollbackResponse {
                account_id: req.account_id,
                business_date: req.business_date,
                rolled_back,
            }),
        )
            .into_response(),
        Err(e) => eod_error(e).into_response(),
    }
}

pub(crate) async fn eod_reset(
    State(st): State<Arc<AppState>>,
    Json(req): Json<ResetRequest>,
) -> impl IntoResponse {
    match st.engine.reset_eod(&req.account_id, req.business_date).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "accountId": req.account_id,
                "businessDate": req.business_date,
                "reset": true,
            })),
        )
            .into_response(),
        Err(e) => eod_error(e).into_response(),
    }
}

pub(crate) async fn positions_get(
    State(st): State<Arc<AppState>>,
    Query(q): Query<AccountDateQuery>,
) -> impl IntoResponse {
    match pos_store::get_positions_by_date(&st.pool, &q.account_id, q.business_date).await {
        Ok(positions) => (
            StatusCode::OK,
            Json(PositionsResponse {
                account_id: q.account_id,
                business_date: q.business_date,
                positions,
            }),
        )
            .into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

fn upload_snapshot(account_id: &str, client_id: &str, business_date: NaiveDate, positions: Vec<pos_schemas::RawPosition>) -> Snapshot {
    Snapshot {
        account_id: account_id.to_string(),
        client_id: client_id.to_string(),
        business_date,
        status: SnapshotStatus::Available,
        positions,
    }
}

pub(crate) async fn positions_upload(
    State(st): State<Arc<AppState>>,
    Json(req): Json<UploadRequest>,
) -> impl IntoResponse {
    if req.positions.len() > st.config.upload.max_upload_positions {
        return eod_error(EodError::InvalidArgument(format!(
            "upload of {} positions exceeds the {}-position limit",
            req.positions.len(),
            st.config.upload.max_upload_positions
        )))
        .into_response();
    }

    let snapshot = upload_snapshot(&req.account_id, &req.client_id, req.business_date, req.positions);
    match st
        .engine
        .process_upload(&req.account_id, req.business_date, &snapshot, PositionSource::ManualUpload)
        .await
    {
        Ok(loaded) => (
            StatusCode::OK,
            Json(UploadResponse {
                account_id: req.account_id,
                business_date: req.business_date,
                loaded,
            }),
        )
            .into_response(),
        Err(e) => eod_error(e).into_response(),
    }
}

pub(crate) async fn positions_upload_csv(
    State(st): State<Arc<AppState>>,
    Query(q): Query<UploadCsvQuery>,
    body: String,
) -> impl IntoResponse {
    let guards = UploadGuards {
        max_positions: st.config.upload.max_upload_positions,
        max_bytes: (st.config.upload.max_file_size_mb as usize) << 20,
        max_accounts: st.config.upload.max_accounts_per_batch,
    };
    let book = match parse_csv_positions(&body, q.account_id.as_deref(), &guards) {
        Ok(b) => b,
        Err(e) => {
            return eod_error(EodError::InvalidArgument(format!("{e:#}"))).into_response()
        }
    };

    let mut results = Vec::with_capacity(book.len());
    for (account_id, positions) in book {
        let snapshot = upload_snapshot(&account_id, &q.client_id, q.business_date, positions);
        match st
            .engine
            .process_upload(&account_id, q.business_date, &snapshot, PositionSource::Upload)
            .await
        {
            Ok(loaded) => results.push(UploadResponse {
                account_id,
                business_date: q.business_date,
                loaded,
            }),
            Err(e) => return eod_error(e).into_response(),
        }
    }

    (StatusCode::OK, Json(results)).into_response()
}

pub(crate) async fn positions_adjust(
    State(st): State<Arc<AppState>>,
    Json(req): Json<AdjustRequest>,
) -> impl IntoResponse {
    let quantity = match pos_validate::decimal_to_micros(&req.quantity, "quantity") {
        Ok(v) => v,
        Err(e) => return eod_error(EodError::InvalidArgument(e.to_string())).into_response(),
    };
    let price = match pos_validate::decimal_to_micros(&req.price, "price") {
        Ok(v) => v,
        Err(e) => return eod_error(EodError::InvalidArgument(e.to_string())).into_response(),
    };
    let source = match req.source.as_deref() {
        None | Some("INTRADAY") => PositionSource::Intraday,
        Some("MANUAL_UPLOAD") => PositionSource::ManualUpload,
        Some(other) => {
            return eod_error(EodError::InvalidArgument(format!(
                "unsupported adjustment source '{other}'"
            )))
            .into_response()
        }
    };

    match st
        .engine
        .adjust_position(
            &req.account_id,
            req.business_date,
            &req.product_id,
            &req.position_type,
            quantity,
            price,
            &req.currency,
            source,
        )
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "accountId": req.account_id,
                "productId": req.product_id,
                "adjusted": true,
            })),
        )
            .into_response(),
        Err(e) => eod_error(e).into_response(),
    }
}

async fn load_recon_inputs(
    st: &AppState,
    account_id: &str,
    business_date: NaiveDate,
) -> anyhow::Result<(Vec<ReconPosition>, Vec<ReconPosition>)> {
    let current = pos_store::get_positions_by_date(&st.pool, account_id, business_date).await?;
    let prev_date = st.calendar.previous_business_day(business_date);
    let previous = pos_store::get_positions_by_date(&st.pool, account_id, prev_date).await?;
    Ok((
        current.iter().map(ReconPosition::from).collect(),
        previous.iter().map(ReconPosition::from).collect(),
    ))
}

pub(crate) async fn recon_run(
    State(st): State<Arc<AppState>>,
    Json(q): Json<AccountDateQuery>,
) -> impl IntoResponse {
    let (current, previous) = match load_recon_inputs(&st, &q.account_id, q.business_date).await {
        Ok(v) => v,
        Err(e) => return internal_error(e).into_response(),
    };

    let report = reconcile(
        &q.account_id,
        q.business_date,
        &current,
        &previous,
        &ReconcileThresholds::default(),
    );

    if report.status != pos_reconcile::ReconcileStatus::Ok {
        let level = match report.status {
            pos_reconcile::ReconcileStatus::Critical => pos_schemas::AlertLevel::Critical,
            _ => pos_schemas::AlertLevel::Warning,
        };
        st.publisher
            .publish_alert(&pos_schemas::Alert {
                level,
                source: "reconciliation".to_string(),
                alert_type: "RECON_ANOMALY".to_string(),
                message: format!(
                    "reconciliation for {} on {} found {} anomalies",
                    q.account_id,
                    q.business_date,
                    report.anomalies.len()
                ),
                entity_id: Some(q.account_id.clone()),
                ts_utc: chrono::Utc::now(),
            })
            .await;
    }

    (StatusCode::OK, Json(report)).into_response()
}

pub(crate) async fn recon_run_all(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    match crate::jobs::run_reconciliation_sweep(&st).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"sweep": "finished"}))).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

pub(crate) async fn recon_diff(
    State(st): State<Arc<AppState>>,
    Query(q): Query<AccountDateQuery>,
) -> impl IntoResponse {
    let (current, previous) = match load_recon_inputs(&st, &q.account_id, q.business_date).await {
        Ok(v) => v,
        Err(e) => return internal_error(e).into_response(),
    };
    let diff = compute_position_diff(&current, &previous);
    (StatusCode::OK, Json(diff)).into_response()
}

pub(crate) async fn dlt_replay(
    State(st): State<Arc<AppState>>,
    Json(req): Json<ReplayRequest>,
) -> impl IntoResponse {
    let known = [
        TOPIC_POSITION_CHANGE,
        TOPIC_CLIENT_SIGNOFF,
        TOPIC_SYSTEM_ALERTS,
    ];
    if !known.contains(&req.topic.as_str()) {
        return eod_error(EodError::InvalidArgument(format!(
            "unknown topic '{}'",
            req.topic
        )))
        .into_response();
    }

    match pos_events::replay(st.bus.as_ref(), &req.topic).await {
        Ok(replayed) => (
            StatusCode::OK,
            Json(ReplayResponse {
                topic: req.topic,
                replayed,
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse {
                error: e.to_string(),
                code: "BUS_ERROR".to_string(),
            }),
        )
            .into_response(),
    }
}
