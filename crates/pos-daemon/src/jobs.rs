//! Background jobs: holiday refresh, scheduled reconciliation, weekly
//! archive purge. The recon and purge jobs are cluster singletons behind
//! the Postgres scheduler lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use pos_calendar::{spawn_job, Schedule, SchedulerLock};
use pos_reconcile::{reconcile, ReconPosition, ReconcileStatus, ReconcileThresholds};
use pos_store::PgSchedulerLock;

use crate::state::AppState;

const HOLIDAY_REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub fn spawn_all(state: Arc<AppState>) -> Vec<JoinHandle<()>> {
    let lock: Arc<dyn SchedulerLock> = Arc::new(PgSchedulerLock::new(state.pool.clone()));

    let holidays = spawn_holiday_refresh(Arc::clone(&state));

    let recon_state = Arc::clone(&state);
    let recon = spawn_job(
        "daily-reconciliation",
        Schedule::daily_recon(),
        Arc::clone(&lock),
        move || {
            let st = Arc::clone(&recon_state);
            async move { run_reconciliation_sweep(&st).await.map_err(|e| format!("{e:#}")) }
        },
    );

    let purge_state = Arc::clone(&state);
    let purge = spawn_job(
        "weekly-archive-purge",
        Schedule::weekly_purge(),
        lock,
        move || {
            let st = Arc::clone(&purge_state);
            async move { run_archive_purge(&st).await.map_err(|e| format!("{e:#}")) }
        },
    );

    vec![holidays, recon, purge]
}

/// Load the holiday set now and then once a day.
fn spawn_holiday_refresh(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HOLIDAY_REFRESH_INTERVAL);
        loop {
            ticker.tick().await;
            match pos_store::load_holidays(&state.pool).await {
                Ok(holidays) => {
                    info!(count = holidays.len(), "holiday set refreshed");
                    state.calendar.replace_holidays(holidays);
                }
                Err(e) => warn!(error = %e, "holiday refresh failed; keeping previous set"),
            }
        }
    })
}

/// Reconcile every known account for today's date and alert on anomalies.
/// Also triggered on demand via the `recon/run-all` endpoint.
pub async fn run_reconciliation_sweep(state: &AppState) -> anyhow::Result<()> {
    let today = Utc::now().date_naive();
    if !state.calendar.is_business_day(today) {
        info!(%today, "reconciliation sweep skipped on non-business day");
        return Ok(());
    }

    let accounts = pos_store::list_accounts(&state.pool).await?;
    let prev = state.calendar.previous_business_day(today);
    let mut anomalies = 0usize;

    for (account_id, _client) in accounts {
        let current = pos_store::get_positions_by_date(&state.pool, &account_id, today).await?;
        let previous = pos_store::get_positions_by_date(&state.pool, &account_id, prev).await?;
        let current: Vec<ReconPosition> = current.iter().map(ReconPosition::from).collect();
        let previous: Vec<ReconPosition> = previous.iter().map(ReconPosition::from).collect();

        let report = reconcile(
            &account_id,
            today,
            &current,
            &previous,
            &ReconcileThresholds::default(),
        );
        if report.status != ReconcileStatus::Ok {
            anomalies += 1;
            let level = match report.status {
                ReconcileStatus::Critical => pos_schemas::AlertLevel::Critical,
                _ => pos_schemas::AlertLevel::Warning,
            };
            state
                .publisher
                .publish_alert(&pos_schemas::Alert {
                    level,
                    source: "reconciliation".to_string(),
                    alert_type: "RECON_ANOMALY".to_string(),
                    message: format!(
                        "scheduled reconciliation found {} anomalies",
                        report.anomalies.len()
                    ),
                    entity_id: Some(account_id.clone()),
                    ts_utc: Utc::now(),
                })
                .await;
        }
    }

    info!(anomalies, "reconciliation sweep finished");
    Ok(())
}

/// Purge terminal ROLLED_BACK batches and trim archived history.
async fn run_archive_purge(state: &AppState) -> anyhow::Result<()> {
    let purged =
        pos_store::purge_rolled_back(&state.pool, state.config.retention.purge_after_days as i64)
            .await?;

    let mut trimmed = 0u64;
    for (account_id, _client) in pos_store::list_accounts(&state.pool).await? {
        trimmed += pos_store::cleanup_batches(
            &state.pool,
            &account_id,
            state.config.retention.keep_archived_batches as i64,
        )
        .await?;
    }

    info!(purged, trimmed, "archive purge finished");
    Ok(())
}
