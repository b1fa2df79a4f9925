//! Per-account EOD pipeline.
//!
//! Strictly sequential inside one account:
//! business-day gate → idempotency gate → fetch → validate → duplicate
//! gate → stage → pre-activation checks → atomic activate → hash store →
//! events → sign-off. Any failure lands in a FAILED status row plus an
//! alert whose severity escalates with the account's consecutive-failure
//! streak.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use pos_calendar::HolidayCalendar;
use pos_events::EventPublisher;
use pos_schemas::{
    Alert, AlertLevel, ChangeEventType, ClientSignOff, EodState, PositionChange, PositionSource,
    Snapshot, SnapshotHashRecord, SnapshotStatus, StoredPosition,
};
use pos_upstream::SnapshotSource;
use pos_validate::{content_hash, validate_snapshot, NormalizedPosition, RuleCode, ValidationConfig};

use crate::error::EodError;
use crate::ports::{CancelFlag, PositionStore, StagedPosition};

// ---------------------------------------------------------------------------
// Configuration & outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EodEngineConfig {
    pub validation: ValidationConfig,
    /// How far back a late EOD may reach, in days.
    pub late_eod_max_days: u32,
}

impl Default for EodEngineConfig {
    fn default() -> Self {
        EodEngineConfig {
            validation: ValidationConfig::default(),
            late_eod_max_days: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NonBusinessDay,
    Duplicate,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NonBusinessDay => "NON_BUSINESS_DAY",
            SkipReason::Duplicate => "DUPLICATE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EodOutcome {
    Completed { position_count: i64 },
    AlreadyCompleted,
    Skipped(SkipReason),
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct EodEngine {
    store: Arc<dyn PositionStore>,
    upstream: Arc<dyn SnapshotSource>,
    publisher: Arc<EventPublisher>,
    calendar: Arc<HolidayCalendar>,
    cfg: EodEngineConfig,
    /// Consecutive EOD failures per account; drives alert escalation.
    failure_streaks: Mutex<HashMap<String, u32>>,
}

impl EodEngine {
    pub fn new(
        store: Arc<dyn PositionStore>,
        upstream: Arc<dyn SnapshotSource>,
        publisher: Arc<EventPublisher>,
        calendar: Arc<HolidayCalendar>,
        cfg: EodEngineConfig,
    ) -> Self {
        EodEngine {
            store,
            upstream,
            publisher,
            calendar,
            cfg,
            failure_streaks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn PositionStore> {
        &self.store
    }

    /// Standard end-of-day load for one account. Idempotent: a COMPLETED
    /// status row is a fixed point until an operator reset.
    pub async fn process_eod(
        &self,
        account_id: &str,
        business_date: NaiveDate,
        cancel: &CancelFlag,
    ) -> Result<EodOutcome, EodError> {
        if !self.calendar.is_business_day(business_date) {
            self.store
                .mark_skipped(account_id, business_date, SkipReason::NonBusinessDay.as_str())
                .await?;
            return Ok(EodOutcome::Skipped(SkipReason::NonBusinessDay));
        }

        let status = self.store.get_eod_status(account_id, business_date).await?;
        if status.state == EodState::Completed {
            info!(account_id, %business_date, "EOD already COMPLETED; no-op");
            return Ok(EodOutcome::AlreadyCompleted);
        }

        self.store.mark_in_progress(account_id, business_date).await?;

        match self.run_pipeline(account_id, business_date, cancel).await {
            Ok(outcome) => {
                self.clear_streak(account_id);
                Ok(outcome)
            }
            Err(e) => {
                self.store
                    .mark_failed(account_id, business_date, &format!("{}: {e}", e.code()))
                    .await?;
                self.alert_failure(account_id, &e).await;
                Err(e)
            }
        }
    }

    /// Late EOD: identical pipeline for a past business date inside the
    /// configured window. A COMPLETED row must be reset first.
    pub async fn process_late_eod(
        &self,
        account_id: &str,
        business_date: NaiveDate,
        cancel: &CancelFlag,
    ) -> Result<EodOutcome, EodError> {
        let today = Utc::now().date_naive();
        let age = (today - business_date).num_days();
        if age < 0 {
            return Err(EodError::InvalidArgument(format!(
                "business date {business_date} is in the future"
            )));
        }
        if age > self.cfg.late_eod_max_days as i64 {
            return Err(EodError::InvalidArgument(format!(
                "business date {business_date} is older than the {}-day late-EOD window",
                self.cfg.late_eod_max_days
            )));
        }
        let status = self.store.get_eod_status(account_id, business_date).await?;
        if status.state == EodState::Completed {
            return Err(EodError::InvalidArgument(format!(
                "EOD for {account_id}/{business_date} is COMPLETED; reset it before a late run"
            )));
        }
        self.process_eod(account_id, business_date, cancel).await
    }

    async fn run_pipeline(
        &self,
        account_id: &str,
        business_date: NaiveDate,
        cancel: &CancelFlag,
    ) -> Result<EodOutcome, EodError> {
        cancel.checkpoint()?;

        // Fetch. Degraded statuses are values, but EOD cannot load them.
        let snapshot = self.upstream.fetch_snapshot(account_id, business_date).await?;
        match snapshot.status {
            SnapshotStatus::Available => {}
            SnapshotStatus::StaleCache | SnapshotStatus::Unavailable | SnapshotStatus::Error => {
                return Err(EodError::UpstreamUnavailable(format!(
                    "snapshot status {}",
                    snapshot.status.as_str()
                )));
            }
        }

        cancel.checkpoint()?;

        // Validate against yesterday's accepted book when we have one.
        let prior = self.prior_positions(account_id, business_date).await?;
        let outcome = validate_snapshot(&snapshot, prior.as_deref(), &self.cfg.validation);

        if outcome.report.has_code(RuleCode::PriceServiceDown) {
            self.publisher
                .publish_alert(&Alert {
                    level: AlertLevel::Critical,
                    source: "eod-engine".to_string(),
                    alert_type: "PRICE_SERVICE_DOWN".to_string(),
                    message: "zero-price ratio exceeded threshold; pricing upstream suspect"
                        .to_string(),
                    entity_id: Some(account_id.to_string()),
                    ts_utc: Utc::now(),
                })
                .await;
        }
        if outcome.report.fatal(self.cfg.validation.strict) {
            let first = outcome
                .report
                .errors
                .first()
                .map(|v| format!("{}: {}", v.code.as_str(), v.message))
                .unwrap_or_else(|| "validation failed".to_string());
            return Err(EodError::Validation(first));
        }
        for v in &outcome.report.errors {
            warn!(account_id, code = v.code.as_str(), message = %v.message, "validation error (lenient mode)");
        }

        // Duplicate gate: same content hash ⇒ nothing to write.
        let (hash, digest) = content_hash(&outcome.positions);
        if let Some(stored) = self.store.get_snapshot_hash(account_id, business_date).await? {
            if stored.content_hash == hash {
                info!(account_id, %business_date, "duplicate snapshot; skipping");
                self.store
                    .mark_skipped(account_id, business_date, SkipReason::Duplicate.as_str())
                    .await?;
                return Ok(EodOutcome::Skipped(SkipReason::Duplicate));
            }
        }

        cancel.checkpoint()?;

        // Reference data first so staged rows satisfy their foreign keys.
        self.store.upsert_reference_data(&snapshot).await?;

        let staged: Vec<StagedPosition> = outcome.positions.iter().map(StagedPosition::from).collect();
        let batch_id = self.store.create_batch(account_id, business_date).await?;
        self.store
            .insert_positions(
                account_id,
                batch_id,
                business_date,
                &staged,
                PositionSource::MspmEod,
            )
            .await?;

        // Pre-activation validation; a mismatch leaves the batch in STAGING
        // for garbage collection.
        let landed = self.store.count_batch_positions(account_id, batch_id).await?;
        if landed != staged.len() as i64 {
            return Err(EodError::BatchValidation(format!(
                "staged {} rows but {} landed in batch {batch_id}",
                staged.len(),
                landed
            )));
        }
        if staged.iter().any(|p| p.product_id.trim().is_empty()) {
            return Err(EodError::BatchValidation(format!(
                "batch {batch_id} contains an empty product id"
            )));
        }

        cancel.checkpoint()?;

        // The single atomic swap point.
        self.store.activate_batch(account_id, batch_id).await?;

        self.store
            .put_snapshot_hash(&SnapshotHashRecord {
                account_id: account_id.to_string(),
                business_date,
                content_hash: hash,
                position_count: digest.position_count,
                total_quantity_micros: digest.total_quantity_micros,
                total_market_value_micros: digest.total_market_value_micros,
                stored_at: Utc::now(),
            })
            .await?;

        let position_count = staged.len() as i64;
        self.store
            .mark_completed(account_id, business_date, position_count)
            .await?;

        // Events after the commit, on the account key.
        self.publisher
            .publish_change(&PositionChange {
                event_type: ChangeEventType::EodComplete,
                account_id: account_id.to_string(),
                client_id: snapshot.client_id.clone(),
                business_date,
                position_count,
                ts_utc: Utc::now(),
            })
            .await;

        self.maybe_sign_off(&snapshot.client_id, business_date).await?;

        info!(account_id, %business_date, batch_id, position_count, "EOD completed");
        Ok(EodOutcome::Completed { position_count })
    }

    /// Publish the client sign-off when the last of its accounts completes.
    /// The count is the real completed count, never zero.
    async fn maybe_sign_off(&self, client_id: &str, business_date: NaiveDate) -> Result<(), EodError> {
        if client_id.is_empty() {
            return Ok(());
        }
        let total = self.store.client_account_count(client_id).await?;
        let done = self
            .store
            .count_completed_accounts(client_id, business_date)
            .await?;
        if total > 0 && done == total {
            self.publisher
                .publish_sign_off(&ClientSignOff {
                    client_id: client_id.to_string(),
                    business_date,
                    account_count: done,
                    ts_utc: Utc::now(),
                })
                .await;
        }
        Ok(())
    }

    async fn prior_positions(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<Option<Vec<NormalizedPosition>>, EodError> {
        let prev = self.calendar.previous_business_day(business_date);
        let rows = self.store.get_active_positions(account_id, prev).await?;
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(rows.iter().map(stored_to_normalized).collect()))
    }

    // -----------------------------------------------------------------------
    // Operator actions
    // -----------------------------------------------------------------------

    /// Roll the account back to the previous batch. Emits an `EOD_ROLLBACK`
    /// alert on success; no automatic data repair happens.
    pub async fn rollback_eod(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<bool, EodError> {
        let rolled = self.store.rollback_batch(account_id, business_date).await?;
        if rolled {
            self.publisher
                .publish_alert(&Alert {
                    level: AlertLevel::Warning,
                    source: "eod-engine".to_string(),
                    alert_type: "EOD_ROLLBACK".to_string(),
                    message: format!("positions rolled back to prior batch for {business_date}"),
                    entity_id: Some(account_id.to_string()),
                    ts_utc: Utc::now(),
                })
                .await;
        }
        Ok(rolled)
    }

    /// Clear the status row and content hash so the next trigger
    /// reprocesses. Positions are untouched.
    pub async fn reset_eod(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<(), EodError> {
        self.store.reset_eod_status(account_id, business_date).await?;
        self.clear_streak(account_id);
        Ok(())
    }

    /// Operator upload: validated positions replace the account's book via
    /// a fresh batch. EOD status is not touched — uploads are corrections,
    /// not EOD completions.
    pub async fn process_upload(
        &self,
        account_id: &str,
        business_date: NaiveDate,
        snapshot: &Snapshot,
        source: PositionSource,
    ) -> Result<i64, EodError> {
        if !matches!(source, PositionSource::ManualUpload | PositionSource::Upload) {
            return Err(EodError::InvalidArgument(format!(
                "upload source must be MANUAL_UPLOAD or UPLOAD, got {}",
                source.as_str()
            )));
        }

        let outcome = validate_snapshot(snapshot, None, &self.cfg.validation);
        if outcome.report.fatal(self.cfg.validation.strict) {
            let first = outcome
                .report
                .errors
                .first()
                .map(|v| format!("{}: {}", v.code.as_str(), v.message))
                .unwrap_or_else(|| "validation failed".to_string());
            return Err(EodError::Validation(first));
        }

        self.store.upsert_reference_data(snapshot).await?;

        let staged: Vec<StagedPosition> = outcome.positions.iter().map(StagedPosition::from).collect();
        let batch_id = self.store.create_batch(account_id, business_date).await?;
        self.store
            .insert_positions(account_id, batch_id, business_date, &staged, source)
            .await?;

        let landed = self.store.count_batch_positions(account_id, batch_id).await?;
        if landed != staged.len() as i64 {
            return Err(EodError::BatchValidation(format!(
                "staged {} rows but {} landed in batch {batch_id}",
                staged.len(),
                landed
            )));
        }

        self.store.activate_batch(account_id, batch_id).await?;

        self.publisher
            .publish_change(&PositionChange {
                event_type: ChangeEventType::ManualUpload,
                account_id: account_id.to_string(),
                client_id: snapshot.client_id.clone(),
                business_date,
                position_count: staged.len() as i64,
                ts_utc: Utc::now(),
            })
            .await;

        info!(account_id, %business_date, batch_id, count = staged.len(), "upload activated");
        Ok(staged.len() as i64)
    }

    /// Intraday / manual single-position adjustment through the bitemporal
    /// path. Never rotates batches.
    #[allow(clippy::too_many_arguments)]
    pub async fn adjust_position(
        &self,
        account_id: &str,
        business_date: NaiveDate,
        product_id: &str,
        position_type: &str,
        quantity_micros: i64,
        price_micros: i64,
        currency: &str,
        source: PositionSource,
    ) -> Result<(), EodError> {
        if product_id.trim().is_empty() {
            return Err(EodError::InvalidArgument("product id is required".to_string()));
        }
        let market_value = pos_validate::mul_micros(quantity_micros, price_micros)
            .ok_or_else(|| {
                EodError::InvalidArgument("quantity × price overflows".to_string())
            })?;

        self.store
            .update_position_bitemporal(
                account_id,
                product_id,
                position_type,
                business_date,
                quantity_micros,
                price_micros,
                market_value,
                currency,
                source,
            )
            .await?;

        let client_id = self
            .store
            .client_of_account(account_id)
            .await?
            .unwrap_or_default();
        let event_type = match source {
            PositionSource::Intraday => ChangeEventType::IntradayUpdate,
            _ => ChangeEventType::ManualUpload,
        };
        self.publisher
            .publish_change(&PositionChange {
                event_type,
                account_id: account_id.to_string(),
                client_id,
                business_date,
                position_count: 1,
                ts_utc: Utc::now(),
            })
            .await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Failure accounting
    // -----------------------------------------------------------------------

    fn clear_streak(&self, account_id: &str) {
        self.failure_streaks
            .lock()
            .expect("streak lock poisoned")
            .remove(account_id);
    }

    fn bump_streak(&self, account_id: &str) -> u32 {
        let mut map = self.failure_streaks.lock().expect("streak lock poisoned");
        let streak = map.entry(account_id.to_string()).or_insert(0);
        *streak += 1;
        *streak
    }

    async fn alert_failure(&self, account_id: &str, error: &EodError) {
        let streak = self.bump_streak(account_id);
        let level = if streak >= 5 {
            AlertLevel::Page
        } else if streak >= 3 {
            AlertLevel::Critical
        } else {
            AlertLevel::Warning
        };
        self.publisher
            .publish_alert(&Alert {
                level,
                source: "eod-engine".to_string(),
                alert_type: "EOD_FAILED".to_string(),
                message: format!("EOD failed ({streak} consecutive): {error}"),
                entity_id: Some(account_id.to_string()),
                ts_utc: Utc::now(),
            })
            .await;
    }
}

fn stored_to_normalized(p: &StoredPosition) -> NormalizedPosition {
    NormalizedPosition {
        product_id: p.product_id.clone(),
        position_type: p.position_type.clone(),
        quantity_micros: p.quantity_micros,
        price_micros: p.price_micros,
        currency: p.currency.clone(),
        market_value_micros: p.market_value_micros,
        provided_market_value_micros: None,
        ticker: None,
    }
}
