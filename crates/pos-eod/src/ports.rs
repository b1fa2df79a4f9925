//! Engine-side ports.
//!
//! The engine never talks to Postgres or HTTP directly: the daemon wires
//! [`PositionStore`] to `pos-store` and `SnapshotSource` (from
//! `pos-upstream`) to the resilient client; the testkit wires both to
//! in-memory fakes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use pos_schemas::{
    EodStatusRecord, PositionSource, Snapshot, SnapshotHashRecord, StoredPosition,
};

use crate::error::EodError;

/// A position ready to land in a STAGING batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPosition {
    pub product_id: String,
    pub position_type: String,
    pub quantity_micros: i64,
    pub price_micros: i64,
    pub currency: String,
    pub market_value_micros: i64,
}

impl From<&pos_validate::NormalizedPosition> for StagedPosition {
    fn from(p: &pos_validate::NormalizedPosition) -> Self {
        StagedPosition {
            product_id: p.product_id.clone(),
            position_type: p.position_type.clone(),
            quantity_micros: p.quantity_micros,
            price_micros: p.price_micros,
            currency: p.currency.clone(),
            market_value_micros: p.market_value_micros,
        }
    }
}

/// Everything the engine needs from the position store. One implementation
/// wraps Postgres; the test one is a mutex around maps.
#[async_trait::async_trait]
pub trait PositionStore: Send + Sync {
    async fn create_batch(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<i64, EodError>;

    async fn insert_positions(
        &self,
        account_id: &str,
        batch_id: i64,
        business_date: NaiveDate,
        positions: &[StagedPosition],
        source: PositionSource,
    ) -> Result<(), EodError>;

    async fn count_batch_positions(
        &self,
        account_id: &str,
        batch_id: i64,
    ) -> Result<i64, EodError>;

    async fn activate_batch(&self, account_id: &str, batch_id: i64) -> Result<(), EodError>;

    async fn rollback_batch(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<bool, EodError>;

    async fn get_active_positions(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<Vec<StoredPosition>, EodError>;

    async fn get_quantity_as_of(
        &self,
        account_id: &str,
        product_id: &str,
        business_date: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>, EodError>;

    #[allow(clippy::too_many_arguments)]
    async fn update_position_bitemporal(
        &self,
        account_id: &str,
        product_id: &str,
        position_type: &str,
        business_date: NaiveDate,
        quantity_micros: i64,
        price_micros: i64,
        market_value_micros: i64,
        currency: &str,
        source: PositionSource,
    ) -> Result<(), EodError>;

    async fn get_eod_status(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<EodStatusRecord, EodError>;

    async fn mark_in_progress(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<(), EodError>;

    async fn mark_completed(
        &self,
        account_id: &str,
        business_date: NaiveDate,
        position_count: i64,
    ) -> Result<(), EodError>;

    async fn mark_failed(
        &self,
        account_id: &str,
        business_date: NaiveDate,
        error: &str,
    ) -> Result<(), EodError>;

    async fn mark_skipped(
        &self,
        account_id: &str,
        business_date: NaiveDate,
        reason: &str,
    ) -> Result<(), EodError>;

    async fn reset_eod_status(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<(), EodError>;

    async fn get_snapshot_hash(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<Option<SnapshotHashRecord>, EodError>;

    async fn put_snapshot_hash(&self, record: &SnapshotHashRecord) -> Result<(), EodError>;

    async fn upsert_reference_data(&self, snapshot: &Snapshot) -> Result<(), EodError>;

    async fn client_of_account(&self, account_id: &str) -> Result<Option<String>, EodError>;

    async fn client_account_count(&self, client_id: &str) -> Result<i64, EodError>;

    async fn count_completed_accounts(
        &self,
        client_id: &str,
        business_date: NaiveDate,
    ) -> Result<i64, EodError>;
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancel signal. Workers check it between phases
/// (fetch → validate → stage → activate); a transaction in flight always
/// finishes.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn checkpoint(&self) -> Result<(), EodError> {
        if self.is_cancelled() {
            Err(EodError::Cancelled)
        } else {
            Ok(())
        }
    }
}
