//! Thin adapters binding the engine's ports to the real collaborators:
//! Postgres behind [`PgPositionStore`], and the message-bus integration
//! point behind [`LogOnlyBus`].

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;

use pos_eod::{EodError, PositionStore, StagedPosition};
use pos_events::{BusError, BusRecord, DltConsumer, MessageBus};
use pos_schemas::{
    EodStatusRecord, PositionSource, Snapshot, SnapshotHashRecord, StoredPosition,
};

fn internal(e: anyhow::Error) -> EodError {
    EodError::Internal(format!("{e:#}"))
}

/// The engine's store port over the Postgres crate. Pure delegation plus
/// error mapping; all transactional behavior lives in `pos-store`.
pub struct PgPositionStore {
    pool: PgPool,
}

impl PgPositionStore {
    pub fn new(pool: PgPool) -> Self {
        PgPositionStore { pool }
    }
}

#[async_trait::async_trait]
impl PositionStore for PgPositionStore {
    async fn create_batch(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<i64, EodError> {
        pos_store::create_batch(&self.pool, account_id, business_date)
            .await
            .map_err(internal)
    }

    async fn insert_positions(
        &self,
        account_id: &str,
        batch_id: i64,
        business_date: NaiveDate,
        positions: &[StagedPosition],
        source: PositionSource,
    ) -> Result<(), EodError> {
        let rows: Vec<pos_store::NewPosition> = positions
            .iter()
            .map(|p| pos_store::NewPosition {
                product_id: p.product_id.clone(),
                position_type: p.position_type.clone(),
                quantity_micros: p.quantity_micros,
                price_micros: p.price_micros,
                currency: p.currency.clone(),
                market_value_micros: p.market_value_micros,
            })
            .collect();
        pos_store::insert_positions(&self.pool, account_id, batch_id, business_date, &rows, source)
            .await
            .map_err(internal)
    }

    async fn count_batch_positions(
        &self,
        account_id: &str,
        batch_id: i64,
    ) -> Result<i64, EodError> {
        pos_store::count_batch_positions(&self.pool, account_id, batch_id)
            .await
            .map_err(internal)
    }

    async fn activate_batch(&self, account_id: &str, batch_id: i64) -> Result<(), EodError> {
        pos_store::activate_batch(&self.pool, account_id, batch_id)
            .await
            .map_err(internal)
    }

    async fn rollback_batch(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<bool, EodError> {
        pos_store::rollback_batch(&self.pool, account_id, business_date)
            .await
            .map_err(internal)
    }

    async fn get_active_positions(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<Vec<StoredPosition>, EodError> {
        pos_store::get_active_positions(&self.pool, account_id, business_date)
            .await
            .map_err(internal)
    }

    async fn get_quantity_as_of(
        &self,
        account_id: &str,
        product_id: &str,
        business_date: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>, EodError> {
        pos_store::get_quantity_as_of(&self.pool, account_id, product_id, business_date, at)
            .await
            .map_err(internal)
    }

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
    ) -> Result<(), EodError> {
        pos_store::update_position_bitemporal(
            &self.pool,
            account_id,
            product_id,
            position_type,
            business_date,
            quantity_micros,
            price_micros,
            market_value_micros,
            currency,
            source,
        )
        .await
        .map_err(internal)
    }

    async fn get_eod_status(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<EodStatusRecord, EodError> {
        pos_store::get_eod_status(&self.pool, account_id, business_date)
            .await
            .map_err(internal)
    }

    async fn mark_in_progress(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<(), EodError> {
        pos_store::mark_in_progress(&self.pool, account_id, business_date)
            .await
            .map_err(internal)
    }

    async fn mark_completed(
        &self,
        account_id: &str,
        business_date: NaiveDate,
        position_count: i64,
    ) -> Result<(), EodError> {
        pos_store::mark_completed(&self.pool, account_id, business_date, position_count)
            .await
            .map_err(internal)
    }

    async fn mark_failed(
        &self,
        account_id: &str,
        business_date: NaiveDate,
        error: &str,
    ) -> Result<(), EodError> {
        pos_store::mark_failed(&self.pool, account_id, business_date, error)
            .await
            .map_err(internal)
    }

    async fn mark_skipped(
        &self,
        account_id: &str,
        business_date: NaiveDate,
        reason: &str,
    ) -> Result<(), EodError> {
        pos_store::mark_skipped(&self.pool, account_id, business_date, reason)
            .await
            .map_err(internal)
    }

    async fn reset_eod_status(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<(), EodError> {
        pos_store::reset_eod_status(&self.pool, account_id, business_date)
            .await
            .map_err(internal)
    }

    async fn get_snapshot_hash(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<Option<SnapshotHashRecord>, EodError> {
        pos_store::get_snapshot_hash(&self.pool, account_id, business_date)
            .await
            .map_err(internal)
    }

    async fn put_snapshot_hash(&self, record: &SnapshotHashRecord) -> Result<(), EodError> {
        pos_store::put_snapshot_hash(&self.pool, record)
            .await
            .map_err(internal)
    }

    async fn upsert_reference_data(&self, snapshot: &Snapshot) -> Result<(), EodError> {
        pos_store::upsert_reference_data(&self.pool, snapshot)
            .await
            .map_err(internal)
    }

    async fn client_of_account(&self, account_id: &str) -> Result<Option<String>, EodError> {
        pos_store::client_of_account(&self.pool, account_id)
            .await
            .map_err(internal)
    }

    async fn client_account_count(&self, client_id: &str) -> Result<i64, EodError> {
        pos_store::client_account_count(&self.pool, client_id)
            .await
            .map_err(internal)
    }

    async fn count_completed_accounts(
        &self,
        client_id: &str,
        business_date: NaiveDate,
    ) -> Result<i64, EodError> {
        pos_store::count_completed_accounts(&self.pool, client_id, business_date)
            .await
            .map_err(internal)
    }
}

// ---------------------------------------------------------------------------
// Bus integration point
// ---------------------------------------------------------------------------

/// Stand-in bus driver: logs every record at info level. The production
/// Kafka client plugs in behind the same `MessageBus` trait; nothing above
/// this adapter knows which driver is wired.
#[derive(Default, Clone)]
pub struct LogOnlyBus;

#[async_trait::async_trait]
impl MessageBus for LogOnlyBus {
    async fn publish(&self, record: BusRecord) -> Result<(), BusError> {
        tracing::info!(
            topic = %record.topic,
            key = %record.key,
            payload = %record.payload,
            "outbound event"
        );
        Ok(())
    }

    fn dlt_consumer(&self, _original_topic: &str) -> Box<dyn DltConsumer> {
        Box::new(EmptyDlt)
    }
}

struct EmptyDlt;

#[async_trait::async_trait]
impl DltConsumer for EmptyDlt {
    async fn poll(&mut self, _max: usize) -> Result<Vec<BusRecord>, BusError> {
        Ok(Vec::new())
    }

    async fn commit(&mut self) -> Result<(), BusError> {
        Ok(())
    }
}
