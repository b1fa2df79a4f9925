//! In-memory implementation of the engine's store port.
//!
//! Mirrors the Postgres store's semantics faithfully enough for scenario
//! tests: staged rows are invisible, activation swaps atomically under one
//! lock, rollback reopens the archived rows, and the bitemporal intervals
//! answer as-of queries.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};

use pos_eod::{EodError, PositionStore, StagedPosition};
use pos_schemas::{
    BatchRecord, BatchStatus, EodState, EodStatusRecord, PositionSource, Snapshot,
    SnapshotHashRecord, StoredPosition,
};

#[derive(Default)]
struct MemInner {
    batches: BTreeMap<(String, i64), BatchRecord>,
    /// Rows staged but not yet activated, keyed by (account, batch).
    staged: HashMap<(String, i64), Vec<(StagedPosition, PositionSource)>>,
    /// Materialized bitemporal rows. `system_to == None` means open.
    positions: Vec<StoredPosition>,
    eod_status: HashMap<(String, NaiveDate), EodStatusRecord>,
    hashes: HashMap<(String, NaiveDate), SnapshotHashRecord>,
    /// account → client registry.
    accounts: HashMap<String, String>,
    /// Failure injection: accounts whose next insert call errors.
    fail_insert_once: HashSet<String>,
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemInner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account under a client without going through a snapshot.
    pub fn register_account(&self, account_id: &str, client_id: &str) {
        self.lock()
            .accounts
            .insert(account_id.to_string(), client_id.to_string());
    }

    /// Make the next `insert_positions` for the account fail, to prove a
    /// poisoned account cannot contaminate its neighbours.
    pub fn fail_next_insert(&self, account_id: &str) {
        self.lock().fail_insert_once.insert(account_id.to_string());
    }

    /// Drop only the status row, keeping the content hash — simulates a
    /// status row lost or reset outside the operator path.
    pub fn force_clear_status(&self, account_id: &str, business_date: NaiveDate) {
        self.lock()
            .eod_status
            .remove(&(account_id.to_string(), business_date));
    }

    pub fn batches_of(&self, account_id: &str) -> Vec<BatchRecord> {
        self.lock()
            .batches
            .values()
            .filter(|b| b.account_id == account_id)
            .cloned()
            .collect()
    }

    pub fn active_batch_of(&self, account_id: &str, business_date: NaiveDate) -> Option<BatchRecord> {
        self.lock()
            .batches
            .values()
            .find(|b| {
                b.account_id == account_id
                    && b.business_date == business_date
                    && b.status == BatchStatus::Active
            })
            .cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemInner> {
        self.inner.lock().expect("mem store lock poisoned")
    }
}

fn open(p: &StoredPosition) -> bool {
    p.system_to.is_none()
}

#[async_trait::async_trait]
impl PositionStore for MemStore {
    async fn create_batch(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<i64, EodError> {
        let mut g = self.lock();
        let next = g
            .batches
            .keys()
            .filter(|(a, _)| a == account_id)
            .map(|(_, id)| *id)
            .max()
            .unwrap_or(0)
            + 1;
        g.batches.insert(
            (account_id.to_string(), next),
            BatchRecord {
                account_id: account_id.to_string(),
                batch_id: next,
                business_date,
                status: BatchStatus::Staging,
                created_at: Utc::now(),
                activated_at: None,
                archived_at: None,
                position_count: 0,
            },
        );
        Ok(next)
    }

    async fn insert_positions(
        &self,
        account_id: &str,
        batch_id: i64,
        _business_date: NaiveDate,
        positions: &[StagedPosition],
        source: PositionSource,
    ) -> Result<(), EodError> {
        let mut g = self.lock();
        if g.fail_insert_once.remove(account_id) {
            return Err(EodError::Internal("injected insert failure".to_string()));
        }
        let key = (account_id.to_string(), batch_id);
        let Some(batch) = g.batches.get_mut(&key) else {
            return Err(EodError::NotFound(format!("batch {batch_id}")));
        };
        if batch.status != BatchStatus::Staging {
            return Err(EodError::ConcurrencyConflict(format!(
                "batch {batch_id} is {}, expected STAGING",
                batch.status.as_str()
            )));
        }
        batch.position_count = positions.len() as i64;
        g.staged
            .entry(key)
            .or_default()
            .extend(positions.iter().cloned().map(|p| (p, source)));
        Ok(())
    }

    async fn count_batch_positions(
        &self,
        account_id: &str,
        batch_id: i64,
    ) -> Result<i64, EodError> {
        let g = self.lock();
        let key = (account_id.to_string(), batch_id);
        if let Some(staged) = g.staged.get(&key) {
            return Ok(staged.len() as i64);
        }
        Ok(g
            .positions
            .iter()
            .filter(|p| p.account_id == account_id && p.batch_id == batch_id)
            .count() as i64)
    }

    async fn activate_batch(&self, account_id: &str, batch_id: i64) -> Result<(), EodError> {
        let mut g = self.lock();
        let key = (account_id.to_string(), batch_id);
        let Some(batch) = g.batches.get(&key) else {
            return Err(EodError::NotFound(format!("batch {batch_id}")));
        };
        if batch.status != BatchStatus::Staging {
            return Err(EodError::ConcurrencyConflict(format!(
                "batch {batch_id} is {}, expected STAGING",
                batch.status.as_str()
            )));
        }
        let business_date = batch.business_date;
        let now = Utc::now();

        // Archive the outgoing ACTIVE batch and close its open rows.
        let outgoing: Option<i64> = g
            .batches
            .values()
            .find(|b| b.account_id == account_id && b.status == BatchStatus::Active)
            .map(|b| b.batch_id);
        if let Some(old_id) = outgoing {
            let old = g
                .batches
                .get_mut(&(account_id.to_string(), old_id))
                .expect("outgoing batch exists");
            old.status = BatchStatus::Archived;
            old.archived_at = Some(now);
            for p in g
                .positions
                .iter_mut()
                .filter(|p| p.account_id == account_id && p.batch_id == old_id && open(p))
            {
                p.system_to = Some(now);
            }
        }

        // Materialize the staged rows as open bitemporal rows.
        let staged = g.staged.remove(&key).unwrap_or_default();
        for (p, source) in staged {
            g.positions.push(StoredPosition {
                account_id: account_id.to_string(),
                product_id: p.product_id,
                position_type: p.position_type,
                business_date,
                batch_id,
                quantity_micros: p.quantity_micros,
                price_micros: p.price_micros,
                currency: p.currency,
                market_value_micros: p.market_value_micros,
                source,
                system_from: now,
                system_to: None,
            });
        }

        let batch = g.batches.get_mut(&key).expect("batch exists");
        batch.status = BatchStatus::Active;
        batch.activated_at = Some(now);
        Ok(())
    }

    async fn rollback_batch(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<bool, EodError> {
        let mut g = self.lock();
        let active = g
            .batches
            .values()
            .find(|b| {
                b.account_id == account_id
                    && b.business_date == business_date
                    && b.status == BatchStatus::Active
            })
            .map(|b| b.batch_id);
        let Some(active_id) = active else {
            return Ok(false);
        };
        let archived = g
            .batches
            .values()
            .filter(|b| {
                b.account_id == account_id
                    && b.business_date == business_date
                    && b.status == BatchStatus::Archived
            })
            .max_by_key(|b| b.batch_id)
            .map(|b| (b.batch_id, b.archived_at));
        let Some((archived_id, archived_at)) = archived else {
            return Ok(false);
        };

        let now = Utc::now();
        {
            let b1 = g
                .batches
                .get_mut(&(account_id.to_string(), active_id))
                .expect("active batch exists");
            b1.status = BatchStatus::RolledBack;
        }
        for p in g
            .positions
            .iter_mut()
            .filter(|p| p.account_id == account_id && p.batch_id == active_id && open(p))
        {
            p.system_to = Some(now);
        }
        {
            let b0 = g
                .batches
                .get_mut(&(account_id.to_string(), archived_id))
                .expect("archived batch exists");
            b0.status = BatchStatus::Active;
            b0.activated_at = Some(now);
            b0.archived_at = None;
        }
        for p in g.positions.iter_mut().filter(|p| {
            p.account_id == account_id && p.batch_id == archived_id && p.system_to == archived_at
        }) {
            p.system_to = None;
        }
        Ok(true)
    }

    async fn get_active_positions(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<Vec<StoredPosition>, EodError> {
        let g = self.lock();
        let active = g
            .batches
            .values()
            .find(|b| {
                b.account_id == account_id
                    && b.business_date == business_date
                    && b.status == BatchStatus::Active
            })
            .map(|b| b.batch_id);
        let Some(batch_id) = active else {
            return Ok(Vec::new());
        };
        Ok(g
            .positions
            .iter()
            .filter(|p| p.account_id == account_id && p.batch_id == batch_id && open(p))
            .cloned()
            .collect())
    }

    async fn get_quantity_as_of(
        &self,
        account_id: &str,
        product_id: &str,
        business_date: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>, EodError> {
        let g = self.lock();
        let mut any = false;
        let mut sum = 0i64;
        for p in g.positions.iter().filter(|p| {
            p.account_id == account_id
                && p.product_id == product_id
                && p.business_date == business_date
                && p.system_from <= at
                && p.system_to.map(|t| t > at).unwrap_or(true)
        }) {
            any = true;
            sum += p.quantity_micros;
        }
        Ok(any.then_some(sum))
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
        let mut g = self.lock();
        let active = g
            .batches
            .values()
            .find(|b| {
                b.account_id == account_id
                    && b.business_date == business_date
                    && b.status == BatchStatus::Active
            })
            .map(|b| b.batch_id);
        let Some(batch_id) = active else {
            return Err(EodError::NotFound(format!(
                "no ACTIVE batch for {account_id} on {business_date}"
            )));
        };

        let now = Utc::now();
        let mut closed = false;
        for p in g.positions.iter_mut().filter(|p| {
            p.account_id == account_id
                && p.batch_id == batch_id
                && p.product_id == product_id
                && p.position_type == position_type
                && p.system_to.is_none()
        }) {
            p.system_to = Some(now);
            closed = true;
        }

        g.positions.push(StoredPosition {
            account_id: account_id.to_string(),
            product_id: product_id.to_string(),
            position_type: position_type.to_string(),
            business_date,
            batch_id,
            quantity_micros,
            price_micros,
            currency: currency.to_string(),
            market_value_micros,
            source,
            system_from: now,
            system_to: None,
        });

        if !closed {
            if let Some(b) = g.batches.get_mut(&(account_id.to_string(), batch_id)) {
                b.position_count += 1;
            }
        }
        Ok(())
    }

    async fn get_eod_status(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<EodStatusRecord, EodError> {
        let g = self.lock();
        Ok(g
            .eod_status
            .get(&(account_id.to_string(), business_date))
            .cloned()
            .unwrap_or_else(|| EodStatusRecord::not_started(account_id, business_date)))
    }

    async fn mark_in_progress(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<(), EodError> {
        let mut g = self.lock();
        let rec = g
            .eod_status
            .entry((account_id.to_string(), business_date))
            .or_insert_with(|| EodStatusRecord::not_started(account_id, business_date));
        rec.state = EodState::InProgress;
        rec.started_at = Some(Utc::now());
        rec.last_error = None;
        Ok(())
    }

    async fn mark_completed(
        &self,
        account_id: &str,
        business_date: NaiveDate,
        position_count: i64,
    ) -> Result<(), EodError> {
        let mut g = self.lock();
        let rec = g
            .eod_status
            .entry((account_id.to_string(), business_date))
            .or_insert_with(|| EodStatusRecord::not_started(account_id, business_date));
        rec.state = EodState::Completed;
        rec.completed_at = Some(Utc::now());
        rec.position_count = position_count;
        rec.last_error = None;
        Ok(())
    }

    async fn mark_failed(
        &self,
        account_id: &str,
        business_date: NaiveDate,
        error: &str,
    ) -> Result<(), EodError> {
        let mut g = self.lock();
        let rec = g
            .eod_status
            .entry((account_id.to_string(), business_date))
            .or_insert_with(|| EodStatusRecord::not_started(account_id, business_date));
        rec.state = EodState::Failed;
        rec.last_error = Some(error.to_string());
        Ok(())
    }

    async fn mark_skipped(
        &self,
        account_id: &str,
        business_date: NaiveDate,
        reason: &str,
    ) -> Result<(), EodError> {
        let mut g = self.lock();
        let rec = g
            .eod_status
            .entry((account_id.to_string(), business_date))
            .or_insert_with(|| EodStatusRecord::not_started(account_id, business_date));
        rec.state = EodState::Skipped;
        rec.last_error = Some(reason.to_string());
        Ok(())
    }

    async fn reset_eod_status(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<(), EodError> {
        let mut g = self.lock();
        g.eod_status.remove(&(account_id.to_string(), business_date));
        g.hashes.remove(&(account_id.to_string(), business_date));
        Ok(())
    }

    async fn get_snapshot_hash(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<Option<SnapshotHashRecord>, EodError> {
        let g = self.lock();
        Ok(g.hashes.get(&(account_id.to_string(), business_date)).cloned())
    }

    async fn put_snapshot_hash(&self, record: &SnapshotHashRecord) -> Result<(), EodError> {
        let mut g = self.lock();
        g.hashes.insert(
            (record.account_id.clone(), record.business_date),
            record.clone(),
        );
        Ok(())
    }

    async fn upsert_reference_data(&self, snapshot: &Snapshot) -> Result<(), EodError> {
        if snapshot.client_id.is_empty() {
            return Ok(());
        }
        let mut g = self.lock();
        g.accounts
            .insert(snapshot.account_id.clone(), snapshot.client_id.clone());
        Ok(())
    }

    async fn client_of_account(&self, account_id: &str) -> Result<Option<String>, EodError> {
        Ok(self.lock().accounts.get(account_id).cloned())
    }

    async fn client_account_count(&self, client_id: &str) -> Result<i64, EodError> {
        Ok(self
            .lock()
            .accounts
            .values()
            .filter(|c| c.as_str() == client_id)
            .count() as i64)
    }

    async fn count_completed_accounts(
        &self,
        client_id: &str,
        business_date: NaiveDate,
    ) -> Result<i64, EodError> {
        let g = self.lock();
        Ok(g
            .eod_status
            .iter()
            .filter(|((account, date), rec)| {
                *date == business_date
                    && rec.state == EodState::Completed
                    && g.accounts.get(account).map(String::as_str) == Some(client_id)
            })
            .count() as i64)
    }
}
