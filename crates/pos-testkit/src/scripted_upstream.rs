//! Scriptable snapshot source for engine and orchestrator scenarios.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::NaiveDate;

use pos_schemas::Snapshot;
use pos_upstream::{SnapshotSource, UpstreamError};

enum Script {
    Reply(Snapshot),
    Fail(UpstreamError),
    /// Sleep, then answer with the snapshot — for timeout scenarios.
    Hang(Duration, Snapshot),
}

#[derive(Default)]
pub struct ScriptedUpstream {
    queues: Mutex<HashMap<String, VecDeque<Script>>>,
    /// Snapshot returned whenever an account's queue is empty.
    standing: Mutex<HashMap<String, Snapshot>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every fetch for the account with this snapshot (unless a
    /// queued entry takes precedence).
    pub fn always(&self, snapshot: Snapshot) {
        self.standing
            .lock()
            .expect("upstream lock poisoned")
            .insert(snapshot.account_id.clone(), snapshot);
    }

    /// Queue a one-shot reply for the account.
    pub fn push_reply(&self, snapshot: Snapshot) {
        self.queues
            .lock()
            .expect("upstream lock poisoned")
            .entry(snapshot.account_id.clone())
            .or_default()
            .push_back(Script::Reply(snapshot));
    }

    /// Queue a one-shot failure for the account.
    pub fn push_failure(&self, account_id: &str, error: UpstreamError) {
        self.queues
            .lock()
            .expect("upstream lock poisoned")
            .entry(account_id.to_string())
            .or_default()
            .push_back(Script::Fail(error));
    }

    /// Queue a reply that stalls for `delay` first.
    pub fn push_hang(&self, delay: Duration, snapshot: Snapshot) {
        self.queues
            .lock()
            .expect("upstream lock poisoned")
            .entry(snapshot.account_id.clone())
            .or_default()
            .push_back(Script::Hang(delay, snapshot));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// High-water mark of concurrent fetches — the observable concurrency
    /// bound of the orchestrator.
    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Decrements on drop so a fetch cancelled mid-hang (per-account timeout)
/// still releases its slot in the gauge.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl SnapshotSource for ScriptedUpstream {
    async fn fetch_snapshot(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<Snapshot, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        let script = self
            .queues
            .lock()
            .expect("upstream lock poisoned")
            .get_mut(account_id)
            .and_then(VecDeque::pop_front);

        match script {
            Some(Script::Reply(snap)) => Ok(snap),
            Some(Script::Fail(e)) => Err(e),
            Some(Script::Hang(delay, snap)) => {
                tokio::time::sleep(delay).await;
                Ok(snap)
            }
            None => {
                let standing = self
                    .standing
                    .lock()
                    .expect("upstream lock poisoned")
                    .get(account_id)
                    .cloned();
                match standing {
                    Some(snap) => Ok(snap),
                    None => Ok(Snapshot::unavailable(account_id, business_date)),
                }
            }
        }
    }
}
