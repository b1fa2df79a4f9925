//! Scenario: degraded snapshots never overwrite the active book.
//!
//! A STALE_CACHE (or UNAVAILABLE) snapshot is a value for read-side
//! consumers, but the EOD engine treats it as an unavailable upstream:
//! FAILED status, no new batch, previous ACTIVE untouched.

use pos_eod::{CancelFlag, EodError, PositionStore};
use pos_schemas::{EodState, SnapshotStatus};
use pos_testkit::{business_date, standard_snapshot, Harness};

#[tokio::test]
async fn stale_cache_snapshot_fails_eod_and_preserves_active() {
    let h = Harness::new();
    let date = business_date();

    // Day one: good load.
    h.upstream.push_reply(standard_snapshot("42", "CLI-9", date));
    h.engine.process_eod("42", date, &CancelFlag::new()).await.unwrap();
    let active_before = h.store.active_batch_of("42", date).unwrap();

    // Upstream degraded: the resilient client would serve the cache with a
    // rewritten status. Reset first so the gates are out of the way.
    h.engine.reset_eod("42", date).await.unwrap();
    let mut stale = standard_snapshot("42", "CLI-9", date);
    stale.status = SnapshotStatus::StaleCache;
    h.upstream.push_reply(stale);

    let err = h.engine.process_eod("42", date, &CancelFlag::new()).await.unwrap_err();
    assert!(matches!(err, EodError::UpstreamUnavailable(_)));

    let status = h.store.get_eod_status("42", date).await.unwrap();
    assert_eq!(status.state, EodState::Failed);

    // The active batch is exactly what it was.
    let active_after = h.store.active_batch_of("42", date).unwrap();
    assert_eq!(active_after.batch_id, active_before.batch_id);
    assert_eq!(
        h.store.get_active_positions("42", date).await.unwrap().len(),
        3
    );
}

#[tokio::test]
async fn unavailable_snapshot_fails_eod() {
    let h = Harness::new();
    let date = business_date();
    // No script, no standing snapshot: the fake answers UNAVAILABLE.

    let err = h.engine.process_eod("77", date, &CancelFlag::new()).await.unwrap_err();
    assert!(matches!(err, EodError::UpstreamUnavailable(_)));
    assert!(h.store.batches_of("77").is_empty());
}
