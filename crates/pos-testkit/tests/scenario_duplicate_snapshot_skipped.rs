//! Scenario: duplicate replay protection.
//!
//! A second trigger with a COMPLETED status row is a no-op. When the
//! status row is lost but the content hash survives, the hash gate skips
//! the identical snapshot without writing anything.

use pos_eod::{CancelFlag, EodOutcome, SkipReason};
use pos_events::TOPIC_POSITION_CHANGE;
use pos_testkit::{business_date, standard_snapshot, Harness};

#[tokio::test]
async fn completed_status_row_short_circuits() {
    let h = Harness::new();
    let date = business_date();
    h.upstream.always(standard_snapshot("1001", "CLI-1", date));

    let first = h.engine.process_eod("1001", date, &CancelFlag::new()).await.unwrap();
    assert!(matches!(first, EodOutcome::Completed { .. }));
    let calls_after_first = h.upstream.call_count();

    let second = h.engine.process_eod("1001", date, &CancelFlag::new()).await.unwrap();
    assert_eq!(second, EodOutcome::AlreadyCompleted);

    // The idempotency gate fires before any upstream fetch.
    assert_eq!(h.upstream.call_count(), calls_after_first);
    assert_eq!(h.store.batches_of("1001").len(), 1);
    assert_eq!(h.bus.count(TOPIC_POSITION_CHANGE), 1);
}

#[tokio::test]
async fn content_hash_rejects_duplicate_even_without_status_row() {
    let h = Harness::new();
    let date = business_date();
    h.upstream.always(standard_snapshot("1001", "CLI-1", date));

    h.engine.process_eod("1001", date, &CancelFlag::new()).await.unwrap();
    assert_eq!(h.store.batches_of("1001").len(), 1);

    // Status row lost (crash, manual surgery) — hash row intact.
    h.store.force_clear_status("1001", date);

    let rerun = h.engine.process_eod("1001", date, &CancelFlag::new()).await.unwrap();
    assert_eq!(rerun, EodOutcome::Skipped(SkipReason::Duplicate));

    // No second batch, no second EOD_COMPLETE event.
    assert_eq!(h.store.batches_of("1001").len(), 1);
    assert_eq!(h.bus.count(TOPIC_POSITION_CHANGE), 1);
}

#[tokio::test]
async fn changed_snapshot_after_reset_reloads() {
    let h = Harness::new();
    let date = business_date();
    h.upstream.push_reply(standard_snapshot("1001", "CLI-1", date));
    h.engine.process_eod("1001", date, &CancelFlag::new()).await.unwrap();

    // Operator reset clears status and hash; a different snapshot loads.
    h.engine.reset_eod("1001", date).await.unwrap();
    let mut changed = standard_snapshot("1001", "CLI-1", date);
    changed.positions[0].quantity = "175".to_string();
    h.upstream.push_reply(changed);

    let outcome = h.engine.process_eod("1001", date, &CancelFlag::new()).await.unwrap();
    assert!(matches!(outcome, EodOutcome::Completed { .. }));
    assert_eq!(h.store.batches_of("1001").len(), 2);

    let active = h.store.active_batch_of("1001", date).unwrap();
    assert_eq!(active.batch_id, 2);
}
