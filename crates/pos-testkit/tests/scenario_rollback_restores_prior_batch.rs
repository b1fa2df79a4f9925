//! Scenario: operator rollback to the prior batch.
//!
//! With batch 2 ACTIVE and batch 1 ARCHIVED, rollback marks batch 2
//! ROLLED_BACK, re-activates batch 1, and reads follow. A rolled-back
//! batch is terminal.

use pos_eod::{CancelFlag, PositionStore};
use pos_schemas::BatchStatus;
use pos_testkit::{business_date, standard_snapshot, Harness};

#[tokio::test]
async fn rollback_swaps_back_and_reads_follow() {
    let h = Harness::new();
    let date = business_date();

    // First load.
    h.upstream.push_reply(standard_snapshot("1001", "CLI-1", date));
    h.engine.process_eod("1001", date, &CancelFlag::new()).await.unwrap();

    // Second load with a changed book (reset so the gates let it through).
    h.engine.reset_eod("1001", date).await.unwrap();
    let mut changed = standard_snapshot("1001", "CLI-1", date);
    changed.positions.truncate(2);
    h.upstream.push_reply(changed);
    h.engine.process_eod("1001", date, &CancelFlag::new()).await.unwrap();

    assert_eq!(h.store.active_batch_of("1001", date).unwrap().batch_id, 2);
    assert_eq!(
        h.store.get_active_positions("1001", date).await.unwrap().len(),
        2
    );

    // Roll back: batch 1 is ACTIVE again with its 3 positions.
    let rolled = h.engine.rollback_eod("1001", date).await.unwrap();
    assert!(rolled);

    let batches = h.store.batches_of("1001");
    let by_id = |id: i64| batches.iter().find(|b| b.batch_id == id).unwrap();
    assert_eq!(by_id(2).status, BatchStatus::RolledBack);
    assert_eq!(by_id(1).status, BatchStatus::Active);
    assert_eq!(
        h.store.get_active_positions("1001", date).await.unwrap().len(),
        3
    );

    // No ARCHIVED batch remains for the date; a second rollback refuses.
    assert!(!h.engine.rollback_eod("1001", date).await.unwrap());
}
