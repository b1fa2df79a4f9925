//! Scenario: one account, clean upstream, full EOD pipeline.
//!
//! Expected: one batch becomes ACTIVE, the status row is COMPLETED with
//! positionCount=3, and exactly one EOD_COMPLETE change event is published
//! on the account's key.

use pos_eod::{CancelFlag, EodOutcome, PositionStore};
use pos_events::TOPIC_POSITION_CHANGE;
use pos_schemas::{BatchStatus, EodState};
use pos_testkit::{business_date, standard_snapshot, Harness};

#[tokio::test]
async fn eod_happy_path_activates_one_batch() {
    let h = Harness::new();
    let date = business_date();
    h.upstream.always(standard_snapshot("1001", "CLI-1", date));

    let outcome = h
        .engine
        .process_eod("1001", date, &CancelFlag::new())
        .await
        .expect("eod succeeds");
    assert_eq!(outcome, EodOutcome::Completed { position_count: 3 });

    // Exactly one batch, ACTIVE.
    let batches = h.store.batches_of("1001");
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].status, BatchStatus::Active);
    assert_eq!(batches[0].position_count, 3);

    // Status row COMPLETED with the count.
    let status = h.store.get_eod_status("1001", date).await.unwrap();
    assert_eq!(status.state, EodState::Completed);
    assert_eq!(status.position_count, 3);

    // Readers see the book.
    let active = h.store.get_active_positions("1001", date).await.unwrap();
    assert_eq!(active.len(), 3);
    let aaa = active.iter().find(|p| p.product_id == "PROD-AAA").unwrap();
    assert_eq!(aaa.quantity_micros, 100_000_000);
    assert_eq!(aaa.price_micros, 150_250_000);
    assert_eq!(aaa.market_value_micros, 15_025_000_000);

    // One change event, keyed by the account, typed EOD_COMPLETE.
    let events = h.bus.records(TOPIC_POSITION_CHANGE);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].key, "1001");
    assert_eq!(events[0].payload["event_type"], "EOD_COMPLETE");
    assert_eq!(events[0].payload["payload"]["positionCount"], 3);
}
