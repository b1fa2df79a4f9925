//! Scenario: operator upload replaces the book; intraday adjustments go
//! through the bitemporal path without rotating batches.

use chrono::Utc;
use pos_eod::{CancelFlag, PositionStore};
use pos_events::TOPIC_POSITION_CHANGE;
use pos_schemas::PositionSource;
use pos_testkit::{business_date, raw_position, snapshot, standard_snapshot, Harness};

#[tokio::test]
async fn upload_activates_a_fresh_batch() {
    let h = Harness::new();
    let date = business_date();

    h.upstream.push_reply(standard_snapshot("1001", "CLI-1", date));
    h.engine.process_eod("1001", date, &CancelFlag::new()).await.unwrap();

    let upload = snapshot(
        "1001",
        "CLI-1",
        date,
        vec![raw_position("PROD-NEW", "10", "99.5")],
    );
    let count = h
        .engine
        .process_upload("1001", date, &upload, PositionSource::ManualUpload)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let active = h.store.get_active_positions("1001", date).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].product_id, "PROD-NEW");
    assert_eq!(active[0].source, PositionSource::ManualUpload);

    let events = h.bus.records(TOPIC_POSITION_CHANGE);
    assert!(events
        .iter()
        .any(|r| r.payload["event_type"] == "MANUAL_UPLOAD"));
}

#[tokio::test]
async fn intraday_adjust_closes_and_inserts_in_place() {
    let h = Harness::new();
    let date = business_date();

    h.upstream.push_reply(standard_snapshot("1001", "CLI-1", date));
    h.engine.process_eod("1001", date, &CancelFlag::new()).await.unwrap();
    let after_eod = Utc::now();

    h.engine
        .adjust_position(
            "1001",
            date,
            "PROD-AAA",
            "SETTLED",
            175_000_000,
            150_250_000,
            "USD",
            PositionSource::Intraday,
        )
        .await
        .unwrap();
    let after_adjust = Utc::now();

    // Same single batch, new quantity visible now, old quantity at the
    // earlier instant.
    assert_eq!(h.store.batches_of("1001").len(), 1);
    assert_eq!(
        h.store
            .get_quantity_as_of("1001", "PROD-AAA", date, after_eod)
            .await
            .unwrap(),
        Some(100_000_000)
    );
    assert_eq!(
        h.store
            .get_quantity_as_of("1001", "PROD-AAA", date, after_adjust)
            .await
            .unwrap(),
        Some(175_000_000)
    );

    let events = h.bus.records(TOPIC_POSITION_CHANGE);
    assert!(events
        .iter()
        .any(|r| r.payload["event_type"] == "INTRADAY_UPDATE"));
}
