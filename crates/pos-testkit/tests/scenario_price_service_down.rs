//! Scenario: pricing upstream outage heuristic aborts the load.
//!
//! 4 of 20 positions priced at zero (20%) against the 10% threshold:
//! validation fails with PRICE_SERVICE_DOWN, the status row is FAILED, no
//! batch is created and a CRITICAL alert goes out.

use pos_eod::{CancelFlag, EodError, PositionStore};
use pos_events::TOPIC_SYSTEM_ALERTS;
use pos_schemas::EodState;
use pos_testkit::{business_date, raw_position, snapshot, Harness};

#[tokio::test]
async fn zero_price_ratio_fails_the_eod() {
    let h = Harness::new();
    let date = business_date();

    let mut positions: Vec<_> = (0..16)
        .map(|i| raw_position(&format!("P{i}"), "100", "10.5"))
        .collect();
    for i in 0..4 {
        positions.push(raw_position(&format!("Z{i}"), "100", "0"));
    }
    h.upstream.always(snapshot("1001", "CLI-1", date, positions));

    let err = h
        .engine
        .process_eod("1001", date, &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EodError::Validation(_)));

    let status = h.store.get_eod_status("1001", date).await.unwrap();
    assert_eq!(status.state, EodState::Failed);
    assert!(status.last_error.unwrap().contains("VALIDATION_ERROR"));

    // Nothing was staged or activated.
    assert!(h.store.batches_of("1001").is_empty());

    // CRITICAL PRICE_SERVICE_DOWN alert plus the EOD_FAILED alert.
    let alerts = h.bus.records(TOPIC_SYSTEM_ALERTS);
    assert!(alerts.iter().any(|r| {
        r.payload["event_type"] == "PRICE_SERVICE_DOWN"
            && r.payload["payload"]["level"] == "CRITICAL"
    }));
    assert!(alerts
        .iter()
        .any(|r| r.payload["event_type"] == "EOD_FAILED"));
}
