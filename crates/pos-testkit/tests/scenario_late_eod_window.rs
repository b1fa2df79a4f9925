//! Scenario: late EOD honors the age window and the completed gate.

use chrono::{Datelike, Duration, Utc, Weekday};
use pos_eod::{CancelFlag, EodError, EodOutcome};
use pos_testkit::{standard_snapshot, Harness};

/// Most recent past weekday at least `back` days ago.
fn recent_weekday(back: i64) -> chrono::NaiveDate {
    let mut d = Utc::now().date_naive() - Duration::days(back);
    while matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
        d -= Duration::days(1);
    }
    d
}

#[tokio::test]
async fn late_eod_inside_window_loads() {
    let h = Harness::new();
    let date = recent_weekday(2);
    h.upstream.always(standard_snapshot("1001", "CLI-1", date));

    let outcome = h
        .engine
        .process_late_eod("1001", date, &CancelFlag::new())
        .await
        .unwrap();
    assert!(matches!(outcome, EodOutcome::Completed { .. }));
}

#[tokio::test]
async fn late_eod_outside_window_is_rejected() {
    let h = Harness::new();
    let date = Utc::now().date_naive() - Duration::days(30);
    h.upstream.always(standard_snapshot("1001", "CLI-1", date));

    let err = h
        .engine
        .process_late_eod("1001", date, &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EodError::InvalidArgument(_)));
}

#[tokio::test]
async fn late_eod_refuses_completed_until_reset() {
    let h = Harness::new();
    let date = recent_weekday(1);
    h.upstream.always(standard_snapshot("1001", "CLI-1", date));

    h.engine
        .process_late_eod("1001", date, &CancelFlag::new())
        .await
        .unwrap();

    let err = h
        .engine
        .process_late_eod("1001", date, &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EodError::InvalidArgument(_)));

    // After the operator reset the late run goes through again.
    h.engine.reset_eod("1001", date).await.unwrap();
    let mut changed = standard_snapshot("1001", "CLI-1", date);
    changed.positions[0].quantity = "120".to_string();
    h.upstream.push_reply(changed);
    let outcome = h
        .engine
        .process_late_eod("1001", date, &CancelFlag::new())
        .await
        .unwrap();
    assert!(matches!(outcome, EodOutcome::Completed { .. }));
}
