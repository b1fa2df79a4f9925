use chrono::NaiveDate;
use pos_reconcile::*;

fn rp(product: &str, qty: i64, price: i64, mv: i64) -> ReconPosition {
    ReconPosition::new(product, qty, price, mv)
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 2, 3).unwrap()
}

#[test]
fn scenario_count_collapse_is_critical() {
    // 10 positions yesterday, 4 today: -60% count change.
    let yesterday: Vec<_> = (0..10).map(|i| rp(&format!("P{i}"), 10, 5, 50)).collect();
    let today: Vec<_> = (0..4).map(|i| rp(&format!("P{i}"), 10, 5, 50)).collect();

    let r = reconcile("1001", date(), &today, &yesterday, &ReconcileThresholds::default());
    assert_eq!(r.status, ReconcileStatus::Critical);
    assert!(r.anomalies.iter().any(|a| a.kind == AnomalyKind::CountChange
        && a.severity == Severity::Critical));
    assert_eq!(r.diff.closed_count, 6);
}

#[test]
fn scenario_diff_report_orders_biggest_movers_first() {
    let yesterday = vec![rp("SMALL", 10, 5, 1_000), rp("BIG", 10, 5, 1_000)];
    let today = vec![
        rp("SMALL", 11, 5, 1_100),
        rp("BIG", 30, 5, 3_000),
        rp("FRESH", 1, 5, 5),
    ];

    let r = reconcile("1001", date(), &today, &yesterday, &ReconcileThresholds::default());
    // NEW entries (no base) lead, then movers by |bps| descending.
    assert_eq!(r.diff.deltas[0].product_id, "FRESH");
    assert_eq!(r.diff.deltas[0].kind, DiffKind::New);
    assert_eq!(r.diff.deltas[1].product_id, "BIG");
    assert_eq!(r.diff.deltas[2].product_id, "SMALL");
}
