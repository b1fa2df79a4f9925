//! Scenario: upstream pricing outage heuristic.
//!
//! 20 positions of which 4 are priced at exactly zero (20%) against a 10%
//! threshold must raise `PRICE_SERVICE_DOWN` as an error; 2 of 20 (10%)
//! must not.

use chrono::NaiveDate;
use pos_schemas::{RawPosition, Snapshot, SnapshotStatus};
use pos_validate::{validate_snapshot, RuleCode, ValidationConfig};

fn raw(product: &str, qty: &str, price: &str) -> RawPosition {
    RawPosition {
        product_id: product.to_string(),
        position_type: "SETTLED".to_string(),
        quantity: qty.to_string(),
        price: Some(price.to_string()),
        currency: "USD".to_string(),
        market_value: None,
        ticker: None,
        asset_class: None,
        issue_currency: None,
        settlement_currency: None,
    }
}

fn snapshot(positions: Vec<RawPosition>) -> Snapshot {
    Snapshot {
        account_id: "1001".to_string(),
        client_id: "C1".to_string(),
        business_date: NaiveDate::from_ymd_opt(2025, 2, 3).unwrap(),
        status: SnapshotStatus::Available,
        positions,
    }
}

#[test]
fn twenty_percent_zero_priced_trips() {
    let mut positions: Vec<_> = (0..16)
        .map(|i| raw(&format!("P{i}"), "100", "10.5"))
        .collect();
    for i in 0..4 {
        positions.push(raw(&format!("Z{i}"), "100", "0"));
    }

    let outcome = validate_snapshot(&snapshot(positions), None, &ValidationConfig::default());
    assert!(outcome.report.has_code(RuleCode::PriceServiceDown));
    // fatal regardless of strictness
    assert!(outcome.report.fatal(false));
}

#[test]
fn ten_percent_zero_priced_does_not_trip() {
    let mut positions: Vec<_> = (0..18)
        .map(|i| raw(&format!("P{i}"), "100", "10.5"))
        .collect();
    for i in 0..2 {
        positions.push(raw(&format!("Z{i}"), "100", "0"));
    }

    let outcome = validate_snapshot(&snapshot(positions), None, &ValidationConfig::default());
    assert!(!outcome.report.has_code(RuleCode::PriceServiceDown));
    // the two zero-priced rows still carry per-position errors
    assert!(outcome.report.has_code(RuleCode::ZeroPrice));
}

#[test]
fn malformed_rows_are_filtered_but_reported() {
    let positions = vec![
        raw("P1", "100", "10.5"),
        raw("P2", "not-a-number", "10.5"),
        raw("", "100", "10.5"),
    ];

    let outcome = validate_snapshot(&snapshot(positions), None, &ValidationConfig::default());
    assert_eq!(outcome.positions.len(), 1);
    assert!(outcome.report.has_code(RuleCode::MalformedPosition));
    assert!(outcome.report.has_code(RuleCode::MissingProductId));
}
