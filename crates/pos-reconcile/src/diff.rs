//! Pure day-over-day position diff. No alerting, no IO.

use std::collections::BTreeMap;

use crate::types::{DiffKind, DiffReport, PositionDelta, ReconPosition};

fn key(p: &ReconPosition) -> (String, String) {
    (p.product_id.clone(), p.position_type.clone())
}

fn change_bps(before: i64, after: i64) -> Option<i64> {
    if before == 0 {
        return None;
    }
    let diff = after as i128 - before as i128;
    Some((diff * 10_000 / (before as i128).abs()) as i64)
}

fn classify(before: &ReconPosition, after: &ReconPosition) -> DiffKind {
    if before.quantity_micros == after.quantity_micros {
        if before.price_micros == after.price_micros {
            DiffKind::Unchanged
        } else {
            DiffKind::PriceOnly
        }
    } else if after.quantity_micros.unsigned_abs() > before.quantity_micros.unsigned_abs() {
        DiffKind::Increased
    } else {
        DiffKind::Decreased
    }
}

/// Classify every product present on either day and sort deltas by absolute
/// percent change descending; NEW/CLOSED (no base) sort first.
pub fn compute_position_diff(
    current: &[ReconPosition],
    previous: &[ReconPosition],
) -> DiffReport {
    let prev_by_key: BTreeMap<(String, String), &ReconPosition> =
        previous.iter().map(|p| (key(p), p)).collect();
    let curr_by_key: BTreeMap<(String, String), &ReconPosition> =
        current.iter().map(|p| (key(p), p)).collect();

    let mut report = DiffReport::default();

    for (k, curr) in &curr_by_key {
        match prev_by_key.get(k) {
            None => {
                report.new_count += 1;
                report.deltas.push(PositionDelta {
                    product_id: curr.product_id.clone(),
                    position_type: curr.position_type.clone(),
                    kind: DiffKind::New,
                    quantity_before_micros: 0,
                    quantity_after_micros: curr.quantity_micros,
                    value_before_micros: 0,
                    value_after_micros: curr.market_value_micros,
                    value_change_bps: None,
                });
            }
            Some(prev) => {
                let kind = classify(prev, curr);
                match kind {
                    DiffKind::Increased => report.increased_count += 1,
                    DiffKind::Decreased => report.decreased_count += 1,
                    DiffKind::Unchanged => report.unchanged_count += 1,
                    DiffKind::PriceOnly => report.price_only_count += 1,
                    DiffKind::New | DiffKind::Closed => unreachable!(),
                }
                report.deltas.push(PositionDelta {
                    product_id: curr.product_id.clone(),
                    position_type: curr.position_type.clone(),
                    kind,
                    quantity_before_micros: prev.quantity_micros,
                    quantity_after_micros: curr.quantity_micros,
                    value_before_micros: prev.market_value_micros,
                    value_after_micros: curr.market_value_micros,
                    value_change_bps: change_bps(
                        prev.market_value_micros,
                        curr.market_value_micros,
                    ),
                });
            }
        }
    }

    for (k, prev) in &prev_by_key {
        if !curr_by_key.contains_key(k) {
            report.closed_count += 1;
            report.deltas.push(PositionDelta {
                product_id: prev.product_id.clone(),
                position_type: prev.position_type.clone(),
                kind: DiffKind::Closed,
                quantity_before_micros: prev.quantity_micros,
                quantity_after_micros: 0,
                value_before_micros: prev.market_value_micros,
                value_after_micros: 0,
                value_change_bps: None,
            });
        }
    }

    // Sort by |pct change| descending; entries with no base (NEW/CLOSED)
    // first, then by product for determinism.
    report.deltas.sort_by(|a, b| {
        let ka = a.value_change_bps.map(i64::abs);
        let kb = b.value_change_bps.map(i64::abs);
        match (ka, kb) {
            (None, None) => (a.product_id.as_str(), a.position_type.as_str())
                .cmp(&(b.product_id.as_str(), b.position_type.as_str())),
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (Some(x), Some(y)) => y.cmp(&x).then_with(|| {
                (a.product_id.as_str(), a.position_type.as_str())
                    .cmp(&(b.product_id.as_str(), b.position_type.as_str()))
            }),
        }
    });

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rp(product: &str, qty: i64, price: i64, mv: i64) -> ReconPosition {
        ReconPosition::new(product, qty, price, mv)
    }

    #[test]
    fn classification_covers_all_kinds() {
        let yesterday = vec![
            rp("CLOSED", 10, 5, 50),
            rp("UP", 10, 5, 50),
            rp("DOWN", 10, 5, 50),
            rp("SAME", 10, 5, 50),
            rp("REPRICED", 10, 5, 50),
        ];
        let today = vec![
            rp("NEW", 1, 5, 5),
            rp("UP", 20, 5, 100),
            rp("DOWN", 5, 5, 25),
            rp("SAME", 10, 5, 50),
            rp("REPRICED", 10, 6, 60),
        ];

        let d = compute_position_diff(&today, &yesterday);
        assert_eq!(d.new_count, 1);
        assert_eq!(d.closed_count, 1);
        assert_eq!(d.increased_count, 1);
        assert_eq!(d.decreased_count, 1);
        assert_eq!(d.unchanged_count, 1);
        assert_eq!(d.price_only_count, 1);
    }

    #[test]
    fn deltas_sorted_by_abs_change_descending() {
        let yesterday = vec![rp("A", 10, 5, 100), rp("B", 10, 5, 100)];
        let today = vec![rp("A", 11, 5, 110), rp("B", 20, 5, 200)];

        let d = compute_position_diff(&today, &yesterday);
        assert_eq!(d.deltas[0].product_id, "B"); // +100%
        assert_eq!(d.deltas[0].value_change_bps, Some(10_000));
        assert_eq!(d.deltas[1].value_change_bps, Some(1_000));
    }

    #[test]
    fn short_position_magnitude_drives_increase() {
        let yesterday = vec![rp("S", -10, 5, -50)];
        let today = vec![rp("S", -20, 5, -100)];
        let d = compute_position_diff(&today, &yesterday);
        assert_eq!(d.increased_count, 1);
    }
}
