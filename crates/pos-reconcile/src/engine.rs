//! Deterministic day-over-day reconciliation.
//!
//! Loads nothing: the caller supplies today's and yesterday's active
//! positions, this module classifies and grades them.

use chrono::NaiveDate;

use crate::diff::compute_position_diff;
use crate::types::{
    Anomaly, AnomalyKind, ReconPosition, ReconcileReport, ReconcileStatus, ReconcileThresholds,
    Severity,
};

fn total_abs_value(positions: &[ReconPosition]) -> i128 {
    positions
        .iter()
        .map(|p| (p.market_value_micros as i128).abs())
        .sum()
}

fn change_bps(before: i128, after: i128) -> Option<i64> {
    if before == 0 {
        return None;
    }
    Some(((after - before) * 10_000 / before.abs()) as i64)
}

fn grade(abs_bps: i64, warn_pct: u32, crit_pct: u32) -> Option<Severity> {
    if abs_bps > crit_pct as i64 * 100 {
        Some(Severity::Critical)
    } else if abs_bps > warn_pct as i64 * 100 {
        Some(Severity::Warning)
    } else {
        None
    }
}

/// Compare today's active positions against yesterday's and classify
/// anomalies. Overall status is the worst anomaly severity.
pub fn reconcile(
    account_id: &str,
    business_date: NaiveDate,
    current: &[ReconPosition],
    previous: &[ReconPosition],
    thresholds: &ReconcileThresholds,
) -> ReconcileReport {
    let mut anomalies: Vec<Anomaly> = Vec::new();

    if current.is_empty() && !previous.is_empty() {
        anomalies.push(Anomaly {
            kind: AnomalyKind::MissingData,
            severity: Severity::Critical,
            message: format!(
                "no active positions for {business_date} but {} yesterday",
                previous.len()
            ),
        });
    }

    let value_bps = change_bps(total_abs_value(previous), total_abs_value(current));
    if let Some(bps) = value_bps {
        if let Some(severity) = grade(bps.abs(), thresholds.value_warn_pct, thresholds.value_crit_pct)
        {
            anomalies.push(Anomaly {
                kind: AnomalyKind::ValueChange,
                severity,
                message: format!("total market value moved {} bps day-over-day", bps),
            });
        }
    }

    let count_bps = change_bps(previous.len() as i128, current.len() as i128);
    if let Some(bps) = count_bps {
        if let Some(severity) = grade(bps.abs(), thresholds.count_warn_pct, thresholds.count_crit_pct)
        {
            anomalies.push(Anomaly {
                kind: AnomalyKind::CountChange,
                severity,
                message: format!("position count moved {} bps day-over-day", bps),
            });
        }
    }

    let status = match anomalies.iter().map(|a| a.severity).max() {
        Some(Severity::Critical) => ReconcileStatus::Critical,
        Some(Severity::Warning) => ReconcileStatus::Warning,
        None => ReconcileStatus::Ok,
    };

    ReconcileReport {
        account_id: account_id.to_string(),
        business_date,
        status,
        anomalies,
        total_value_change_bps: value_bps,
        position_count_change_bps: count_bps,
        diff: compute_position_diff(current, previous),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rp(product: &str, mv: i64) -> ReconPosition {
        ReconPosition::new(product, 1_000_000, 1_000_000, mv)
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, 3).unwrap()
    }

    #[test]
    fn stable_book_is_ok() {
        let y = vec![rp("A", 100), rp("B", 100)];
        let t = vec![rp("A", 105), rp("B", 100)];
        let r = reconcile("1001", date(), &t, &y, &ReconcileThresholds::default());
        assert_eq!(r.status, ReconcileStatus::Ok);
        assert!(r.anomalies.is_empty());
    }

    #[test]
    fn value_swing_grades_warning_then_critical() {
        let y = vec![rp("A", 1_000)];

        // +30% value = warning
        let t = vec![rp("A", 1_300)];
        let r = reconcile("1001", date(), &t, &y, &ReconcileThresholds::default());
        assert_eq!(r.status, ReconcileStatus::Warning);

        // +60% value = critical
        let t = vec![rp("A", 1_600)];
        let r = reconcile("1001", date(), &t, &y, &ReconcileThresholds::default());
        assert_eq!(r.status, ReconcileStatus::Critical);
    }

    #[test]
    fn empty_today_with_positions_yesterday_is_missing_data() {
        let y = vec![rp("A", 100)];
        let r = reconcile("1001", date(), &[], &y, &ReconcileThresholds::default());
        assert_eq!(r.status, ReconcileStatus::Critical);
        assert!(r
            .anomalies
            .iter()
            .any(|a| a.kind == AnomalyKind::MissingData));
    }

    #[test]
    fn both_empty_is_ok() {
        let r = reconcile("1001", date(), &[], &[], &ReconcileThresholds::default());
        assert_eq!(r.status, ReconcileStatus::Ok);
    }
}
