//! In-memory run progress, one board per business date.
//!
//! Queries never block behind workers: the per-account map sits behind a
//! short mutex and snapshots copy out.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountState {
    Pending,
    InProgress,
    Completed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountProgress {
    pub state: AccountState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub business_date: NaiveDate,
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub elapsed_secs: u64,
    /// `done/rate` extrapolation; absent until something finishes.
    pub estimated_remaining_secs: Option<u64>,
    pub accounts: HashMap<String, AccountProgress>,
}

struct RunBoard {
    started: Instant,
    accounts: HashMap<String, AccountProgress>,
}

/// All live run boards, keyed by business date.
#[derive(Default)]
pub struct ProgressTracker {
    runs: Mutex<HashMap<NaiveDate, RunBoard>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_run(&self, business_date: NaiveDate, account_ids: &[String]) {
        let accounts = account_ids
            .iter()
            .map(|a| {
                (
                    a.clone(),
                    AccountProgress {
                        state: AccountState::Pending,
                        started_at: None,
                        finished_at: None,
                        error: None,
                    },
                )
            })
            .collect();
        self.runs.lock().expect("progress lock poisoned").insert(
            business_date,
            RunBoard {
                started: Instant::now(),
                accounts,
            },
        );
    }

    pub fn mark_started(&self, business_date: NaiveDate, account_id: &str) {
        self.update(business_date, account_id, |p| {
            p.state = AccountState::InProgress;
            p.started_at = Some(Utc::now());
        });
    }

    pub fn mark_finished(
        &self,
        business_date: NaiveDate,
        account_id: &str,
        state: AccountState,
        error: Option<String>,
    ) {
        self.update(business_date, account_id, |p| {
            p.state = state;
            p.finished_at = Some(Utc::now());
            p.error = error;
        });
    }

    fn update(
        &self,
        business_date: NaiveDate,
        account_id: &str,
        f: impl FnOnce(&mut AccountProgress),
    ) {
        let mut runs = self.runs.lock().expect("progress lock poisoned");
        if let Some(board) = runs.get_mut(&business_date) {
            if let Some(p) = board.accounts.get_mut(account_id) {
                f(p);
            }
        }
    }

    pub fn snapshot(&self, business_date: NaiveDate) -> Option<ProgressSnapshot> {
        let runs = self.runs.lock().expect("progress lock poisoned");
        let board = runs.get(&business_date)?;

        let mut snap = ProgressSnapshot {
            business_date,
            total: board.accounts.len(),
            pending: 0,
            in_progress: 0,
            completed: 0,
            skipped: 0,
            failed: 0,
            elapsed_secs: board.started.elapsed().as_secs(),
            estimated_remaining_secs: None,
            accounts: board.accounts.clone(),
        };
        for p in board.accounts.values() {
            match p.state {
                AccountState::Pending => snap.pending += 1,
                AccountState::InProgress => snap.in_progress += 1,
                AccountState::Completed => snap.completed += 1,
                AccountState::Skipped => snap.skipped += 1,
                AccountState::Failed => snap.failed += 1,
            }
        }

        let done = snap.completed + snap.skipped + snap.failed;
        if done > 0 {
            let remaining = snap.total.saturating_sub(done);
            let per_account = board.started.elapsed().as_secs_f64() / done as f64;
            snap.estimated_remaining_secs = Some((per_account * remaining as f64) as u64);
        }
        Some(snap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, 3).unwrap()
    }

    #[test]
    fn counts_track_transitions() {
        let t = ProgressTracker::new();
        let accounts: Vec<String> = (0..3).map(|i| format!("A{i}")).collect();
        t.start_run(date(), &accounts);

        t.mark_started(date(), "A0");
        t.mark_finished(date(), "A0", AccountState::Completed, None);
        t.mark_started(date(), "A1");
        t.mark_finished(date(), "A1", AccountState::Failed, Some("TIMEOUT".to_string()));

        let s = t.snapshot(date()).unwrap();
        assert_eq!(s.total, 3);
        assert_eq!(s.pending, 1);
        assert_eq!(s.completed, 1);
        assert_eq!(s.failed, 1);
        assert!(s.estimated_remaining_secs.is_some());
        assert_eq!(
            s.accounts["A1"].error.as_deref(),
            Some("TIMEOUT")
        );
    }

    #[test]
    fn snapshot_of_unknown_run_is_none() {
        let t = ProgressTracker::new();
        assert!(t.snapshot(date()).is_none());
    }
}
