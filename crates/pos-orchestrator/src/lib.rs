//! Parallel EOD orchestration.
//!
//! Fans the per-account engine out over thousands of accounts with a
//! semaphore-bounded worker pool: at most `max_concurrency` accounts are
//! IN_PROGRESS at once. One account's failure never touches another; the
//! orchestrator records it and moves on. A single global deadline bounds
//! the run — on expiry workers receive a cooperative cancel and in-flight
//! transactions finish naturally.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use pos_eod::{CancelFlag, EodEngine, EodError, EodOutcome};

pub mod progress;

pub use progress::{AccountProgress, AccountState, ProgressSnapshot, ProgressTracker};

// ---------------------------------------------------------------------------
// Configuration & result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrency: usize,
    pub per_account_timeout: Duration,
    pub global_timeout: Duration,
    /// Re-submit FAILED accounts once after a short backoff.
    pub retry_failed: bool,
    pub retry_backoff: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            max_concurrency: 50,
            per_account_timeout: Duration::from_secs(120),
            global_timeout: Duration::from_secs(30 * 60),
            retry_failed: true,
            retry_backoff: Duration::from_secs(2),
        }
    }
}

/// Per-account verdict carried in the run result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountResult {
    Completed,
    AlreadyCompleted,
    Skipped,
    Failed(String),
    /// Never started: the deadline expired while the account was queued.
    NotStarted,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub business_date: NaiveDate,
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub not_started: usize,
    pub timed_out: bool,
    pub elapsed: Duration,
    /// (account id, error) for every FAILED account, retries included.
    pub failures: Vec<(String, String)>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct EodOrchestrator {
    engine: Arc<EodEngine>,
    cfg: OrchestratorConfig,
    progress: Arc<ProgressTracker>,
}

impl EodOrchestrator {
    pub fn new(engine: Arc<EodEngine>, cfg: OrchestratorConfig) -> Self {
        EodOrchestrator {
            engine,
            cfg,
            progress: Arc::new(ProgressTracker::new()),
        }
    }

    pub fn progress(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.progress)
    }

    /// Run EOD for every account. No ordering between accounts; within one
    /// account all phases are strictly sequential.
    pub async fn process_all(&self, account_ids: Vec<String>, business_date: NaiveDate) -> RunResult {
        let started = Instant::now();
        let deadline = started + self.cfg.global_timeout;
        let cancel = CancelFlag::new();

        self.progress.start_run(business_date, &account_ids);

        let mut outcomes =
            self.run_pass(&account_ids, business_date, &cancel, deadline).await;

        // One retry of FAILED accounts after a short backoff, deadline
        // permitting.
        if self.cfg.retry_failed && !cancel.is_cancelled() {
            let retryable: Vec<String> = outcomes
                .iter()
                .filter_map(|(account, r)| match r {
                    AccountResult::Failed(_) => Some(account.clone()),
                    _ => None,
                })
                .collect();
            if !retryable.is_empty() && Instant::now() + self.cfg.retry_backoff < deadline {
                info!(count = retryable.len(), "retrying failed accounts once");
                tokio::time::sleep(self.cfg.retry_backoff).await;
                let second = self
                    .run_pass(&retryable, business_date, &cancel, deadline)
                    .await;
                for (account, outcome) in second {
                    if let Some(slot) = outcomes.iter_mut().find(|(a, _)| *a == account) {
                        // A NotStarted retry keeps the original failure.
                        if !matches!(outcome, AccountResult::NotStarted) {
                            slot.1 = outcome;
                        }
                    }
                }
            }
        }

        let mut result = RunResult {
            business_date,
            total: account_ids.len(),
            completed: 0,
            skipped: 0,
            failed: 0,
            not_started: 0,
            timed_out: cancel.is_cancelled(),
            elapsed: started.elapsed(),
            failures: Vec::new(),
        };
        for (account, outcome) in outcomes {
            match outcome {
                AccountResult::Completed | AccountResult::AlreadyCompleted => {
                    result.completed += 1
                }
                AccountResult::Skipped => result.skipped += 1,
                AccountResult::Failed(e) => {
                    result.failed += 1;
                    result.failures.push((account, e));
                }
                AccountResult::NotStarted => result.not_started += 1,
            }
        }

        info!(
            %business_date,
            total = result.total,
            completed = result.completed,
            skipped = result.skipped,
            failed = result.failed,
            not_started = result.not_started,
            timed_out = result.timed_out,
            elapsed_secs = result.elapsed.as_secs(),
            "EOD run finished"
        );
        result
    }

    async fn run_pass(
        &self,
        account_ids: &[String],
        business_date: NaiveDate,
        cancel: &CancelFlag,
        deadline: Instant,
    ) -> Vec<(String, AccountResult)> {
        let semaphore = Arc::new(Semaphore::new(self.cfg.max_concurrency));
        let mut tasks: JoinSet<(String, AccountResult)> = JoinSet::new();

        for account in account_ids {
            let account = account.clone();
            let engine = Arc::clone(&self.engine);
            let progress = Arc::clone(&self.progress);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let per_account_timeout = self.cfg.per_account_timeout;

            tasks.spawn(async move {
                // Acquire before starting; release is tied to the permit's
                // scope, so a panicking or failing worker still frees it.
                let Ok(_permit) = semaphore.acquire().await else {
                    return (account, AccountResult::NotStarted);
                };
                if cancel.is_cancelled() {
                    return (account, AccountResult::NotStarted);
                }

                progress.mark_started(business_date, &account);
                let outcome = match tokio::time::timeout(
                    per_account_timeout,
                    engine.process_eod(&account, business_date, &cancel),
                )
                .await
                {
                    Ok(Ok(EodOutcome::Completed { .. })) => AccountResult::Completed,
                    Ok(Ok(EodOutcome::AlreadyCompleted)) => AccountResult::AlreadyCompleted,
                    Ok(Ok(EodOutcome::Skipped(_))) => AccountResult::Skipped,
                    Ok(Err(EodError::Cancelled)) => {
                        AccountResult::Failed("CANCELLED".to_string())
                    }
                    Ok(Err(e)) => AccountResult::Failed(format!("{}: {e}", e.code())),
                    Err(_) => AccountResult::Failed("TIMEOUT".to_string()),
                };

                let (state, error) = match &outcome {
                    AccountResult::Completed | AccountResult::AlreadyCompleted => {
                        (AccountState::Completed, None)
                    }
                    AccountResult::Skipped => (AccountState::Skipped, None),
                    AccountResult::Failed(e) => (AccountState::Failed, Some(e.clone())),
                    AccountResult::NotStarted => (AccountState::Pending, None),
                };
                progress.mark_finished(business_date, &account, state, error);
                (account, outcome)
            });
        }

        let mut outcomes: Vec<(String, AccountResult)> = Vec::with_capacity(account_ids.len());
        let remaining = deadline.saturating_duration_since(Instant::now());
        let global_expiry = tokio::time::sleep(remaining);
        tokio::pin!(global_expiry);

        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    match joined {
                        Some(Ok(entry)) => outcomes.push(entry),
                        Some(Err(e)) => {
                            // A panicked worker affects only its own account.
                            warn!(error = %e, "EOD worker panicked");
                        }
                        None => break,
                    }
                }
                _ = &mut global_expiry, if !cancel.is_cancelled() => {
                    warn!(%business_date, "global deadline reached; cancelling remaining work");
                    cancel.cancel();
                }
            }
        }

        // Workers that never reported (panicked) count as not started.
        for account in account_ids {
            if !outcomes.iter().any(|(a, _)| a == account) {
                outcomes.push((account.clone(), AccountResult::NotStarted));
            }
        }
        outcomes
    }
}
