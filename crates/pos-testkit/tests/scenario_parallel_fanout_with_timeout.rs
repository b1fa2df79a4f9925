//! Scenario: bounded fan-out with one hanging account.
//!
//! 30 accounts, one of which stalls past the per-account deadline.
//! Expected: 29 COMPLETED, 1 FAILED:TIMEOUT, observed fetch concurrency
//! never exceeds the pool bound, and the run ends well inside the global
//! deadline.

use std::sync::Arc;
use std::time::Duration;

use pos_orchestrator::{EodOrchestrator, OrchestratorConfig};
use pos_testkit::{business_date, standard_snapshot, Harness};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_hanging_account_times_out_without_hurting_the_rest() {
    let h = Harness::new();
    let date = business_date();

    let accounts: Vec<String> = (0..30).map(|i| format!("A{i:02}")).collect();
    for account in &accounts {
        if account == "A17" {
            h.upstream.push_hang(
                Duration::from_millis(500),
                standard_snapshot(account, "CLI-1", date),
            );
        } else {
            // A small stall so overlap is observable for the bound check.
            h.upstream.push_hang(
                Duration::from_millis(20),
                standard_snapshot(account, "CLI-1", date),
            );
        }
    }

    let orchestrator = EodOrchestrator::new(
        Arc::clone(&h.engine),
        OrchestratorConfig {
            max_concurrency: 5,
            per_account_timeout: Duration::from_millis(150),
            global_timeout: Duration::from_secs(30),
            retry_failed: false,
            retry_backoff: Duration::from_millis(10),
        },
    );

    let result = orchestrator.process_all(accounts.clone(), date).await;

    assert_eq!(result.total, 30);
    assert_eq!(result.completed, 29);
    assert_eq!(result.failed, 1);
    assert!(!result.timed_out);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].0, "A17");
    assert_eq!(result.failures[0].1, "TIMEOUT");

    // The semaphore bound held the whole run.
    assert!(
        h.upstream.max_concurrent_fetches() <= 5,
        "observed {} concurrent fetches",
        h.upstream.max_concurrent_fetches()
    );

    // Progress board agrees.
    let snap = orchestrator.progress().snapshot(date).unwrap();
    assert_eq!(snap.completed, 29);
    assert_eq!(snap.failed, 1);
    assert_eq!(snap.accounts["A17"].error.as_deref(), Some("TIMEOUT"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_accounts_are_retried_once() {
    let h = Harness::new();
    let date = business_date();

    // First fetch fails terminally, second succeeds.
    h.upstream.push_failure(
        "B01",
        pos_upstream::UpstreamError::Decode("bad body".to_string()),
    );
    h.upstream.always(standard_snapshot("B01", "CLI-2", date));

    let orchestrator = EodOrchestrator::new(
        Arc::clone(&h.engine),
        OrchestratorConfig {
            max_concurrency: 2,
            per_account_timeout: Duration::from_secs(1),
            global_timeout: Duration::from_secs(10),
            retry_failed: true,
            retry_backoff: Duration::from_millis(10),
        },
    );

    let result = orchestrator.process_all(vec!["B01".to_string()], date).await;
    assert_eq!(result.completed, 1);
    assert_eq!(result.failed, 0);
    assert_eq!(h.upstream.call_count(), 2);
}
