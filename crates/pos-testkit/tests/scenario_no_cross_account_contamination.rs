//! Scenario: one account's failure never touches another.
//!
//! Poisoning account A's staging insert leaves B's EOD untouched, and the
//! orchestrator never rolls back completed accounts to "align" with
//! failures.

use std::sync::Arc;
use std::time::Duration;

use pos_eod::PositionStore;
use pos_orchestrator::{EodOrchestrator, OrchestratorConfig};
use pos_schemas::EodState;
use pos_testkit::{business_date, standard_snapshot, Harness};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn poisoned_account_fails_alone() {
    let h = Harness::new();
    let date = business_date();

    h.upstream.always(standard_snapshot("AAA", "CLI-1", date));
    h.upstream.always(standard_snapshot("BBB", "CLI-1", date));
    h.store.fail_next_insert("AAA");

    let orchestrator = EodOrchestrator::new(
        Arc::clone(&h.engine),
        OrchestratorConfig {
            max_concurrency: 2,
            per_account_timeout: Duration::from_secs(1),
            global_timeout: Duration::from_secs(10),
            retry_failed: false,
            retry_backoff: Duration::from_millis(10),
        },
    );

    let result = orchestrator
        .process_all(vec!["AAA".to_string(), "BBB".to_string()], date)
        .await;

    assert_eq!(result.completed, 1);
    assert_eq!(result.failed, 1);
    assert_eq!(result.failures[0].0, "AAA");

    let a = h.store.get_eod_status("AAA", date).await.unwrap();
    let b = h.store.get_eod_status("BBB", date).await.unwrap();
    assert_eq!(a.state, EodState::Failed);
    assert_eq!(b.state, EodState::Completed);

    // B's batch is ACTIVE; A never activated anything.
    assert!(h.store.active_batch_of("BBB", date).is_some());
    assert!(h.store.active_batch_of("AAA", date).is_none());
}
