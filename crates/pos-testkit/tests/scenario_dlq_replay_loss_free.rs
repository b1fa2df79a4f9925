//! Scenario: dead-letter replay is loss-free.
//!
//! Every fully re-published batch commits its offsets; a publish failure
//! aborts the replay without committing, so the DLT still holds every
//! unreplayed record for the next attempt.

use pos_events::{dlt_topic, replay, BusRecord, TOPIC_POSITION_CHANGE};
use pos_testkit::MemoryBus;
use serde_json::json;

fn record(i: usize) -> BusRecord {
    BusRecord {
        topic: dlt_topic(TOPIC_POSITION_CHANGE),
        key: format!("ACC{i}"),
        payload: json!({"seq": i}),
    }
}

#[tokio::test]
async fn replay_drains_dlt_preserving_keys() {
    let bus = MemoryBus::new();
    bus.seed_dlt(TOPIC_POSITION_CHANGE, (0..5).map(record).collect());

    let replayed = replay(&bus, TOPIC_POSITION_CHANGE).await.unwrap();
    assert_eq!(replayed, 5);

    // DLT drained, originals re-published in order with keys intact.
    assert_eq!(bus.count(&dlt_topic(TOPIC_POSITION_CHANGE)), 0);
    let out = bus.records(TOPIC_POSITION_CHANGE);
    assert_eq!(out.len(), 5);
    assert_eq!(out[0].key, "ACC0");
    assert_eq!(out[4].key, "ACC4");
    assert_eq!(out[2].payload["seq"], 2);
}

#[tokio::test]
async fn replay_failure_commits_nothing_in_the_failing_batch() {
    let bus = MemoryBus::new();
    bus.seed_dlt(TOPIC_POSITION_CHANGE, (0..5).map(record).collect());

    // Third re-publish fails.
    bus.fail_publish_after(2);
    let err = replay(&bus, TOPIC_POSITION_CHANGE).await;
    assert!(err.is_err());

    // No commit happened: the DLT still holds all 5 records.
    assert_eq!(bus.count(&dlt_topic(TOPIC_POSITION_CHANGE)), 5);

    // A later attempt succeeds and re-delivers everything (at-least-once:
    // the two records published before the abort appear twice).
    bus.clear_failure();
    let replayed = replay(&bus, TOPIC_POSITION_CHANGE).await.unwrap();
    assert_eq!(replayed, 5);
    assert_eq!(bus.count(&dlt_topic(TOPIC_POSITION_CHANGE)), 0);
    assert_eq!(bus.count(TOPIC_POSITION_CHANGE), 7);
}

#[tokio::test]
async fn replay_commits_per_batch_across_batch_boundaries() {
    let bus = MemoryBus::new();
    bus.seed_dlt(TOPIC_POSITION_CHANGE, (0..250).map(record).collect());

    // Fail inside the second batch (after 100 + 50 publishes).
    bus.fail_publish_after(150);
    assert!(replay(&bus, TOPIC_POSITION_CHANGE).await.is_err());

    // Batch one (100 records) committed; batch two left intact.
    assert_eq!(bus.count(&dlt_topic(TOPIC_POSITION_CHANGE)), 150);
    assert_eq!(bus.count(TOPIC_POSITION_CHANGE), 150);
}
