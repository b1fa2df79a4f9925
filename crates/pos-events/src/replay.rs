//! Dead-letter replay loop.
//!
//! Drains `<topic>.DLT` back onto the original topic in bounded batches.
//! Offsets are committed only after every record of the batch re-published,
//! so a failure at record k leaves offsets ≤ k-1 uncommitted and the DLT
//! intact for a later attempt (at-least-once, never drop).

use tracing::{info, warn};

use crate::bus::{BusError, BusRecord, MessageBus};

/// Upper bound on records per poll.
pub const MAX_REPLAY_BATCH: usize = 100;

/// Drain `<original_topic>.DLT`, re-publishing each record to
/// `original_topic` with its key preserved. Returns the number of records
/// replayed. Stops on the first empty poll.
pub async fn replay(bus: &dyn MessageBus, original_topic: &str) -> Result<usize, BusError> {
    let mut consumer = bus.dlt_consumer(original_topic);
    let mut total = 0usize;

    loop {
        let batch = consumer.poll(MAX_REPLAY_BATCH).await?;
        if batch.is_empty() {
            break;
        }
        let batch_len = batch.len();

        for record in batch {
            let republished = BusRecord {
                topic: original_topic.to_string(),
                key: record.key,
                payload: record.payload,
            };
            if let Err(e) = bus.publish(republished).await {
                warn!(
                    topic = original_topic,
                    replayed = total,
                    error = %e,
                    "replay aborted without commit; DLT preserved"
                );
                return Err(e);
            }
        }

        // Whole batch re-published — only now do offsets advance.
        consumer.commit().await?;
        total += batch_len;
    }

    info!(topic = original_topic, replayed = total, "DLT replay complete");
    Ok(total)
}
