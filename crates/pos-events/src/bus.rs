//! Message-bus boundary.
//!
//! This module defines **only** the record shape and the bus/consumer
//! traits. No concrete driver lives here: the production Kafka client and
//! the in-memory test bus both implement these traits elsewhere.

use std::fmt;

use serde_json::Value;

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One record on a logical topic. `key` is the account or client id and
/// determines partitioning, which preserves per-entity ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusRecord {
    pub topic: String,
    pub key: String,
    pub payload: Value,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors a bus driver may surface.
#[derive(Debug)]
pub enum BusError {
    /// Transport failure after the driver's own retries were exhausted.
    Unavailable(String),
    /// The broker refused the record.
    Rejected(String),
    /// A payload could not be encoded or decoded.
    Codec(String),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Unavailable(m) => write!(f, "bus unavailable: {m}"),
            BusError::Rejected(m) => write!(f, "bus rejected record: {m}"),
            BusError::Codec(m) => write!(f, "bus codec failure: {m}"),
        }
    }
}

impl std::error::Error for BusError {}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Publish side of the bus. At-least-once: the driver retries until ack and
/// routes terminally failed records to `<topic>.DLT` on its own.
#[async_trait::async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, record: BusRecord) -> Result<(), BusError>;

    /// A transient consumer over `<original_topic>.DLT`, created with a
    /// fresh group id positioned at the earliest offset. Offsets advance
    /// only on [`DltConsumer::commit`].
    fn dlt_consumer(&self, original_topic: &str) -> Box<dyn DltConsumer>;
}

/// Bounded-batch consumer over a dead-letter topic.
#[async_trait::async_trait]
pub trait DltConsumer: Send {
    /// Next batch of at most `max` records; empty when the topic is drained.
    async fn poll(&mut self, max: usize) -> Result<Vec<BusRecord>, BusError>;

    /// Commit everything returned by polls since the last commit.
    async fn commit(&mut self) -> Result<(), BusError>;
}

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

pub const TOPIC_POSITION_CHANGE: &str = "POSITION_CHANGE_EVENTS";
pub const TOPIC_CLIENT_SIGNOFF: &str = "CLIENT_REPORTING_SIGNOFF";
pub const TOPIC_SYSTEM_ALERTS: &str = "SYSTEM_ALERTS";

/// Dead-letter topic naming convention.
pub fn dlt_topic(topic: &str) -> String {
    format!("{topic}.DLT")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlt_naming_convention() {
        assert_eq!(dlt_topic(TOPIC_POSITION_CHANGE), "POSITION_CHANGE_EVENTS.DLT");
    }
}
