//! Change-event publication and dead-letter replay.
//!
//! The concrete bus driver is a collaborator behind [`MessageBus`]; this
//! crate owns the topics, the envelope, fire-and-log publication and the
//! replay loop.

pub mod bus;
pub mod publisher;
pub mod replay;

pub use bus::{
    dlt_topic, BusError, BusRecord, DltConsumer, MessageBus, TOPIC_CLIENT_SIGNOFF,
    TOPIC_POSITION_CHANGE, TOPIC_SYSTEM_ALERTS,
};
pub use publisher::{AlertSink, EventPublisher};
pub use replay::{replay, MAX_REPLAY_BATCH};
