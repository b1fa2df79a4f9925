//! Outbound event publication.
//!
//! Publication is fire-and-log: the position store is the source of truth
//! and the bus is a notification channel, so a failed enqueue is logged and
//! alerted on but never rolls back the operation that caused it. Missed
//! notifications are repaired by the DLQ replay and by reconciliation.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use pos_schemas::{Alert, AlertLevel, ClientSignOff, EventEnvelope, PositionChange};

use crate::bus::{
    BusRecord, MessageBus, TOPIC_CLIENT_SIGNOFF, TOPIC_POSITION_CHANGE, TOPIC_SYSTEM_ALERTS,
};

/// Something that accepts operational alerts. The breaker and the EOD
/// engine hold this narrow view rather than the whole publisher.
#[async_trait::async_trait]
pub trait AlertSink: Send + Sync {
    async fn alert(&self, alert: Alert);
}

/// Builds envelopes and publishes them, swallowing bus failures into logs.
pub struct EventPublisher {
    bus: Arc<dyn MessageBus>,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        EventPublisher { bus }
    }

    fn envelope<T: Serialize>(
        topic: &str,
        event_type: &str,
        key: &str,
        payload: &T,
    ) -> Option<BusRecord> {
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                error!(topic, event_type, error = %e, "event payload failed to serialize");
                return None;
            }
        };
        let env = EventEnvelope {
            event_id: Uuid::new_v4(),
            ts_utc: Utc::now(),
            topic: topic.to_string(),
            event_type: event_type.to_string(),
            key: key.to_string(),
            payload,
        };
        let value = match serde_json::to_value(&env) {
            Ok(v) => v,
            Err(e) => {
                error!(topic, event_type, error = %e, "event envelope failed to serialize");
                return None;
            }
        };
        Some(BusRecord {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: value,
        })
    }

    async fn fire(&self, record: Option<BusRecord>) {
        let Some(record) = record else { return };
        let topic = record.topic.clone();
        let key = record.key.clone();
        if let Err(e) = self.bus.publish(record).await {
            warn!(topic = %topic, key = %key, error = %e, "event publish failed; bus driver owns retry/DLT");
        }
    }

    /// Position-change notification, keyed by account id.
    pub async fn publish_change(&self, change: &PositionChange) {
        let record = Self::envelope(
            TOPIC_POSITION_CHANGE,
            change.event_type.as_str(),
            &change.account_id,
            change,
        );
        self.fire(record).await;
    }

    /// Client sign-off, keyed by client id.
    pub async fn publish_sign_off(&self, sign_off: &ClientSignOff) {
        let record = Self::envelope(
            TOPIC_CLIENT_SIGNOFF,
            "CLIENT_SIGN_OFF",
            &sign_off.client_id,
            sign_off,
        );
        self.fire(record).await;
    }

    /// Operational alert, keyed by the affected entity (or the source when
    /// no entity applies).
    pub async fn publish_alert(&self, alert: &Alert) {
        let key = alert
            .entity_id
            .clone()
            .unwrap_or_else(|| alert.source.clone());
        let record = Self::envelope(TOPIC_SYSTEM_ALERTS, alert.alert_type.as_str(), &key, alert);
        self.fire(record).await;
    }
}

#[async_trait::async_trait]
impl AlertSink for EventPublisher {
    async fn alert(&self, alert: Alert) {
        match alert.level {
            AlertLevel::Info => {}
            AlertLevel::Warning => {
                warn!(source = %alert.source, alert_type = %alert.alert_type, message = %alert.message, "alert")
            }
            AlertLevel::Critical | AlertLevel::Page => {
                error!(source = %alert.source, alert_type = %alert.alert_type, message = %alert.message, "alert")
            }
        }
        self.publish_alert(&alert).await;
    }
}
