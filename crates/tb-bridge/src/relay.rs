//! External event relay
//!
//! Consumes business events from the plant's external broker and turns
//! `ProcessOrderCreate` events into trigger messages on the internal broker.
//! Every step is written to the message/event logs on a best-effort basis.

use serde_json::{json, Value};
use std::sync::Arc;
use tb_broker::{topic_matches, BrokerPublisher, InboundStream};
use tb_common::{BrokerSide, EventLogRecord, MessageLogRecord};
use tracing::{debug, error, info, warn};

use crate::audit::AuditLogger;

pub const PROCESS_ORDER_CREATE: &str = "ProcessOrderCreate";
pub const EVENT_LOCATION: &str = "External MQTT";

const TRIGGER_ACTION: &str = "getProcessOrder";
const TRIGGER_SUFFIX: &str = "processorder";

pub mod status {
    pub const RECEIVED: &str = "Received";
    pub const PUBLISHED: &str = "Published";
    pub const ERROR: &str = "Error";
    pub const INVALID_JSON: &str = "Error: Invalid JSON";
    pub const NO_EVENT_TYPE: &str = "Error: No event type";
    pub const INVALID_PAYLOAD: &str = "Error: Invalid payload";
}

/// What the relay did with one external message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    InvalidJson,
    MissingEventType,
    Ignored { event_type: String },
    InvalidPayload,
    Published { topic: String },
    PublishFailed { topic: String, error: String },
    Unsubscribed,
}

pub struct EventRelay {
    internal: Arc<dyn BrokerPublisher>,
    audit: AuditLogger,
    topics: Vec<String>,
    trigger_topic_base: String,
}

impl EventRelay {
    /// `topics` are the external filters this relay accepts; empty accepts all
    pub fn new(
        internal: Arc<dyn BrokerPublisher>,
        audit: AuditLogger,
        topics: Vec<String>,
        trigger_topic_base: impl Into<String>,
    ) -> Self {
        Self {
            internal,
            audit,
            topics,
            trigger_topic_base: trigger_topic_base.into(),
        }
    }

    pub fn trigger_topic(&self) -> String {
        format!("{}{}", self.trigger_topic_base, TRIGGER_SUFFIX)
    }

    /// Handle messages sequentially until the stream closes
    pub async fn run(&self, mut inbound: InboundStream) {
        while let Some(message) = inbound.recv().await {
            let outcome = self.handle(&message.topic, &message.payload).await;
            debug!(topic = %message.topic, ?outcome, "External message handled");
        }
        info!("External stream closed");
    }

    pub async fn handle(&self, topic: &str, payload: &[u8]) -> RelayOutcome {
        if !self.topics.is_empty() && !self.topics.iter().any(|f| topic_matches(f, topic)) {
            debug!(topic, "Message outside subscribed topics");
            return RelayOutcome::Unsubscribed;
        }

        let event: Value = match serde_json::from_slice(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(topic, error = %e, "Invalid JSON on external broker");
                let raw = String::from_utf8_lossy(payload).into_owned();
                self.log_message(
                    topic,
                    json!({"topic": topic, "raw_payload": raw, "error": e.to_string()}),
                    BrokerSide::External,
                    status::INVALID_JSON,
                )
                .await;
                return RelayOutcome::InvalidJson;
            }
        };

        self.log_message(topic, event.clone(), BrokerSide::External, status::RECEIVED)
            .await;

        let event_type = match event.get("event").and_then(Value::as_str) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => {
                warn!(topic, "External message has no event type");
                self.log_message(topic, event, BrokerSide::External, status::NO_EVENT_TYPE)
                    .await;
                return RelayOutcome::MissingEventType;
            }
        };

        info!(topic, event_type = %event_type, "External event received");
        self.log_event(&event_type, event.clone(), status::RECEIVED).await;

        if event_type != PROCESS_ORDER_CREATE {
            debug!(event_type = %event_type, "No handler for event type");
            return RelayOutcome::Ignored { event_type };
        }

        self.relay_process_order(topic, &event_type, event).await
    }

    async fn relay_process_order(&self, topic: &str, event_type: &str, event: Value) -> RelayOutcome {
        let order_number = match event.get("orderNumber").and_then(order_number_text) {
            Some(n) => n,
            None => {
                warn!(topic, "ProcessOrderCreate without orderNumber");
                let error_payload = json!({
                    "original_payload": event,
                    "error": "Missing orderNumber"
                });
                self.log_message(
                    topic,
                    error_payload.clone(),
                    BrokerSide::External,
                    status::INVALID_PAYLOAD,
                )
                .await;
                self.log_event(event_type, error_payload, status::ERROR).await;
                return RelayOutcome::InvalidPayload;
            }
        };

        let trigger = json!({
            "action": TRIGGER_ACTION,
            "params": { "orderId": order_number },
            "endpoint": format!("/processorders/{}", order_number),
        });
        let trigger_topic = self.trigger_topic();

        let payload = trigger.to_string().into_bytes();
        match self.internal.publish(&trigger_topic, payload).await {
            Ok(()) => {
                info!(order_number = %order_number, topic = %trigger_topic, "Trigger published");
                self.log_message(&trigger_topic, trigger, BrokerSide::Internal, status::PUBLISHED)
                    .await;
                RelayOutcome::Published {
                    topic: trigger_topic,
                }
            }
            Err(e) => {
                error!(order_number = %order_number, error = %e, "Failed to publish trigger");
                RelayOutcome::PublishFailed {
                    topic: trigger_topic,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn log_message(&self, topic: &str, payload: Value, broker: BrokerSide, status: &str) {
        self.audit
            .record_message(MessageLogRecord::new(topic, payload, broker, status))
            .await;
    }

    async fn log_event(&self, event_type: &str, payload: Value, status: &str) {
        self.audit
            .record_event(EventLogRecord::new(event_type, payload, status, EVENT_LOCATION))
            .await;
    }
}

fn order_number_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tb_audit::{MemoryAuditStore, StoreHandle};
    use tb_broker::RecordingPublisher;

    const BASE: &str = "ACME/China/Pinghu/Area1/Internal/TriggerAPI/";

    fn relay(topics: Vec<String>) -> (EventRelay, Arc<RecordingPublisher>, Arc<MemoryAuditStore>) {
        let publisher = Arc::new(RecordingPublisher::new());
        let store = Arc::new(MemoryAuditStore::new());
        let audit = AuditLogger::new(
            Arc::new(StoreHandle::connected(store.clone())),
            Duration::from_secs(1),
        );
        let relay = EventRelay::new(publisher.clone(), audit, topics, BASE);
        (relay, publisher, store)
    }

    #[tokio::test]
    async fn test_process_order_create_publishes_trigger() {
        let (relay, publisher, store) = relay(vec![]);
        let body = br#"{"event":"ProcessOrderCreate","orderNumber":"1000123"}"#;

        let outcome = relay.handle("plant/events", body).await;
        let expected_topic = format!("{}processorder", BASE);
        assert_eq!(outcome, RelayOutcome::Published { topic: expected_topic.clone() });

        let sent = publisher.published_to(&expected_topic);
        assert_eq!(sent.len(), 1);
        let trigger: Value = serde_json::from_slice(&sent[0].payload).unwrap();
        assert_eq!(
            trigger,
            json!({
                "action": "getProcessOrder",
                "params": {"orderId": "1000123"},
                "endpoint": "/processorders/1000123"
            })
        );

        let statuses: Vec<_> = store.messages().iter().map(|m| m.status.clone()).collect();
        assert_eq!(statuses, vec![status::RECEIVED, status::PUBLISHED]);
        assert_eq!(store.messages()[1].broker, BrokerSide::Internal);

        let events = store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, PROCESS_ORDER_CREATE);
        assert_eq!(events[0].location, EVENT_LOCATION);
    }

    #[tokio::test]
    async fn test_invalid_json_is_logged() {
        let (relay, publisher, store) = relay(vec![]);

        let outcome = relay.handle("plant/events", b"{oops").await;
        assert_eq!(outcome, RelayOutcome::InvalidJson);
        assert!(publisher.is_empty());

        let messages = store.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, status::INVALID_JSON);
        assert_eq!(messages[0].topic, "plant/events");
        assert_eq!(messages[0].payload["topic"], "plant/events");
        assert_eq!(messages[0].payload["raw_payload"], "{oops");
    }

    #[tokio::test]
    async fn test_missing_event_type() {
        let (relay, publisher, store) = relay(vec![]);

        let outcome = relay.handle("plant/events", br#"{"orderNumber":"1"}"#).await;
        assert_eq!(outcome, RelayOutcome::MissingEventType);
        assert!(publisher.is_empty());
        assert_eq!(store.messages().last().unwrap().status, status::NO_EVENT_TYPE);
        assert!(store.events().is_empty());
    }

    #[tokio::test]
    async fn test_missing_order_number() {
        let (relay, publisher, store) = relay(vec![]);

        let outcome = relay
            .handle("plant/events", br#"{"event":"ProcessOrderCreate"}"#)
            .await;
        assert_eq!(outcome, RelayOutcome::InvalidPayload);
        assert!(publisher.is_empty());
        assert_eq!(store.messages().last().unwrap().status, status::INVALID_PAYLOAD);
        assert_eq!(store.events().last().unwrap().status, status::ERROR);
    }

    #[tokio::test]
    async fn test_unknown_event_is_ignored() {
        let (relay, publisher, store) = relay(vec![]);

        let outcome = relay
            .handle("plant/events", br#"{"event":"ShiftStarted"}"#)
            .await;
        assert_eq!(
            outcome,
            RelayOutcome::Ignored { event_type: "ShiftStarted".to_string() }
        );
        assert!(publisher.is_empty());
        assert_eq!(store.events().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported() {
        let (relay, publisher, store) = relay(vec![]);
        publisher.set_failing(true);

        let outcome = relay
            .handle("plant/events", br#"{"event":"ProcessOrderCreate","orderNumber":42}"#)
            .await;
        assert!(matches!(outcome, RelayOutcome::PublishFailed { .. }));
        assert!(!store.messages().iter().any(|m| m.status == status::PUBLISHED));
    }

    #[tokio::test]
    async fn test_topic_filter() {
        let (relay, _publisher, store) = relay(vec!["plant/+/events".to_string()]);

        let outcome = relay
            .handle("other/events", br#"{"event":"ShiftStarted"}"#)
            .await;
        assert_eq!(outcome, RelayOutcome::Unsubscribed);
        assert!(store.messages().is_empty());

        let outcome = relay
            .handle("plant/line1/events", br#"{"event":"ShiftStarted"}"#)
            .await;
        assert!(matches!(outcome, RelayOutcome::Ignored { .. }));
    }
}
