//! Broker transport for TriggerBridge
//!
//! - `BrokerPublisher`: the publish primitive the bridge and relay depend on
//! - `MqttBroker`: MQTT session with subscribe-on-connect and reconnect backoff
//! - `RecordingPublisher`: in-memory publisher for tests and dry runs

use async_trait::async_trait;
use bytes::Bytes;

pub mod error;
pub mod memory;
pub mod mqtt;

pub use error::BrokerError;
pub use memory::{PublishedMessage, RecordingPublisher};
pub use mqtt::{close_session, MqttBroker, MqttPublisher};

pub type Result<T> = std::result::Result<T, BrokerError>;

/// A message delivered by the broker on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Stream of inbound messages produced by a broker session
pub type InboundStream = tokio::sync::mpsc::Receiver<InboundMessage>;

/// Trait for publishing messages to the broker
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    /// Publish a payload to a topic (at-least-once, not retained)
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// MQTT topic filter matching with `+` (one level) and `#` (remaining levels).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(topic_matches("a/b/c", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
        assert!(!topic_matches("a/b", "a/b/c"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        let filter = "ACME/China/Pinghu/Area1/Internal/TriggerAPI/#";
        assert!(topic_matches(filter, "ACME/China/Pinghu/Area1/Internal/TriggerAPI/processorder"));
        assert!(topic_matches(filter, "ACME/China/Pinghu/Area1/Internal/TriggerAPI/a/b"));
        assert!(topic_matches(filter, "ACME/China/Pinghu/Area1/Internal/TriggerAPI"));
        assert!(!topic_matches(filter, "ACME/China/Pinghu/Area1/Internal/Other/x"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches("a/+/c", "a/b/c"));
        assert!(!topic_matches("a/+/c", "a/b/d"));
        assert!(!topic_matches("a/+", "a/b/c"));
    }

    #[test]
    fn test_leading_slash_topics() {
        assert!(topic_matches("/Internal/Errors/api", "/Internal/Errors/api"));
        assert!(topic_matches("/Internal/#", "/Internal/Errors/api"));
    }
}
