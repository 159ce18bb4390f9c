//! In-memory publisher that records every publish.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{BrokerError, BrokerPublisher, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<PublishedMessage>>,
    fail: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail (simulates a dropped session)
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.published.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BrokerPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BrokerError::NotConnected);
        }
        self.published.lock().push(PublishedMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }
}
