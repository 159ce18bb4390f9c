//! Bridge controller
//!
//! Turns one inbound trigger into exactly one [`PublishAction`]:
//!
//! ```text
//! Received -> Parsed -> Invoking -> Completed(success) -> success envelope on <base>/<orderId>
//!                                \-> Completed(failure) -> error envelope on the error topic
//!          \-> ParseFailed -> error envelope on the error topic (no invoke, no audit)
//!          \-> InvalidTopic -> error envelope on the error topic (audited, no invoke)
//! ```
//!
//! The order id becomes the last success topic level, so it must be a single
//! level free of MQTT wildcards. That is checked before the API is called.
//!
//! The controller never publishes; the dispatcher does.

use serde_json::Value;
use std::sync::Arc;
use tb_common::{ErrorEnvelope, InboundTrigger, SuccessEnvelope};
use tb_config::BrokerConfig;
use tracing::{info, info_span, warn, Instrument};

use crate::audit::AuditLogger;
use crate::error::BridgeError;
use crate::invoker::ApiInvoker;

#[derive(Debug, Clone)]
pub struct TopicConfig {
    pub success_topic_base: String,
    pub error_topic: String,
}

impl TopicConfig {
    pub fn from_broker_config(config: &BrokerConfig) -> Self {
        Self {
            success_topic_base: config.success_topic_base.clone(),
            error_topic: config.error_topic.clone(),
        }
    }

    /// `<base>/<orderId>`, rejecting ids that would not be a single publishable level
    pub fn success_topic(&self, order_id: &str) -> Result<String, BridgeError> {
        let topic = format!("{}/{}", self.success_topic_base.trim_end_matches('/'), order_id);
        match order_id.chars().find(|c| matches!(c, '/' | '+' | '#' | '\0')) {
            Some(c) => Err(BridgeError::InvalidTopic {
                topic,
                reason: format!("order id contains {:?}", c),
            }),
            None => Ok(topic),
        }
    }
}

/// The single terminal publish for one inbound trigger
#[derive(Debug, Clone, PartialEq)]
pub enum PublishAction {
    Success {
        topic: String,
        envelope: SuccessEnvelope,
    },
    Error {
        topic: String,
        envelope: ErrorEnvelope,
    },
}

impl PublishAction {
    pub fn topic(&self) -> &str {
        match self {
            PublishAction::Success { topic, .. } | PublishAction::Error { topic, .. } => topic,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PublishAction::Success { .. })
    }

    pub fn status_label(&self) -> &'static str {
        if self.is_success() {
            "success"
        } else {
            "error"
        }
    }

    pub fn payload(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            PublishAction::Success { envelope, .. } => serde_json::to_vec(envelope),
            PublishAction::Error { envelope, .. } => serde_json::to_vec(envelope),
        }
    }
}

pub struct BridgeController {
    invoker: Arc<ApiInvoker>,
    audit: AuditLogger,
    topics: TopicConfig,
}

impl BridgeController {
    pub fn new(invoker: Arc<ApiInvoker>, audit: AuditLogger, topics: TopicConfig) -> Self {
        Self {
            invoker,
            audit,
            topics,
        }
    }

    /// Process one inbound message and return what to publish
    pub async fn process(&self, topic: &str, payload: &[u8]) -> PublishAction {
        metrics::counter!("bridge.messages.received_total").increment(1);

        let (request, trigger) = match InboundTrigger::parse(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(topic, payload_len = payload.len(), error = %e, "Rejected trigger");
                return self.error_action(&BridgeError::Parse(e));
            }
        };

        let order_id = trigger.order_id();
        let span = info_span!("trigger", topic, order_id = %order_id, endpoint = %trigger.endpoint);

        self.handle_trigger(request, trigger, order_id)
            .instrument(span)
            .await
    }

    async fn handle_trigger(
        &self,
        request: Value,
        trigger: InboundTrigger,
        order_id: String,
    ) -> PublishAction {
        info!("Processing trigger");

        let success_topic = match self.topics.success_topic(&order_id) {
            Ok(topic) => topic,
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, "Refusing trigger with unpublishable order id");
                self.audit
                    .record(
                        &trigger.endpoint,
                        &trigger.params,
                        None,
                        e.envelope_code(),
                        Some(&message),
                    )
                    .await;
                return self.error_action(&e);
            }
        };

        match self.invoker.invoke(&trigger.endpoint, &trigger.params).await {
            Ok(outcome) => {
                self.audit
                    .record(
                        &trigger.endpoint,
                        &trigger.params,
                        Some(&outcome.data),
                        outcome.status,
                        None,
                    )
                    .await;

                PublishAction::Success {
                    topic: success_topic,
                    envelope: SuccessEnvelope::new(request, outcome.data),
                }
            }
            Err(e) => {
                let message = e.to_string();
                warn!(code = e.envelope_code(), error = %message, "Trigger failed");

                self.audit
                    .record(
                        &trigger.endpoint,
                        &trigger.params,
                        None,
                        e.envelope_code(),
                        Some(&message),
                    )
                    .await;

                self.error_action(&e)
            }
        }
    }

    fn error_action(&self, error: &BridgeError) -> PublishAction {
        PublishAction::Error {
            topic: self.topics.error_topic.clone(),
            envelope: ErrorEnvelope {
                error: error.to_string(),
                code: error.envelope_code(),
            },
        }
    }
}
