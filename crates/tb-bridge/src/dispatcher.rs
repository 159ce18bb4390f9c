//! Message dispatcher
//!
//! One task per inbound message, bounded by a semaphore. Each task runs the
//! controller and issues exactly one publish.
//!
//! On the stop signal the inbound stream is closed: messages already buffered
//! are still processed and every in-flight task finishes before `run` returns.

use std::sync::Arc;
use tb_broker::{BrokerPublisher, InboundMessage, InboundStream};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::controller::{BridgeController, PublishAction};

pub struct Dispatcher {
    controller: Arc<BridgeController>,
    publisher: Arc<dyn BrokerPublisher>,
    semaphore: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        controller: Arc<BridgeController>,
        publisher: Arc<dyn BrokerPublisher>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            controller,
            publisher,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Consume `inbound` until it closes or `stop` fires, then wait for
    /// in-flight messages.
    pub async fn run(&self, mut inbound: InboundStream, mut stop: broadcast::Receiver<()>) {
        let mut tasks = JoinSet::new();
        let mut stopping = false;

        loop {
            let message = if stopping {
                inbound.recv().await
            } else {
                tokio::select! {
                    _ = stop.recv() => {
                        info!(buffered = inbound.len(), "Stopping intake");
                        inbound.close();
                        stopping = true;
                        continue;
                    }
                    message = inbound.recv() => message,
                }
            };
            let Some(message) = message else { break };

            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    error!("Semaphore closed");
                    break;
                }
            };

            let controller = self.controller.clone();
            let publisher = self.publisher.clone();
            tasks.spawn(async move {
                handle_message(&controller, publisher.as_ref(), message).await;
                drop(permit);
            });

            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    error!(error = %e, "Message task failed");
                }
            }
        }

        info!(in_flight = tasks.len(), "Inbound stream closed, draining");
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Message task failed");
            }
        }
    }
}

/// Run the controller for one message and publish its result
pub async fn handle_message(
    controller: &BridgeController,
    publisher: &dyn BrokerPublisher,
    message: InboundMessage,
) -> PublishAction {
    let action = controller.process(&message.topic, &message.payload).await;
    publish_action(publisher, &action).await;
    action
}

async fn publish_action(publisher: &dyn BrokerPublisher, action: &PublishAction) {
    let payload = match action.payload() {
        Ok(payload) => payload,
        Err(e) => {
            error!(topic = action.topic(), error = %e, "Failed to serialize outcome");
            return;
        }
    };

    match publisher.publish(action.topic(), payload).await {
        Ok(()) => {
            metrics::counter!("bridge.messages.published_total", "status" => action.status_label())
                .increment(1);
            debug!(topic = action.topic(), status = action.status_label(), "Outcome published");
        }
        Err(e) => {
            error!(topic = action.topic(), error = %e, "Failed to publish outcome");
        }
    }
}
