//! MQTT broker session
//!
//! One `AsyncClient` per session. The event loop runs on its own task:
//! - subscribes to every configured filter on each ConnAck (clean sessions)
//! - forwards inbound publishes to a bounded channel
//! - on connection errors marks the session disconnected and backs off,
//!   doubling from `reconnect_delay` up to `max_reconnect_delay`
//! - stops once its own DISCONNECT has been sent, or on the shutdown signal
//!
//! The loop keeps running after the inbound receiver goes away so outcomes
//! published during shutdown still reach the broker.

use async_trait::async_trait;
use parking_lot::RwLock;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport};
use std::sync::Arc;
use std::time::Duration;
use tb_common::ConnectionState;
use tb_config::BrokerConfig;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{BrokerError, BrokerPublisher, InboundMessage, InboundStream, Result};

/// Request queue depth between the client handle and its event loop
const CLIENT_REQUEST_CAPACITY: usize = 64;

/// Next reconnect delay after a failed attempt.
pub fn next_reconnect_delay(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// Publishing handle for an MQTT session
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    state: Arc<RwLock<ConnectionState>>,
}

impl MqttPublisher {
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Stop broker delivery for `topic`; messages already received still arrive
    pub async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| BrokerError::Subscribe {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }

    /// Send a DISCONNECT to the broker
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "Disconnect request failed");
        }
    }
}

/// Disconnect after every queued publish and wait up to `grace` for the
/// event loop to flush it. Returns `false` when the loop is still running.
pub async fn close_session(
    publisher: &MqttPublisher,
    event_loop: &mut JoinHandle<()>,
    grace: Duration,
) -> bool {
    info!(connected = publisher.is_connected(), "Closing MQTT session");
    publisher.disconnect().await;
    match tokio::time::timeout(grace, event_loop).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!(error = %e, "MQTT event loop task failed");
            true
        }
        Err(_) => false,
    }
}

#[async_trait]
impl BrokerPublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| BrokerError::Publish {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }
}

/// A running MQTT session
pub struct MqttBroker {
    pub publisher: MqttPublisher,
    pub inbound: InboundStream,
    pub event_loop: JoinHandle<()>,
}

impl MqttBroker {
    /// Open a session and start its event loop.
    ///
    /// The connection itself is established by the event loop; publishes
    /// issued before the first ConnAck are queued by the client.
    pub fn connect(
        config: &BrokerConfig,
        subscriptions: Vec<String>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let client_id = if config.client_id.is_empty() {
            format!("triggerbridge-{}", uuid::Uuid::new_v4())
        } else {
            config.client_id.clone()
        };

        let mut options = MqttOptions::new(client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive());
        if !config.username.is_empty() {
            options.set_credentials(config.username.clone(), config.password.clone());
        }
        if config.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, event_loop) = AsyncClient::new(options, CLIENT_REQUEST_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.channel_capacity.max(1));
        let state = Arc::new(RwLock::new(ConnectionState::Connecting));

        info!(
            host = %config.host,
            port = config.port,
            client_id = %client_id,
            tls = config.tls,
            subscriptions = ?subscriptions,
            "Connecting to MQTT broker"
        );

        let runner = EventLoopRunner {
            client: client.clone(),
            event_loop,
            subscriptions,
            inbound_tx,
            state: state.clone(),
            reconnect_delay: config.reconnect_delay(),
            max_reconnect_delay: config.max_reconnect_delay(),
        };
        let handle = tokio::spawn(runner.run(shutdown));

        Self {
            publisher: MqttPublisher { client, state },
            inbound: inbound_rx,
            event_loop: handle,
        }
    }
}

struct EventLoopRunner {
    client: AsyncClient,
    event_loop: EventLoop,
    subscriptions: Vec<String>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    state: Arc<RwLock<ConnectionState>>,
    reconnect_delay: Duration,
    max_reconnect_delay: Duration,
}

impl EventLoopRunner {
    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut delay = self.reconnect_delay;

        loop {
            let event = tokio::select! {
                _ = shutdown.recv() => {
                    info!("MQTT event loop shutting down");
                    break;
                }
                event = self.event_loop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    *self.state.write() = ConnectionState::Connected;
                    delay = self.reconnect_delay;
                    info!(code = ?ack.code, "MQTT connected");
                    self.subscribe_all();
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = InboundMessage {
                        topic: publish.topic,
                        payload: publish.payload,
                    };
                    if let Err(e) = self.inbound_tx.send(message).await {
                        debug!(topic = %e.0.topic, "Inbound intake closed, dropping message");
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!(pkid = ack.pkid, return_codes = ?ack.return_codes, "Subscription acknowledged");
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("MQTT disconnected");
                    break;
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("Broker sent DISCONNECT");
                    *self.state.write() = ConnectionState::Disconnected;
                }
                Ok(_) => {}
                Err(e) => {
                    *self.state.write() = ConnectionState::Disconnected;
                    let err = BrokerError::Connection(e.to_string());
                    error!(error = %err, retry_in_ms = delay.as_millis() as u64, "MQTT connection lost");

                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = next_reconnect_delay(delay, self.max_reconnect_delay);
                    *self.state.write() = ConnectionState::Connecting;
                    info!("MQTT reconnecting");
                }
            }
        }

        *self.state.write() = ConnectionState::Disconnected;
    }

    fn subscribe_all(&self) {
        for topic in &self.subscriptions {
            // try_subscribe: this task drives the event loop, so it must not
            // block on the request channel.
            match self.client.try_subscribe(topic.clone(), QoS::AtLeastOnce) {
                Ok(()) => info!(topic = %topic, "Subscribed"),
                Err(e) => {
                    let err = BrokerError::Subscribe {
                        topic: topic.clone(),
                        message: e.to_string(),
                    };
                    error!(error = %err, "Subscribe failed");
                }
            }
        }
    }
}
