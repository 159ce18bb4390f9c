//! TriggerBridge event relay
//!
//! Listens for business events on the plant's external MQTT broker and turns
//! `ProcessOrderCreate` events into trigger messages on the internal broker,
//! where `tb-bridge` picks them up. Messages and events are logged to the
//! audit database when one is reachable.
//!
//! Uses the same configuration as `tb-bridge`; the external broker lives in
//! the `[relay]` section (`TRIGGERBRIDGE_RELAY_HOST`, `TRIGGERBRIDGE_RELAY_PORT`,
//! `TRIGGERBRIDGE_RELAY_USERNAME`, `TRIGGERBRIDGE_RELAY_PASSWORD`,
//! `TRIGGERBRIDGE_RELAY_TOPICS`).

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use tb_audit::{connect_store, redact_url, StoreHandle};
use tb_bridge::{AuditLogger, EventRelay};
use tb_broker::{close_session, MqttBroker};
use tb_config::ConfigLoader;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tb_common::logging::init_logging("tb-relay");

    info!("Starting TriggerBridge event relay");

    let config = ConfigLoader::new().load()?;
    if config.relay.topics.is_empty() {
        anyhow::bail!("relay.topics must list at least one external topic filter");
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    // The external session stops first so the relay can drain into the internal one
    let (external_shutdown_tx, _) = broadcast::channel::<()>(1);

    let store = Arc::new(StoreHandle::new());
    let store_task = if config.database.url.is_empty() {
        warn!("No database URL configured, message logging disabled");
        None
    } else {
        info!(url = %redact_url(&config.database.url), "Connecting to audit store");
        let db_config = config.database.clone();
        Some(store.spawn_connect_loop(
            move || {
                let db_config = db_config.clone();
                async move { connect_store(&db_config).await }
            },
            config.database.connect_retry_delay(),
            shutdown_tx.subscribe(),
        ))
    };

    // Internal session only publishes
    let MqttBroker {
        publisher: internal_publisher,
        event_loop: mut internal_loop,
        ..
    } = MqttBroker::connect(&config.broker, Vec::new(), shutdown_tx.subscribe());
    let internal_publisher = Arc::new(internal_publisher);

    let MqttBroker {
        publisher: external_publisher,
        inbound: external_inbound,
        event_loop: mut external_loop,
    } = MqttBroker::connect(
        &config.relay.external,
        config.relay.topics.clone(),
        external_shutdown_tx.subscribe(),
    );

    let relay = EventRelay::new(
        internal_publisher.clone(),
        AuditLogger::new(store.clone(), config.database.write_timeout()),
        config.relay.topics.clone(),
        config.relay.trigger_topic_base.clone(),
    );
    info!(
        topics = ?config.relay.topics,
        trigger_topic = %relay.trigger_topic(),
        "Event relay running"
    );

    let relay_handle = tokio::spawn(async move {
        relay.run(external_inbound).await;
    });

    info!("Press Ctrl+C to shutdown");
    shutdown_signal().await;
    info!("Shutdown signal received...");

    // Closing the external session ends its inbound stream; the relay drains
    // what was already received, then the internal session is flushed.
    let closed = close_session(&external_publisher, &mut external_loop, DISCONNECT_GRACE).await;
    let _ = external_shutdown_tx.send(());
    if !closed {
        let _ = external_loop.await;
    }

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, relay_handle).await {
        Ok(Ok(())) => info!("Relay drained"),
        Ok(Err(e)) => error!(error = %e, "Relay task failed"),
        Err(_) => warn!(timeout_secs = SHUTDOWN_TIMEOUT.as_secs(), "Shutdown timed out with events in flight"),
    }

    let closed = close_session(&internal_publisher, &mut internal_loop, DISCONNECT_GRACE).await;
    let _ = shutdown_tx.send(());
    if !closed {
        let _ = internal_loop.await;
    }
    if let Some(task) = store_task {
        let _ = task.await;
    }

    info!("Event relay shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
