//! TriggerBridge
//!
//! Subscribes to trigger messages on the internal MQTT broker, calls the
//! external ERP API for each one and publishes the outcome:
//! success envelopes to `<success_topic_base>/<orderId>`, error envelopes to
//! the shared error topic. Every invocation is audited to the configured
//! database when one is reachable.
//!
//! ## Configuration
//!
//! Read from `config.toml` (or `TRIGGERBRIDGE_CONFIG`) with `TRIGGERBRIDGE_*`
//! environment overrides; a `.env` file is loaded first if present.
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `TRIGGERBRIDGE_API_BASE_URL` | External API base URL |
//! | `TRIGGERBRIDGE_TOKEN_URL` | OAuth2 token endpoint |
//! | `TRIGGERBRIDGE_CLIENT_ID` / `TRIGGERBRIDGE_CLIENT_SECRET` | Client credentials |
//! | `TRIGGERBRIDGE_BROKER_HOST` / `TRIGGERBRIDGE_BROKER_PORT` | Internal broker |
//! | `TRIGGERBRIDGE_DATABASE_URL` | Audit database (`postgres://` or `sqlite:`); empty disables auditing |
//! | `LOG_FORMAT` | `json` for JSON logs |
//! | `RUST_LOG` | Log level (default `info`) |

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use tb_audit::{connect_store, redact_url, StoreHandle};
use tb_bridge::{build_controller, Dispatcher};
use tb_broker::{close_session, MqttBroker};
use tb_config::ConfigLoader;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for local development)
    let _ = dotenvy::dotenv();

    tb_common::logging::init_logging("tb-bridge");

    info!("Starting TriggerBridge");

    let config = ConfigLoader::new().load()?;
    config.validate()?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Audit store connects in the background; writes are skipped until it is up
    let store = Arc::new(StoreHandle::new());
    let store_task = if config.database.url.is_empty() {
        warn!("No database URL configured, audit logging disabled");
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

    let controller = Arc::new(build_controller(&config, store.clone())?);

    let MqttBroker {
        publisher,
        inbound,
        mut event_loop,
    } = MqttBroker::connect(
        &config.broker,
        vec![config.broker.trigger_topic.clone()],
        shutdown_tx.subscribe(),
    );
    let publisher = Arc::new(publisher);

    let dispatcher = Dispatcher::new(
        controller,
        publisher.clone(),
        config.bridge.max_concurrent_messages,
    );
    let (intake_tx, intake_rx) = broadcast::channel::<()>(1);
    let dispatcher_handle = tokio::spawn(async move {
        dispatcher.run(inbound, intake_rx).await;
    });

    info!(
        trigger_topic = %config.broker.trigger_topic,
        error_topic = %config.broker.error_topic,
        max_concurrent = config.bridge.max_concurrent_messages,
        "TriggerBridge running"
    );
    info!("Press Ctrl+C to shutdown");

    shutdown_signal().await;
    info!("Shutdown signal received...");

    // Stop intake first; outcomes of in-flight triggers still need the session
    if let Err(e) = publisher.unsubscribe(&config.broker.trigger_topic).await {
        warn!(error = %e, "Failed to unsubscribe trigger topic");
    }
    let _ = intake_tx.send(());

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, dispatcher_handle).await {
        Ok(Ok(())) => info!("In-flight triggers drained"),
        Ok(Err(e)) => error!(error = %e, "Dispatcher task failed"),
        Err(_) => warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out with messages in flight"
        ),
    }

    let closed = close_session(&publisher, &mut event_loop, DISCONNECT_GRACE).await;
    let _ = shutdown_tx.send(());
    if !closed {
        let _ = event_loop.await;
    }
    if let Some(task) = store_task {
        let _ = task.await;
    }

    info!("TriggerBridge shutdown complete");
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
