//! TriggerBridge core
//!
//! Translates trigger messages from the internal broker into authenticated
//! calls against the external ERP API and publishes the outcome back:
//!
//! - [`TokenManager`]: client-credentials token cache
//! - [`ApiInvoker`]: GET with linear-backoff retry and 401 re-authentication
//! - [`AuditLogger`]: best-effort audit rows
//! - [`BridgeController`]: one trigger in, one [`PublishAction`] out
//! - [`Dispatcher`]: bounded-concurrency driver over an inbound stream
//! - [`EventRelay`]: external business events to trigger messages

use reqwest::Client;
use std::sync::Arc;
use tb_audit::StoreHandle;
use tb_config::{ApiConfig, AppConfig};

pub mod audit;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod invoker;
pub mod relay;
pub mod token;

pub use audit::AuditLogger;
pub use controller::{BridgeController, PublishAction, TopicConfig};
pub use dispatcher::{handle_message, Dispatcher};
pub use error::{BridgeError, Result, DEFAULT_ERROR_CODE};
pub use invoker::{backoff_delay, ApiInvoker, InvokerConfig};
pub use relay::{EventRelay, RelayOutcome};
pub use token::{TokenManager, TokenManagerConfig};

/// HTTP client shared by the token manager and the invoker
pub fn build_http_client(config: &ApiConfig) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(config.request_timeout())
        .connect_timeout(config.connect_timeout())
        .build()
}

/// Wire a controller from configuration around an existing store handle
pub fn build_controller(
    config: &AppConfig,
    store: Arc<StoreHandle>,
) -> reqwest::Result<BridgeController> {
    let http_client = build_http_client(&config.api)?;

    let tokens = Arc::new(TokenManager::new(
        TokenManagerConfig::from_api_config(&config.api),
        http_client.clone(),
    ));
    let invoker = Arc::new(ApiInvoker::new(
        InvokerConfig::from_api_config(&config.api),
        tokens,
        http_client,
    ));
    let audit = AuditLogger::new(store, config.database.write_timeout());

    Ok(BridgeController::new(
        invoker,
        audit,
        TopicConfig::from_broker_config(&config.broker),
    ))
}
