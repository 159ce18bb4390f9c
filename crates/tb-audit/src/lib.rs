//! Audit persistence for TriggerBridge
//!
//! Append-only tables:
//! - `api_responses_log`: one row per API invocation outcome
//! - `mqtt_messages_log`: broker messages seen or emitted by the event relay
//! - `events_log`: business events received by the event relay
//!
//! Stores are reached through a [`StoreHandle`], which is empty until the
//! connect loop has established a pool.

use async_trait::async_trait;
use std::sync::Arc;
use tb_common::{AuditRecord, EventLogRecord, MessageLogRecord};
use tb_config::DatabaseConfig;
use thiserror::Error;
use tracing::info;

pub mod handle;
pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use handle::StoreHandle;
pub use memory::MemoryAuditStore;

pub type Result<T> = std::result::Result<T, AuditError>;

/// Column limits shared by the SQL schemas
pub const MAX_ENDPOINT_LEN: usize = 500;
pub const MAX_ERROR_MESSAGE_LEN: usize = 1000;
pub const MAX_EVENT_TYPE_LEN: usize = 200;
pub const MAX_STATUS_LEN: usize = 100;
pub const MAX_LOCATION_LEN: usize = 100;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Audit write timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Unsupported database URL: {0}")]
    UnsupportedUrl(String),
}

#[cfg(any(feature = "postgres", feature = "sqlite"))]
impl From<sqlx::Error> for AuditError {
    fn from(e: sqlx::Error) -> Self {
        AuditError::Database(e.to_string())
    }
}

/// Append-only audit persistence
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Create tables if they do not exist
    async fn init_schema(&self) -> Result<()>;

    async fn append_api_response(&self, record: &AuditRecord) -> Result<()>;

    async fn append_message_log(&self, record: &MessageLogRecord) -> Result<()>;

    async fn append_event_log(&self, record: &EventLogRecord) -> Result<()>;
}

/// Cut `value` to at most `max` bytes on a char boundary.
pub fn truncate(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Open a pooled store for `config.url` and make sure its schema exists.
pub async fn connect_store(config: &DatabaseConfig) -> Result<Arc<dyn AuditStore>> {
    let url = config.url.as_str();

    #[cfg(feature = "postgres")]
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let store = postgres::PostgresAuditStore::connect(config).await?;
        store.init_schema().await?;
        info!("Connected to PostgreSQL audit store");
        return Ok(Arc::new(store));
    }

    #[cfg(feature = "sqlite")]
    if url.starts_with("sqlite:") {
        let store = sqlite::SqliteAuditStore::connect(config).await?;
        store.init_schema().await?;
        info!("Connected to SQLite audit store");
        return Ok(Arc::new(store));
    }

    Err(AuditError::UnsupportedUrl(redact_url(url)))
}

/// Strip credentials from a connection URL for logging.
pub fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}
