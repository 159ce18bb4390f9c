//! SQLite audit store

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::time::Duration;
use tb_common::{AuditRecord, EventLogRecord, MessageLogRecord};
use tb_config::DatabaseConfig;
use tracing::{debug, info};

use crate::{
    truncate, AuditStore, Result, MAX_ENDPOINT_LEN, MAX_ERROR_MESSAGE_LEN, MAX_EVENT_TYPE_LEN,
    MAX_LOCATION_LEN, MAX_STATUS_LEN,
};

pub struct SqliteAuditStore {
    pool: SqlitePool,
}

impl SqliteAuditStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        // An in-memory database lives and dies with its single connection
        let in_memory = config.url.contains(":memory:");
        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new()
                .max_connections(config.max_connections.max(1))
                .min_connections(config.min_connections)
                .idle_timeout(config.idle_timeout())
        };

        let pool = options.connect(&config.url).await?;
        Ok(Self::new(pool))
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS api_responses_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                endpoint TEXT NOT NULL,
                method TEXT NOT NULL,
                request_params TEXT NOT NULL,
                response_data TEXT,
                status_code INTEGER NOT NULL,
                error_message TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mqtt_messages_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                topic TEXT NOT NULL,
                payload TEXT NOT NULL,
                broker TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL,
                location TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("SQLite audit schema initialized");
        Ok(())
    }

    async fn append_api_response(&self, record: &AuditRecord) -> Result<()> {
        let params = serde_json::to_string(&record.params)?;
        let response = record.response_data.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            "INSERT INTO api_responses_log \
             (endpoint, method, request_params, response_data, status_code, error_message, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(truncate(&record.endpoint, MAX_ENDPOINT_LEN))
        .bind(&record.method)
        .bind(params)
        .bind(response)
        .bind(record.status_code)
        .bind(record.error_message.as_deref().map(|m| truncate(m, MAX_ERROR_MESSAGE_LEN)))
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        debug!(endpoint = %record.endpoint, status_code = record.status_code, "API response logged");
        Ok(())
    }

    async fn append_message_log(&self, record: &MessageLogRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO mqtt_messages_log (topic, payload, broker, status, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.topic)
        .bind(serde_json::to_string(&record.payload)?)
        .bind(record.broker.as_str())
        .bind(truncate(&record.status, MAX_STATUS_LEN))
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_event_log(&self, record: &EventLogRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO events_log (event_type, payload, status, location, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(truncate(&record.event_type, MAX_EVENT_TYPE_LEN))
        .bind(serde_json::to_string(&record.payload)?)
        .bind(truncate(&record.status, MAX_STATUS_LEN))
        .bind(truncate(&record.location, MAX_LOCATION_LEN))
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
