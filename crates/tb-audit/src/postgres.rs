//! PostgreSQL audit store

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tb_common::{AuditRecord, EventLogRecord, MessageLogRecord};
use tb_config::DatabaseConfig;
use tracing::{debug, info};

use crate::{
    truncate, AuditStore, Result, MAX_ENDPOINT_LEN, MAX_ERROR_MESSAGE_LEN, MAX_EVENT_TYPE_LEN,
    MAX_LOCATION_LEN, MAX_STATUS_LEN,
};

pub struct PostgresAuditStore {
    pool: PgPool,
}

impl PostgresAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .min_connections(config.min_connections)
            .idle_timeout(config.idle_timeout())
            .connect(&config.url)
            .await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl AuditStore for PostgresAuditStore {
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS api_responses_log (
                id BIGSERIAL PRIMARY KEY,
                endpoint VARCHAR(500) NOT NULL,
                method VARCHAR(10) NOT NULL,
                request_params TEXT NOT NULL,
                response_data TEXT,
                status_code INTEGER NOT NULL,
                error_message VARCHAR(1000),
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mqtt_messages_log (
                id BIGSERIAL PRIMARY KEY,
                topic TEXT NOT NULL,
                payload TEXT NOT NULL,
                broker VARCHAR(20) NOT NULL,
                status VARCHAR(100) NOT NULL,
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events_log (
                id BIGSERIAL PRIMARY KEY,
                event_type VARCHAR(200) NOT NULL,
                payload TEXT NOT NULL,
                status VARCHAR(100) NOT NULL,
                location VARCHAR(100) NOT NULL,
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("PostgreSQL audit schema initialized");
        Ok(())
    }

    async fn append_api_response(&self, record: &AuditRecord) -> Result<()> {
        let params = serde_json::to_string(&record.params)?;
        let response = record.response_data.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            "INSERT INTO api_responses_log \
             (endpoint, method, request_params, response_data, status_code, error_message, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
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
            "INSERT INTO mqtt_messages_log (topic, payload, broker, status, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
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
            "INSERT INTO events_log (event_type, payload, status, location, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
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
