//! TriggerBridge Configuration System
//!
//! TOML-based configuration with `${VAR:-default}` placeholder expansion and
//! `TRIGGERBRIDGE_*` environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;
pub mod substitute;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub broker: BrokerConfig,
    pub database: DatabaseConfig,
    pub bridge: BridgeConfig,
    pub relay: RelayConfig,
}

/// External API and OAuth2 client-credentials settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
    /// Cache lifetime of an acquired token; kept below the real validity
    pub token_ttl_secs: u64,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_retries: u32,
    /// Backoff unit: attempt `i` waits `retry_base_delay_ms * (i + 1)`
    pub retry_base_delay_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            scope: "sap.read".to_string(),
            token_ttl_secs: 3000,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            max_retries: 3,
            retry_base_delay_ms: 1000,
        }
    }
}

impl ApiConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

/// Broker session configuration (MQTT)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Client identifier; generated when empty
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub tls: bool,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_secs: u64,
    pub channel_capacity: usize,
    /// Wildcard subscription for inbound triggers
    pub trigger_topic: String,
    /// Per-order success topics are `<success_topic_base>/<orderId>`
    pub success_topic_base: String,
    pub error_topic: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            client_id: String::new(),
            keep_alive_secs: 60,
            tls: false,
            reconnect_delay_ms: 1000,
            max_reconnect_delay_secs: 120,
            channel_capacity: 256,
            trigger_topic: "ACME/China/Pinghu/Area1/Internal/TriggerAPI/#".to_string(),
            success_topic_base: "ACME/China/Pinghu/Area1/SAP Workcenters/ProcessOrder".to_string(),
            error_topic: "/Internal/Errors/api".to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_delay_secs)
    }
}

/// Audit store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `postgres://...` or `sqlite://...`
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub idle_timeout_ms: u64,
    /// Fixed delay between connection attempts
    pub connect_retry_secs: u64,
    /// Upper bound for a single audit write
    pub write_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 0,
            idle_timeout_ms: 30_000,
            connect_retry_secs: 5,
            write_timeout_ms: 5_000,
        }
    }
}

impl DatabaseConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_secs(self.connect_retry_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Bridge dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub max_concurrent_messages: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_messages: 32,
        }
    }
}

/// External event relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub external: BrokerConfig,
    /// Topic filters consumed on the external broker
    pub topics: Vec<String>,
    /// Internal trigger topics are `<trigger_topic_base><suffix>`
    pub trigger_topic_base: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            external: BrokerConfig {
                port: 8883,
                tls: true,
                ..BrokerConfig::default()
            },
            topics: Vec::new(),
            trigger_topic_base: "ACME/China/Pinghu/Area1/Internal/TriggerAPI/".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, expanding `${VAR}` placeholders
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&substitute::substitute_env(&content))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from the standard locations with environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Check the settings the bridge cannot run without
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("api.base_url", &self.api.base_url),
            ("api.token_url", &self.api.token_url),
            ("api.client_id", &self.api.client_id),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!("{} must be set", name)));
            }
        }
        if self.api.max_retries == 0 {
            return Err(ConfigError::ValidationError("api.max_retries must be at least 1".to_string()));
        }
        if self.bridge.max_concurrent_messages == 0 {
            return Err(ConfigError::ValidationError(
                "bridge.max_concurrent_messages must be at least 1".to_string(),
            ));
        }
        if self.broker.channel_capacity == 0 {
            return Err(ConfigError::ValidationError("broker.channel_capacity must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# TriggerBridge Configuration
# ${VAR} and ${VAR:-default} are expanded from the environment.
# TRIGGERBRIDGE_* environment variables override these settings.

[api]
base_url = "${SAP_BASE_URL}"
token_url = "${SAP_OAUTH_TOKEN_URL}"
client_id = "${SAP_OAUTH_CLIENT_ID}"
client_secret = "${SAP_OAUTH_CLIENT_SECRET}"
scope = "sap.read"
token_ttl_secs = 3000
request_timeout_secs = 30
connect_timeout_secs = 10
max_retries = 3
retry_base_delay_ms = 1000

[broker]
host = "localhost"
port = 1883
username = "${MQTT_USER:-mes_user}"
password = "${MQTT_PASS:-mes_pass}"
keep_alive_secs = 60
tls = false
reconnect_delay_ms = 1000
max_reconnect_delay_secs = 120
channel_capacity = 256
trigger_topic = "ACME/China/Pinghu/Area1/Internal/TriggerAPI/#"
success_topic_base = "ACME/China/Pinghu/Area1/SAP Workcenters/ProcessOrder"
error_topic = "/Internal/Errors/api"

[database]
url = "postgres://${DB_USER}:${DB_PASSWORD}@${DB_SERVER:-localhost}/${DB_DATABASE:-mes}"
max_connections = 10
min_connections = 0
idle_timeout_ms = 30000
connect_retry_secs = 5
write_timeout_ms = 5000

[bridge]
max_concurrent_messages = 32

[relay]
topics = ["ACME/External/Events/#"]
trigger_topic_base = "ACME/China/Pinghu/Area1/Internal/TriggerAPI/"

[relay.external]
host = "${EXTERNAL_MQTT_HOST:-broker.example.com}"
port = 8883
tls = true
username = "${EXTERNAL_MQTT_USER}"
password = "${EXTERNAL_MQTT_PASS}"
"#
        .to_string()
    }
}
