//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "triggerbridge.toml",
    "./config/config.toml",
    "/etc/triggerbridge/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        match self.find_config_file() {
            Some(path) => {
                info!(?path, "Loading configuration from file");
                config = AppConfig::from_file(&path)?;
            }
            None => info!("No configuration file found, using defaults"),
        }

        apply_overrides(&mut config, |key| env::var(key).ok());

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!(?path, "Configured config file does not exist");
        }

        if let Ok(path) = env::var("TRIGGERBRIDGE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn set_parsed<T: FromStr>(target: &mut T, key: &str, value: Option<String>) {
    if let Some(raw) = value {
        match raw.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(key, value = %raw, "Ignoring unparseable override"),
        }
    }
}

fn set_string(target: &mut String, value: Option<String>) {
    if let Some(val) = value {
        *target = val;
    }
}

/// Apply `TRIGGERBRIDGE_*` overrides read through `lookup`.
pub(crate) fn apply_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // API
    set_string(&mut config.api.base_url, lookup("TRIGGERBRIDGE_API_BASE_URL"));
    set_string(&mut config.api.token_url, lookup("TRIGGERBRIDGE_TOKEN_URL"));
    set_string(&mut config.api.client_id, lookup("TRIGGERBRIDGE_CLIENT_ID"));
    set_string(&mut config.api.client_secret, lookup("TRIGGERBRIDGE_CLIENT_SECRET"));
    set_string(&mut config.api.scope, lookup("TRIGGERBRIDGE_TOKEN_SCOPE"));
    set_parsed(&mut config.api.token_ttl_secs, "TRIGGERBRIDGE_TOKEN_TTL_SECS", lookup("TRIGGERBRIDGE_TOKEN_TTL_SECS"));
    set_parsed(&mut config.api.max_retries, "TRIGGERBRIDGE_API_MAX_RETRIES", lookup("TRIGGERBRIDGE_API_MAX_RETRIES"));

    // Broker
    set_string(&mut config.broker.host, lookup("TRIGGERBRIDGE_BROKER_HOST"));
    set_parsed(&mut config.broker.port, "TRIGGERBRIDGE_BROKER_PORT", lookup("TRIGGERBRIDGE_BROKER_PORT"));
    set_string(&mut config.broker.username, lookup("TRIGGERBRIDGE_BROKER_USERNAME"));
    set_string(&mut config.broker.password, lookup("TRIGGERBRIDGE_BROKER_PASSWORD"));

    // Database
    set_string(&mut config.database.url, lookup("TRIGGERBRIDGE_DATABASE_URL"));
    set_parsed(&mut config.database.max_connections, "TRIGGERBRIDGE_DB_POOL_MAX", lookup("TRIGGERBRIDGE_DB_POOL_MAX"));
    set_parsed(&mut config.database.min_connections, "TRIGGERBRIDGE_DB_POOL_MIN", lookup("TRIGGERBRIDGE_DB_POOL_MIN"));
    set_parsed(
        &mut config.database.idle_timeout_ms,
        "TRIGGERBRIDGE_DB_IDLE_TIMEOUT_MS",
        lookup("TRIGGERBRIDGE_DB_IDLE_TIMEOUT_MS"),
    );

    // Bridge
    set_parsed(
        &mut config.bridge.max_concurrent_messages,
        "TRIGGERBRIDGE_MAX_CONCURRENT_MESSAGES",
        lookup("TRIGGERBRIDGE_MAX_CONCURRENT_MESSAGES"),
    );

    // Relay
    set_string(&mut config.relay.external.host, lookup("TRIGGERBRIDGE_RELAY_HOST"));
    set_parsed(&mut config.relay.external.port, "TRIGGERBRIDGE_RELAY_PORT", lookup("TRIGGERBRIDGE_RELAY_PORT"));
    set_string(&mut config.relay.external.username, lookup("TRIGGERBRIDGE_RELAY_USERNAME"));
    set_string(&mut config.relay.external.password, lookup("TRIGGERBRIDGE_RELAY_PASSWORD"));
    if let Some(topics) = lookup("TRIGGERBRIDGE_RELAY_TOPICS") {
        config.relay.topics = topics
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = AppConfig::default();
        apply_overrides(
            &mut config,
            lookup_from(&[
                ("TRIGGERBRIDGE_API_BASE_URL", "https://sap.example.com"),
                ("TRIGGERBRIDGE_BROKER_PORT", "1884"),
                ("TRIGGERBRIDGE_DB_POOL_MAX", "20"),
                ("TRIGGERBRIDGE_TOKEN_TTL_SECS", "600"),
                ("TRIGGERBRIDGE_RELAY_TOPICS", "a/#, b/+/c ,"),
            ]),
        );

        assert_eq!(config.api.base_url, "https://sap.example.com");
        assert_eq!(config.broker.port, 1884);
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.api.token_ttl_secs, 600);
        assert_eq!(config.relay.topics, vec!["a/#".to_string(), "b/+/c".to_string()]);
    }

    #[test]
    fn test_unparseable_override_is_ignored() {
        let mut config = AppConfig::default();
        apply_overrides(&mut config, lookup_from(&[("TRIGGERBRIDGE_BROKER_PORT", "not-a-port")]));
        assert_eq!(config.broker.port, 1883);
    }

    #[test]
    fn test_load_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        std::fs::write(
            &path,
            r#"
            [bridge]
            max_concurrent_messages = 4
            "#,
        )
        .unwrap();

        let config = ConfigLoader::with_path(&path).load().unwrap();
        assert_eq!(config.bridge.max_concurrent_messages, 4);
    }
}
