//! OAuth2 client-credentials token cache
//!
//! One cache slot shared by every in-flight trigger. Reads take the read
//! lock; refreshes take the write lock and re-check the slot first, so
//! tasks queued behind a refresh reuse its token instead of fetching again.
//! Cached tokens live for a fixed TTL regardless of the `expires_in` the
//! token endpoint reports.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tb_config::ApiConfig;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};

const GRANT_TYPE: &str = "client_credentials";

#[derive(Clone)]
pub struct TokenManagerConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
    pub ttl: Duration,
}

impl TokenManagerConfig {
    pub fn from_api_config(config: &ApiConfig) -> Self {
        Self {
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: config.scope.clone(),
            ttl: config.token_ttl(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    scope: &'a str,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn new(access_token: String, ttl: Duration) -> Self {
        Self {
            access_token,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

pub struct TokenManager {
    http_client: Client,
    config: TokenManagerConfig,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
}

impl TokenManager {
    pub fn new(config: TokenManagerConfig, http_client: Client) -> Self {
        Self {
            http_client,
            config,
            cached_token: Arc::new(RwLock::new(None)),
        }
    }

    /// Get a valid access token, fetching one if the cache is empty or expired
    pub async fn get_token(&self) -> Result<String> {
        {
            let cached = self.cached_token.read().await;
            if let Some(ref token) = *cached {
                if token.is_valid() {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let mut cached = self.cached_token.write().await;

        // Another task may have refreshed while we waited for the write lock
        if let Some(ref token) = *cached {
            if token.is_valid() {
                return Ok(token.access_token.clone());
            }
        }

        let access_token = self.fetch_token().await?;
        *cached = Some(CachedToken::new(access_token.clone(), self.config.ttl));
        Ok(access_token)
    }

    /// Replace a token the API rejected.
    ///
    /// If the slot already holds a different, unexpired token (a concurrent
    /// task refreshed first) that token is returned without a new exchange.
    pub async fn reauthenticate(&self, rejected: &str) -> Result<String> {
        let mut cached = self.cached_token.write().await;

        if let Some(ref token) = *cached {
            if token.access_token != rejected && token.is_valid() {
                debug!("Reusing token refreshed by a concurrent request");
                return Ok(token.access_token.clone());
            }
        }

        *cached = None;
        let access_token = self.fetch_token().await?;
        *cached = Some(CachedToken::new(access_token.clone(), self.config.ttl));
        Ok(access_token)
    }

    /// Evict `rejected` if it is still the cached token
    pub async fn evict(&self, rejected: &str) {
        let mut cached = self.cached_token.write().await;
        if cached.as_ref().is_some_and(|t| t.access_token == rejected) {
            *cached = None;
        }
    }

    /// Invalidate the cached token (force refresh on next request)
    pub async fn invalidate(&self) {
        let mut cached = self.cached_token.write().await;
        *cached = None;
    }

    #[cfg(test)]
    pub(crate) async fn has_valid_token(&self) -> bool {
        self.cached_token
            .read()
            .await
            .as_ref()
            .is_some_and(CachedToken::is_valid)
    }

    async fn fetch_token(&self) -> Result<String> {
        metrics::counter!("bridge.token.fetches_total").increment(1);

        let request = TokenRequest {
            grant_type: GRANT_TYPE,
            scope: &self.config.scope,
        };

        let response = self
            .http_client
            .post(&self.config.token_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Token request failed");
                BridgeError::Auth {
                    status: None,
                    message: format!("Token request failed: {}", e),
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Token endpoint rejected client credentials");
            return Err(BridgeError::Auth {
                status: Some(status.as_u16()),
                message: format!("Token request failed with status {}: {}", status, body),
            });
        }

        let token: TokenResponse = response.json().await.map_err(|e| BridgeError::Auth {
            status: None,
            message: format!("Malformed token response: {}", e),
        })?;

        if token.access_token.is_empty() {
            return Err(BridgeError::Auth {
                status: None,
                message: "Malformed token response: empty access_token".to_string(),
            });
        }

        info!(
            token_len = token.access_token.len(),
            ttl_secs = self.config.ttl.as_secs(),
            "Fetched new access token"
        );
        Ok(token.access_token)
    }
}
