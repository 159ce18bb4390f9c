//! Authenticated GET against the external API
//!
//! - One token per invocation, replaced after a 401
//! - Any 2xx ends the invocation
//! - Linear backoff between attempts: `base * (attempt + 1)`, nothing after
//!   the last attempt
//! - Non-401 failures (4xx, 5xx, transport) are retried the same way

use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tb_common::{query_pairs, ApiOutcome};
use tb_config::ApiConfig;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::token::TokenManager;

#[derive(Debug, Clone)]
pub struct InvokerConfig {
    pub base_url: String,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl InvokerConfig {
    pub fn from_api_config(config: &ApiConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay(),
        }
    }
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(1000),
        }
    }
}

/// Delay before the attempt following `attempt` (zero-based)
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt.saturating_add(1))
}

/// Join the base URL and an endpoint path with exactly one slash
pub fn join_url(base: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

/// Decode a 2xx body: JSON when it parses, a string otherwise, null when empty
pub fn decode_body(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

/// Why a single attempt failed
#[derive(Debug, Clone)]
struct AttemptFailure {
    status: Option<u16>,
    message: String,
}

impl AttemptFailure {
    fn is_unauthorized(&self) -> bool {
        self.status == Some(StatusCode::UNAUTHORIZED.as_u16())
    }
}

pub struct ApiInvoker {
    http_client: Client,
    tokens: Arc<TokenManager>,
    config: InvokerConfig,
}

impl ApiInvoker {
    pub fn new(config: InvokerConfig, tokens: Arc<TokenManager>, http_client: Client) -> Self {
        Self {
            http_client,
            tokens,
            config,
        }
    }

    /// Invoke with the configured retry budget
    pub async fn invoke(&self, endpoint: &str, params: &Map<String, Value>) -> Result<ApiOutcome> {
        self.invoke_with_retries(endpoint, params, self.config.max_retries)
            .await
    }

    pub async fn invoke_with_retries(
        &self,
        endpoint: &str,
        params: &Map<String, Value>,
        max_retries: u32,
    ) -> Result<ApiOutcome> {
        let attempts = max_retries.max(1);
        let url = join_url(&self.config.base_url, endpoint);
        let query = query_pairs(params);

        let mut token = self.tokens.get_token().await?;
        let mut last_failure = AttemptFailure {
            status: None,
            message: "No attempt made".to_string(),
        };

        for attempt in 0..attempts {
            let is_last = attempt + 1 == attempts;

            match self.invoke_once(&url, &query, &token).await {
                Ok(outcome) => {
                    info!(
                        endpoint,
                        status = outcome.status,
                        attempt = attempt + 1,
                        "API call succeeded"
                    );
                    return Ok(outcome);
                }
                Err(failure) => {
                    warn!(
                        endpoint,
                        status = ?failure.status,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %failure.message,
                        "API call failed"
                    );

                    if failure.is_unauthorized() {
                        if is_last {
                            self.tokens.evict(&token).await;
                        } else {
                            debug!(endpoint, "Token rejected, re-authenticating");
                            token = self.tokens.reauthenticate(&token).await?;
                        }
                    }

                    last_failure = failure;
                }
            }

            if !is_last {
                let delay = backoff_delay(self.config.retry_base_delay, attempt);
                debug!(endpoint, delay_ms = delay.as_millis() as u64, "Retrying API call");
                tokio::time::sleep(delay).await;
            }
        }

        Err(BridgeError::ApiCall {
            status: last_failure.status,
            message: last_failure.message,
            attempts,
        })
    }

    async fn invoke_once(
        &self,
        url: &str,
        query: &[(String, String)],
        token: &str,
    ) -> std::result::Result<ApiOutcome, AttemptFailure> {
        metrics::counter!("bridge.api.attempts_total").increment(1);

        let response = self
            .http_client
            .get(url)
            .query(query)
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| AttemptFailure {
                status: None,
                message: format!("Request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptFailure {
                status: Some(status.as_u16()),
                message: format!("Request failed with status code {}", status.as_u16()),
            });
        }

        let body = response.bytes().await.map_err(|e| AttemptFailure {
            status: Some(status.as_u16()),
            message: format!("Failed to read response body: {}", e),
        })?;

        Ok(ApiOutcome::succeeded(status.as_u16(), decode_body(&body)))
    }
}
