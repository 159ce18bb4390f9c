use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

pub mod logging;

/// Correlation id used when a trigger carries no `params.orderId`.
pub const UNKNOWN_ORDER_ID: &str = "unknown";

/// HTTP method recorded for every API audit row.
pub const API_METHOD: &str = "GET";

// ============================================================================
// Inbound Trigger
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TriggerParseError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Trigger payload must be a JSON object")]
    NotAnObject,

    #[error("Missing endpoint")]
    MissingEndpoint,

    #[error("params must be a JSON object")]
    InvalidParams,
}

/// A request to invoke one external API endpoint.
///
/// Wire format: `{ "endpoint": "/orders", "params": { ... } }`, with
/// `params` optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundTrigger {
    pub endpoint: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl InboundTrigger {
    /// Parse a raw message body. Returns the decoded JSON document alongside
    /// the trigger so the caller can echo the original request.
    pub fn parse(payload: &[u8]) -> Result<(Value, Self), TriggerParseError> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| TriggerParseError::InvalidJson(e.to_string()))?;
        let trigger = Self::from_value(&value)?;
        Ok((value, trigger))
    }

    pub fn from_value(value: &Value) -> Result<Self, TriggerParseError> {
        let object = value.as_object().ok_or(TriggerParseError::NotAnObject)?;

        let endpoint = match object.get("endpoint") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => return Err(TriggerParseError::MissingEndpoint),
        };

        let params = match object.get("params") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => return Err(TriggerParseError::InvalidParams),
        };

        Ok(Self { endpoint, params })
    }

    /// Correlation id taken from `params.orderId`.
    pub fn order_id(&self) -> String {
        match self.params.get("orderId") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => UNKNOWN_ORDER_ID.to_string(),
        }
    }
}

/// Flatten a parameter mapping into query pairs.
///
/// Strings go through verbatim, scalars use their display form, nulls are
/// dropped, arrays become repeated keys and nested objects are sent as JSON.
pub fn query_pairs(params: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len());
    for (key, value) in params {
        match value {
            Value::Array(items) => {
                for item in items {
                    if let Some(s) = scalar_to_query(item) {
                        pairs.push((key.clone(), s));
                    }
                }
            }
            other => {
                if let Some(s) = scalar_to_query(other) {
                    pairs.push((key.clone(), s));
                }
            }
        }
    }
    pairs
}

fn scalar_to_query(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

// ============================================================================
// API Outcome
// ============================================================================

/// Result of one logical API invocation.
///
/// Only successful calls produce an outcome; failures surface as errors
/// carrying the last status and message. `success == true` implies a 2xx
/// status and no error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiOutcome {
    pub success: bool,
    pub status: u16,
    pub data: Value,
    pub error: Option<String>,
}

impl ApiOutcome {
    pub fn succeeded(status: u16, data: Value) -> Self {
        debug_assert!((200..300).contains(&status));
        Self {
            success: true,
            status,
            data,
            error: None,
        }
    }
}

// ============================================================================
// Outbound Envelopes
// ============================================================================

pub const SUCCESS_STATUS: &str = "success";

/// Published to the per-order topic after a successful invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessEnvelope {
    pub request: Value,
    pub response: Value,
    pub status: String,
}

impl SuccessEnvelope {
    pub fn new(request: Value, response: Value) -> Self {
        Self {
            request,
            response,
            status: SUCCESS_STATUS.to_string(),
        }
    }
}

/// Published to the shared error topic for every failed trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
    pub code: u16,
}

// ============================================================================
// Persistence Records
// ============================================================================

/// One row of the API audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub endpoint: String,
    pub method: String,
    pub params: Value,
    pub response_data: Option<Value>,
    pub status_code: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        endpoint: impl Into<String>,
        params: Value,
        response_data: Option<Value>,
        status_code: i32,
        error_message: Option<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: API_METHOD.to_string(),
            params,
            response_data,
            status_code,
            error_message,
            created_at: Utc::now(),
        }
    }
}

/// Which broker a logged message travelled through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerSide {
    External,
    Internal,
}

impl BrokerSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerSide::External => "External",
            BrokerSide::Internal => "Internal",
        }
    }
}

impl fmt::Display for BrokerSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A broker message seen or emitted by the event relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageLogRecord {
    pub topic: String,
    pub payload: Value,
    pub broker: BrokerSide,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl MessageLogRecord {
    pub fn new(topic: impl Into<String>, payload: Value, broker: BrokerSide, status: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            broker,
            status: status.into(),
            created_at: Utc::now(),
        }
    }
}

/// A business event received by the event relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLogRecord {
    pub event_type: String,
    pub payload: Value,
    pub status: String,
    pub location: String,
    pub created_at: DateTime<Utc>,
}

impl EventLogRecord {
    pub fn new(event_type: impl Into<String>, payload: Value, status: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            status: status.into(),
            location: location.into(),
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Connection State
// ============================================================================

/// Lifecycle of a long-lived connection (broker session or store pool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}
