//! Bridge error types

use tb_common::TriggerParseError;
use thiserror::Error;

/// Status reported in the error envelope when a failure carries none
pub const DEFAULT_ERROR_CODE: u16 = 500;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Malformed or incomplete trigger; nothing was invoked
    #[error("Invalid trigger: {0}")]
    Parse(#[from] TriggerParseError),

    /// Token exchange failed
    #[error("Authentication failed: {message}")]
    Auth { status: Option<u16>, message: String },

    /// Every attempt against the external API failed
    #[error("{message}")]
    ApiCall {
        status: Option<u16>,
        message: String,
        attempts: u32,
    },

    /// The order id cannot form a publishable success topic
    #[error("Invalid success topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },
}

impl BridgeError {
    /// HTTP status carried by the failure, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            BridgeError::Parse(_) | BridgeError::InvalidTopic { .. } => None,
            BridgeError::Auth { status, .. } => *status,
            BridgeError::ApiCall { status, .. } => *status,
        }
    }

    /// Code for the error envelope and the audit row
    pub fn envelope_code(&self) -> u16 {
        self.status_code().unwrap_or(DEFAULT_ERROR_CODE)
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
