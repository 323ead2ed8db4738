//! Error types for the webOS client.
//!
//! [`TvError`] is what every public operation returns. Failures reported by
//! the device itself are classified into [`ProtocolError`] and carried by
//! [`TvError::Protocol`].

use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Main error type for the webOS client.
#[derive(Debug, Error)]
pub enum TvError {
    // Connection errors
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<tungstenite::Error>>,
    },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("No response")]
    NoResponse,

    #[error("No free correlation token after {0} attempts")]
    TokensExhausted(usize),

    // Device errors
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    // Serialization errors
    #[error("Decode error: {message}")]
    Decode {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// Failures reported by the device, or responses that do not have the
/// expected shape.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("API error: {error}")]
    Api {
        error: String,
        detail: Option<Box<ProtocolError>>,
    },

    #[error("nil payload")]
    NilPayload,

    #[error("returnValue missing")]
    ReturnValueMissing,

    #[error("returnValue type is not bool")]
    ReturnValueNotBool,

    #[error("error {error_code}: {}", .error_text.as_deref().unwrap_or("<no text>"))]
    Failed {
        error_code: serde_json::Value,
        error_text: Option<String>,
    },

    #[error("returnValue: false, errorCode: nil")]
    FailedWithoutCode,

    #[error("unexpected API response type: {0}")]
    UnexpectedType(String),

    #[error("registration failed")]
    RegistrationFailed,

    #[error("client-key from TV is not a string")]
    ClientKeyNotString,
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, TvError>;

impl From<tungstenite::Error> for TvError {
    fn from(err: tungstenite::Error) -> Self {
        TvError::Transport {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<std::io::Error> for TvError {
    fn from(err: std::io::Error) -> Self {
        TvError::transport(err.to_string())
    }
}

impl From<serde_json::Error> for TvError {
    fn from(err: serde_json::Error) -> Self {
        TvError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl TvError {
    /// Create a transport error without an underlying websocket error.
    pub fn transport(message: impl Into<String>) -> Self {
        TvError::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a decode error for an inbound payload.
    pub fn decode(err: serde_json::Error, what: &str) -> Self {
        TvError::Decode {
            message: format!("{}: {}", what, err),
            source: Some(err),
        }
    }

    /// Check if retrying the same exchange might succeed.
    ///
    /// Only a timeout qualifies: the connection is still alive and the token
    /// has been released. The core itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TvError::Timeout(_))
    }

    /// Check if this error means the connection is gone for good.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            TvError::Transport { .. } | TvError::ConnectionClosed | TvError::NoResponse
        )
    }

    /// The classified device error, if this is one.
    pub fn protocol(&self) -> Option<&ProtocolError> {
        match self {
            TvError::Protocol(err) => Some(err),
            _ => None,
        }
    }
}
