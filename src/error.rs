//! Error types for the metrics collector, alerting and relay.

use thiserror::Error;

/// Result type alias for perfmon operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for perfmon operations
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metric payload does not match its declared kind
    #[error("Invalid metric: {0}")]
    InvalidMetric(String),

    /// Relay message failed shape validation
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Relay server lifecycle error
    #[error("Server error: {0}")]
    Server(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket protocol error (client side)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
    /// Whether the error comes from inbound data rather than from the relay itself
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::InvalidMetric(_) | Error::InvalidMessage(_))
    }
}
