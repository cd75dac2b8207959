//! Error types for the rawsock server binary.

use thiserror::Error;

use rawsock_telemetry::TelemetryError;
use rawsock_ws::WsError;

/// Server-level errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// Logging could not be set up.
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    /// The WebSocket listener failed.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

impl ServerError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
