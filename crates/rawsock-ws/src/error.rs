//! Error types for WebSocket operations.
//!
//! This module defines the errors that can occur while accepting a
//! connection, negotiating the upgrade handshake, decoding frames, and
//! dispatching decoded messages to the registered handler.

use thiserror::Error;

/// Result type for WebSocket operations.
pub type WsResult<T> = Result<T, WsError>;

/// Errors that can occur during WebSocket operations.
#[derive(Debug, Error)]
pub enum WsError {
    /// The upgrade request was malformed or carried unsupported headers.
    #[error("handshake rejected: {reason}")]
    HandshakeRejected {
        /// Why the request was rejected.
        reason: String,
    },

    /// The peer sent bytes that violate the framing rules.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The reassembly buffer cannot hold the bytes of an in-progress frame.
    #[error("reassembly buffer capacity exceeded: {requested} bytes requested, {available} available")]
    CapacityExceeded {
        /// Number of bytes that had to be stored.
        requested: usize,
        /// Number of bytes the buffer could still accept.
        available: usize,
    },

    /// The connection was closed, either by the peer or locally.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that was requested.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The registered message handler returned an error or panicked.
    #[error("message handler failed: {0}")]
    HandlerFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WsError {
    /// Create a new handshake rejected error.
    pub fn handshake_rejected(reason: impl Into<String>) -> Self {
        Self::HandshakeRejected {
            reason: reason.into(),
        }
    }

    /// Create a new protocol error.
    pub fn protocol_error(reason: impl Into<String>) -> Self {
        Self::ProtocolError(reason.into())
    }

    /// Create a new capacity exceeded error.
    pub fn capacity_exceeded(requested: usize, available: usize) -> Self {
        Self::CapacityExceeded {
            requested,
            available,
        }
    }

    /// Create a new connection closed error.
    pub fn connection_closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed(reason.into())
    }

    /// Create a new handler failed error.
    pub fn handler_failed(reason: impl Into<String>) -> Self {
        Self::HandlerFailed(reason.into())
    }

    /// Whether this error is a normal end of stream rather than a failure.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed(_))
    }
}
