//! WebSocket configuration.
//!
//! This module defines the per-connection settings used by the frame
//! engine and the handshake processor.

use serde::{Deserialize, Serialize};

/// Default reassembly buffer capacity in bytes.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4 * 1024;

/// Default size of a single socket read in bytes.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4 * 1024;

/// Shortest first read accepted as an upgrade request.
pub const DEFAULT_MIN_HANDSHAKE_SIZE: usize = 64;

/// Configuration for a WebSocket connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Capacity of the frame reassembly buffer (default: 4 KB).
    ///
    /// A frame whose payload spans several reads must fit in this buffer,
    /// otherwise the connection is closed.
    pub buffer_capacity: usize,
    /// Bytes requested per socket read (default: 4 KB).
    pub read_buffer_size: usize,
    /// Minimum size of the first read for it to count as a handshake (default: 64).
    pub min_handshake_size: usize,
    /// Read only the low 4 bytes of a 64-bit extended length (default: false).
    pub legacy_length_prefix: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            min_handshake_size: DEFAULT_MIN_HANDSHAKE_SIZE,
            legacy_length_prefix: false,
        }
    }
}

impl WebSocketConfig {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reassembly buffer capacity.
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Set the read buffer size.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the minimum handshake size.
    pub fn min_handshake_size(mut self, size: usize) -> Self {
        self.min_handshake_size = size;
        self
    }

    /// Set whether 64-bit extended lengths are read from their low 4 bytes only.
    pub fn legacy_length_prefix(mut self, legacy: bool) -> Self {
        self.legacy_length_prefix = legacy;
        self
    }
}
