//! rawsock server - standalone WebSocket echo service
//!
//! Wires configuration, logging, and the [`rawsock_ws`] engine into a
//! binary that logs every received message and echoes it back.
//!
//! # Example Usage
//!
//! ```bash
//! # Run with a configuration file
//! $ rawsock-server --config /etc/rawsock/server.toml
//!
//! # Run with environment variable overrides
//! $ RAWSOCK_PORT=9000 RAWSOCK_LOG_DIR=/var/log/rawsock rawsock-server
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod echo;
pub mod error;

pub use config::{ServerConfig, ServerSettings};
pub use echo::{build_server, echo, run_echo_server};
pub use error::{ServerError, ServerResult};

/// Server version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
