//! Configuration for the rawsock server.
//!
//! Loaded from a TOML or JSON file, then overridden from `RAWSOCK_*`
//! environment variables:
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 9607
//!
//! [websocket]
//! buffer_capacity = 4096
//!
//! [logging]
//! level = "info"
//! directory = "logs"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use rawsock_telemetry::{create_env_filter, LogConfig};
use rawsock_ws::WebSocketConfig;

use crate::error::{ServerError, ServerResult};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 9607;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener settings.
    pub server: ServerSettings,
    /// Per-connection WebSocket settings.
    pub websocket: WebSocketConfig,
    /// Logging settings.
    pub logging: LogConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            websocket: WebSocketConfig::default(),
            logging: LogConfig::default().with_directory("logs"),
        }
    }
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a file.
    ///
    /// The format is picked from the extension: `.toml` or `.json`.
    pub fn from_file(path: impl AsRef<Path>) -> ServerResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::config(format!("failed to read config file: {e}")))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        match extension {
            "toml" => toml::from_str(&content)
                .map_err(|e| ServerError::config(format!("invalid TOML: {e}"))),
            "json" => serde_json::from_str(&content)
                .map_err(|e| ServerError::config(format!("invalid JSON: {e}"))),
            _ => Err(ServerError::config(format!(
                "unsupported config format: {extension}"
            ))),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// | Variable                  | Field                        |
    /// |---------------------------|------------------------------|
    /// | `RAWSOCK_HOST`            | `server.host`                |
    /// | `RAWSOCK_PORT`            | `server.port`                |
    /// | `RAWSOCK_BUFFER_CAPACITY` | `websocket.buffer_capacity`  |
    /// | `RAWSOCK_LOG_LEVEL`       | `logging.level`              |
    /// | `RAWSOCK_LOG_DIR`         | `logging.directory`          |
    ///
    /// Values that fail to parse are ignored.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(host) = lookup("RAWSOCK_HOST") {
            self.server.host = host;
        }

        if let Some(port) = lookup("RAWSOCK_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }

        if let Some(capacity) = lookup("RAWSOCK_BUFFER_CAPACITY") {
            if let Ok(capacity) = capacity.parse() {
                self.websocket.buffer_capacity = capacity;
            }
        }

        if let Some(level) = lookup("RAWSOCK_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(dir) = lookup("RAWSOCK_LOG_DIR") {
            self.logging.directory = Some(PathBuf::from(dir));
        }

        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ServerResult<()> {
        if self.server.host.is_empty() {
            return Err(ServerError::config("server.host is required"));
        }

        if self.websocket.buffer_capacity == 0 {
            return Err(ServerError::config(
                "websocket.buffer_capacity must be greater than 0",
            ));
        }

        if self.websocket.read_buffer_size < self.websocket.min_handshake_size {
            return Err(ServerError::config(format!(
                "websocket.read_buffer_size ({}) must be at least min_handshake_size ({})",
                self.websocket.read_buffer_size, self.websocket.min_handshake_size
            )));
        }

        if self.logging.file_name.is_empty() {
            return Err(ServerError::config("logging.file_name must not be empty"));
        }

        create_env_filter(&self.logging.level)?;

        Ok(())
    }

    /// The `host:port` string the server binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
