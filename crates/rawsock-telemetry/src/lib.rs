//! Logging for rawsock services.
//!
//! Everything in rawsock logs through `tracing` macros. This crate decides
//! where those events go:
//!
//! ```text
//! info!/warn!/error! ──┬──► EnvFilter ──► queue ──► thread ──► stdout (pretty | JSON)
//!                       │
//!                       ├──► EnvFilter ──► queue ──► thread ──► <dir>/<file_name>-YYYY-MM-DD.log
//!                       │
//!                       └──► EnvFilter + target ──► queue ──► thread ──► <dir>/<name>-YYYY-MM-DD.log
//! ```
//!
//! Logging is configured once at startup through [`LogConfig`] and
//! [`init_logging`]; the returned [`LogGuard`] must be kept alive so the
//! writer threads can flush on exit.

#![warn(missing_docs)]

pub mod error;
pub mod logging;
pub mod writer;

pub use error::TelemetryError;
pub use logging::{create_env_filter, init_logging, LogConfig, LogGuard};
pub use writer::{DailyFileWriter, NonBlocking};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
