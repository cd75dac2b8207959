//! Logging setup for rawsock.
//!
//! Installs a `tracing-subscriber` registry with these outputs:
//!
//! - stdout, pretty or JSON
//! - a dated file per day under a configured directory
//! - one extra dated file per entry in [`LogConfig::target_files`], holding
//!   only events whose target starts with that entry's key
//!
//! Every output is fed by its own background thread (see [`crate::writer`]),
//! so a log call never waits on a terminal or a disk. All outputs apply the
//! [`EnvFilter`] built from [`LogConfig::level`].
//!
//! # Example
//!
//! ```rust,no_run
//! use rawsock_telemetry::{init_logging, LogConfig};
//!
//! let config = LogConfig::development().with_directory("logs");
//! let _guard = init_logging(&config).expect("logging");
//!
//! tracing::info!(peer = "127.0.0.1:50000", "connection open");
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::{FilterExt, LevelFilter, Targets};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::error::TelemetryError;
use crate::writer::{spawn_worker, DailyFileWriter, NonBlocking, WorkerGuard};
use crate::TelemetryResult;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Log level or filter directives (e.g., "info", "rawsock_ws=debug").
    pub level: String,

    /// Whether to output JSON format.
    pub json_format: bool,

    /// Whether to include span events (new, close).
    pub span_events: bool,

    /// Whether to include file/line info on stdout. Files always carry it.
    pub file_line_info: bool,

    /// Whether to include thread IDs.
    pub thread_ids: bool,

    /// Whether to write to stdout.
    pub stdout: bool,

    /// Directory for dated log files. No file output when unset.
    pub directory: Option<PathBuf>,

    /// Base name of log files, `<file_name>-YYYY-MM-DD.log`.
    pub file_name: String,

    /// Extra files keyed by target prefix, e.g. `rawsock_ws = "ws"` writes
    /// `ws-YYYY-MM-DD.log` with only `rawsock_ws` events. Needs `directory`.
    pub target_files: BTreeMap<String, String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            json_format: false,
            span_events: false,
            file_line_info: true,
            thread_ids: false,
            stdout: true,
            directory: None,
            file_name: "log".to_string(),
            target_files: BTreeMap::new(),
        }
    }
}

impl LogConfig {
    /// Creates a development configuration with human-readable output.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            span_events: true,
            ..Self::default()
        }
    }

    /// Creates a production configuration with JSON output.
    #[must_use]
    pub fn production() -> Self {
        Self {
            json_format: true,
            file_line_info: false,
            ..Self::default()
        }
    }

    /// Sets the log file directory.
    #[must_use]
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Sets the level filter.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Adds a dated file holding only events under `target`.
    #[must_use]
    pub fn with_target_file(
        mut self,
        target: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        self.target_files.insert(target.into(), file_name.into());
        self
    }

    fn check(&self) -> TelemetryResult<()> {
        if self.directory.is_none() {
            if !self.target_files.is_empty() {
                return Err(TelemetryError::InvalidConfig(
                    "target_files needs a log directory".to_string(),
                ));
            }
            return Ok(());
        }
        if self.file_name.is_empty() {
            return Err(TelemetryError::InvalidConfig(
                "file_name must not be empty".to_string(),
            ));
        }
        for (target, file_name) in &self.target_files {
            if target.is_empty() || file_name.is_empty() {
                return Err(TelemetryError::InvalidConfig(format!(
                    "target file entry {target:?} = {file_name:?} has an empty side"
                )));
            }
            if *file_name == self.file_name {
                return Err(TelemetryError::InvalidConfig(format!(
                    "target {target:?} reuses the main log file name {file_name:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Keeps the writer threads alive; flushes pending lines when dropped.
///
/// Hold it for the lifetime of the process.
#[derive(Debug, Default)]
#[must_use = "dropping the guard stops log output"]
pub struct LogGuard {
    stdout: Option<WorkerGuard>,
    files: Vec<WorkerGuard>,
}

impl LogGuard {
    /// Whether at least one log file is written.
    pub fn has_file_output(&self) -> bool {
        !self.files.is_empty()
    }

    /// Number of background writer threads, stdout included.
    pub fn writer_threads(&self) -> usize {
        self.files.len() + usize::from(self.stdout.is_some())
    }
}

/// Builds the layers and writer threads described by `config`.
///
/// Log directories are created here, before any line is written.
fn build_layers(config: &LogConfig) -> TelemetryResult<(BoxedLayer, LogGuard)> {
    config.check()?;

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = LogGuard::default();

    if config.stdout {
        let (writer, worker) = spawn_worker("stdout", std::io::stdout())?;
        guard.stdout = Some(worker);
        let layer = tracing_subscriber::fmt::layer()
            .with_span_events(span_events.clone())
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_thread_ids(config.thread_ids)
            .with_writer(writer);
        let layer = if config.json_format {
            layer.json().boxed()
        } else {
            layer.pretty().boxed()
        };
        layers.push(layer.with_filter(create_env_filter(&config.level)?).boxed());
    }

    if let Some(directory) = &config.directory {
        let (writer, worker) = spawn_file_worker(directory, &config.file_name)?;
        guard.files.push(worker);
        layers.push(
            file_layer(config, writer, span_events.clone())
                .with_filter(create_env_filter(&config.level)?)
                .boxed(),
        );

        for (target, file_name) in &config.target_files {
            let (writer, worker) = spawn_file_worker(directory, file_name)?;
            guard.files.push(worker);
            let only_target = Targets::new().with_target(target.as_str(), LevelFilter::TRACE);
            layers.push(
                file_layer(config, writer, span_events.clone())
                    .with_filter(create_env_filter(&config.level)?.and(only_target))
                    .boxed(),
            );
        }
    }

    Ok((layers.boxed(), guard))
}

fn spawn_file_worker(
    directory: &Path,
    file_name: &str,
) -> TelemetryResult<(NonBlocking, WorkerGuard)> {
    let file = DailyFileWriter::open(directory, file_name)?;
    Ok(spawn_worker(file_name, file)?)
}

fn file_layer(config: &LogConfig, writer: NonBlocking, span_events: FmtSpan) -> BoxedLayer {
    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_span_events(span_events)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(config.thread_ids)
        .with_writer(writer);
    if config.json_format {
        layer.json().boxed()
    } else {
        layer.boxed()
    }
}

/// Initializes the logging subsystem.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidConfig` for inconsistent file settings,
/// `TelemetryError::LoggingInit` if the filter is invalid or a global
/// subscriber is already installed, and `TelemetryError::Io` if a log
/// directory or writer thread cannot be created.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<LogGuard> {
    if !config.enabled {
        return Ok(LogGuard::default());
    }

    let (layer, guard) = build_layers(config)?;
    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

    Ok(guard)
}

/// Creates an env filter from a string.
///
/// # Errors
///
/// Returns error if the filter string is invalid.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log level: {e}")))
}
