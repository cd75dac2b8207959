//! rawsock server - Entry point

use std::path::PathBuf;

use anyhow::Context;
use tracing::info;

use rawsock_server::{run_echo_server, ServerConfig};
use rawsock_telemetry::init_logging;
use rawsock_ws::ShutdownSignal;

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("rawsock-server {}", rawsock_server::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"rawsock server - WebSocket echo service

USAGE:
    rawsock-server [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    RAWSOCK_HOST              Address to bind (default: 127.0.0.1)
    RAWSOCK_PORT              Port to listen on (default: 9607)
    RAWSOCK_BUFFER_CAPACITY   Frame reassembly buffer size in bytes (default: 4096)
    RAWSOCK_LOG_LEVEL         Log filter, e.g. info or rawsock_ws=debug (default: info)
    RAWSOCK_LOG_DIR           Directory for dated log files (default: logs)

EXAMPLES:
    rawsock-server --config /etc/rawsock/server.toml
    RAWSOCK_PORT=9000 rawsock-server
"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => ServerConfig::default(),
    }
    .with_env_overrides();
    config.validate().context("invalid configuration")?;

    let _log_guard = init_logging(&config.logging).context("failed to initialize logging")?;

    info!("Starting rawsock server v{}", rawsock_server::VERSION);
    if let Some(path) = &args.config {
        info!("Loaded configuration from {}", path.display());
    }

    run_echo_server(&config, ShutdownSignal::with_os_signals())
        .await
        .context("server error")?;

    info!("rawsock server exited");
    Ok(())
}
