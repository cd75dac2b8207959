//! The echo handler served by the binary.

use bytes::Bytes;
use tracing::info;

use rawsock_ws::{ConnectionHandle, ShutdownSignal, WsResult, WsServer};

use crate::config::ServerConfig;
use crate::error::ServerResult;

/// Logs the payload as text and sends it back on the same connection.
pub async fn echo(conn: ConnectionHandle, payload: Bytes) -> WsResult<()> {
    info!(connection_id = %conn.id(), "receive : {}", String::from_utf8_lossy(&payload));
    conn.send(&payload).await
}

/// Builds a server that echoes every message and stops on `shutdown`.
pub fn build_server(config: &ServerConfig, shutdown: ShutdownSignal) -> WsServer {
    let mut server = WsServer::with_config(config.websocket.clone()).with_shutdown_signal(shutdown);
    server.on_message(echo);
    server
}

/// Serves the echo service on the configured address until `shutdown` fires.
///
/// # Errors
///
/// Returns [`crate::ServerError::WebSocket`] if the address cannot be bound
/// or the accept loop fails.
pub async fn run_echo_server(
    config: &ServerConfig,
    shutdown: ShutdownSignal,
) -> ServerResult<()> {
    info!("binding echo service on {}", config.listen_addr());
    build_server(config, shutdown)
        .start(&config.server.host, config.server.port)
        .await?;
    Ok(())
}
