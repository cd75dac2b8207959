//! WebSocket listener.
//!
//! [`WsServer`] binds a TCP listener, accepts connections until stopped, and
//! runs each connection in its own task. A failing connection, including
//! one whose handler panics, never affects the listener or its siblings.
//!
//! # Example
//!
//! ```rust,no_run
//! use rawsock_ws::{ConnectionHandle, WsServer};
//! use bytes::Bytes;
//!
//! # async fn run() -> rawsock_ws::WsResult<()> {
//! let mut server = WsServer::new();
//! server.on_message(|conn: ConnectionHandle, payload: Bytes| async move {
//!     conn.send(&payload).await
//! });
//!
//! let stopper = server.clone();
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     stopper.stop();
//! });
//!
//! server.start("127.0.0.1", 9607).await
//! # }
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::WebSocketConfig;
use crate::connection::{Connection, ConnectionHandle, MessageHandler};
use crate::error::{WsError, WsResult};
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

type BoxedHandler =
    Arc<dyn Fn(ConnectionHandle, Bytes) -> BoxFuture<'static, WsResult<()>> + Send + Sync>;

/// Type-erased handler shared by every connection task.
#[derive(Clone)]
struct SharedHandler(BoxedHandler);

impl MessageHandler for SharedHandler {
    type Future = BoxFuture<'static, WsResult<()>>;

    fn handle(&self, conn: ConnectionHandle, payload: Bytes) -> Self::Future {
        (self.0)(conn, payload)
    }
}

/// The WebSocket server.
///
/// Clones share the same handler, stop signal, and connection count, so a
/// clone can be moved to another task to call [`stop`](Self::stop).
#[derive(Clone)]
pub struct WsServer {
    /// Per-connection settings
    config: WebSocketConfig,

    /// Registered message handler
    handler: SharedHandler,

    /// Running flag, cleared by `stop`
    shutdown: ShutdownSignal,

    /// Live connection count
    tracker: ConnectionTracker,
}

impl WsServer {
    /// Creates a server with default configuration.
    ///
    /// Until [`on_message`](Self::on_message) is called, decoded messages
    /// are discarded.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(WebSocketConfig::default())
    }

    /// Creates a server with the given per-connection configuration.
    #[must_use]
    pub fn with_config(config: WebSocketConfig) -> Self {
        Self {
            config,
            handler: SharedHandler(Arc::new(discard)),
            shutdown: ShutdownSignal::new(),
            tracker: ConnectionTracker::new(),
        }
    }

    /// Replaces the stop signal, e.g. with [`ShutdownSignal::with_os_signals`].
    #[must_use]
    pub fn with_shutdown_signal(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Registers the handler called for every decoded message.
    ///
    /// Replaces any previously registered handler.
    pub fn on_message<H>(&mut self, handler: H)
    where
        H: MessageHandler,
        H::Future: 'static,
    {
        self.handler = SharedHandler(Arc::new(move |conn: ConnectionHandle, payload: Bytes| {
            handler.handle(conn, payload).boxed()
        }));
    }

    /// Returns the per-connection configuration.
    #[must_use]
    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    /// Returns a handle to the server's stop signal.
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Returns the number of connections currently being served.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.tracker.active_connections()
    }

    /// Waits until every connection task has finished.
    pub async fn wait_for_connections(&self) {
        self.tracker.wait_for_shutdown().await;
    }

    /// Whether [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_shutdown()
    }

    /// Stops accepting connections.
    ///
    /// Safe to call from any task. Open connections leave their read loop
    /// after their current read completes. A stopped server stays stopped.
    pub fn stop(&self) {
        info!("stop requested");
        self.shutdown.trigger();
    }

    /// Binds `host:port` and serves until stopped.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::Bind`] if the address cannot be bound, or the
    /// error that ended the accept loop.
    pub async fn start(&self, host: &str, port: u16) -> WsResult<()> {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind(addr.as_str()).await.map_err(|source| {
            error!("failed to bind {}: {}", addr, source);
            WsError::Bind {
                addr: addr.clone(),
                source,
            }
        })?;
        self.serve(listener).await
    }

    /// Serves connections from an already bound listener until stopped.
    ///
    /// The listener is closed when this returns.
    ///
    /// # Errors
    ///
    /// Returns the accept error that ended the loop. Aborted or reset
    /// handshakes and interrupted accepts are logged and skipped.
    pub async fn serve(&self, listener: TcpListener) -> WsResult<()> {
        match listener.local_addr() {
            Ok(addr) => info!("WebSocket server listening on {}", addr),
            Err(e) => warn!("WebSocket server listening on unknown address: {}", e),
        }

        while !self.shutdown.is_shutdown() {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => self.spawn_connection(stream, peer_addr),
                        Err(e) if is_transient(&e) => {
                            warn!("skipping failed accept: {}", e);
                        }
                        Err(e) => {
                            error!("accept failed, stopping listener: {}", e);
                            return Err(e.into());
                        }
                    }
                }

                () = self.shutdown.recv() => {
                    info!("stop signal received, closing listener");
                    break;
                }
            }
        }

        info!(
            active_connections = self.tracker.active_connections(),
            "WebSocket server stopped"
        );
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let token = self.tracker.acquire();
        let config = self.config.clone();
        let handler = self.handler.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let _token = token;

            let conn = match Connection::accept(stream, Some(peer_addr), &config).await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(peer = %peer_addr, "handshake failed: {}", e);
                    return;
                }
            };
            let id = conn.id();
            info!(connection_id = %id, peer = %peer_addr, url = conn.handle().url(), "connection open");

            match conn.run(&handler, &shutdown).await {
                Ok(()) => info!(connection_id = %id, "connection closed"),
                Err(e) => warn!(connection_id = %id, "connection closed: {}", e),
            }
        });
    }
}

impl Default for WsServer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsServer")
            .field("config", &self.config)
            .field("stopped", &self.is_stopped())
            .field("active_connections", &self.active_connections())
            .finish_non_exhaustive()
    }
}

fn discard(conn: ConnectionHandle, payload: Bytes) -> BoxFuture<'static, WsResult<()>> {
    debug!(connection_id = %conn.id(), len = payload.len(), "no handler registered, dropping message");
    futures_util::future::ready(Ok(())).boxed()
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_server_is_running() {
        let server = WsServer::new();
        assert!(!server.is_stopped());
        assert_eq!(server.active_connections(), 0);
        assert_eq!(server.config().buffer_capacity, 4096);
    }

    #[test]
    fn test_stop_is_shared_between_clones() {
        let server = WsServer::new();
        let other = server.clone();
        other.stop();
        assert!(server.is_stopped());
        assert!(server.shutdown_signal().is_shutdown());
    }

    #[test]
    fn test_transient_accept_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[tokio::test]
    async fn test_start_reports_bind_failure() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = WsServer::new().start("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, WsError::Bind { .. }));
        assert!(err.to_string().contains(&port.to_string()));
    }

    #[tokio::test]
    async fn test_stop_before_serve_returns_immediately() {
        let server = WsServer::new();
        server.stop();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), server.serve(listener))
            .await
            .expect("serve should return")
            .unwrap();
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_shared_handler_future_is_send() {
        let handler = SharedHandler(Arc::new(discard));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap());
        let (accepted, client) = tokio::join!(listener.accept(), client);
        let (stream, peer) = accepted.unwrap();
        drop(client);

        let shutdown = ShutdownSignal::new();
        let config = WebSocketConfig::default();
        let task = async move {
            if let Ok(conn) = Connection::accept(stream, Some(peer), &config).await {
                conn.run(&handler, &shutdown).await.ok();
            }
        };
        assert_send(&task);
        tokio::spawn(task).await.unwrap();
    }

    #[tokio::test]
    async fn test_spawned_connection_runs_registered_handler() {
        use crate::frame::encode_masked_frame;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let mut server = WsServer::new();
        server.on_message(|conn: ConnectionHandle, payload: Bytes| async move {
            conn.send(&payload).await
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let running = server.clone();
        let task = tokio::spawn(async move { running.serve(listener).await });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(
                b"GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
                  Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
            )
            .await
            .unwrap();
        let mut response = Vec::new();
        let mut byte = [0u8; 1];
        while !response.ends_with(b"\r\n\r\n") {
            assert_eq!(client.read(&mut byte).await.unwrap(), 1);
            response.push(byte[0]);
        }
        assert!(response.starts_with(b"HTTP/1.1 101"));

        client
            .write_all(&encode_masked_frame(b"ping", [1, 2, 3, 4]))
            .await
            .unwrap();
        let mut frame = [0u8; 6];
        client.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame, [0x81, 4, b'p', b'i', b'n', b'g']);
        assert_eq!(server.active_connections(), 1);

        drop(client);
        server.stop();
        task.await.unwrap().unwrap();
        tokio::time::timeout(Duration::from_secs(1), server.wait_for_connections())
            .await
            .expect("connection task should finish");
    }

    #[tokio::test]
    async fn test_stop_wakes_blocked_accept() {
        let server = WsServer::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let running = server.clone();
        let task = tokio::spawn(async move { running.serve(listener).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        server.stop();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("serve should return after stop")
            .unwrap()
            .unwrap();
    }
}
