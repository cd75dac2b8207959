//! WebSocket connection handling.
//!
//! A [`Connection`] owns one accepted socket. It runs the upgrade
//! handshake once, then loops: read, decode, and hand every completed
//! payload to the registered [`MessageHandler`] before reading again.
//!
//! ```text
//! ACCEPTED ──► HANDSHAKING ──► OPEN ──► CLOSED
//!                   │                      ▲
//!                   └──── rejected ────────┘
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::config::WebSocketConfig;
use crate::decoder::FrameDecoder;
use crate::error::{WsError, WsResult};
use crate::frame::encode_frame;
use crate::handshake::Handshake;
use crate::shutdown::ShutdownSignal;

/// A unique identifier for a WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new time-ordered connection ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket accepted, nothing read yet.
    Accepted,
    /// Upgrade request being read and validated.
    Handshaking,
    /// Handshake done; frames are being exchanged.
    Open,
    /// Terminal.
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Accepted => "accepted",
            Self::Handshaking => "handshaking",
            Self::Open => "open",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Cloneable handle to a connection, given to the message handler.
///
/// Sends from several tasks are serialized by an internal lock.
pub struct ConnectionHandle<S = TcpStream> {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    url: Arc<str>,
    headers: Arc<HashMap<String, String>>,
    writer: Arc<Mutex<WriteHalf<S>>>,
    closed: Arc<AtomicBool>,
}

impl<S> Clone for ConnectionHandle<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            peer_addr: self.peer_addr,
            url: Arc::clone(&self.url),
            headers: Arc::clone(&self.headers),
            writer: Arc::clone(&self.writer),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<S> std::fmt::Debug for ConnectionHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("url", &self.url)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<S> ConnectionHandle<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Get the connection ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address, when the transport has one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Request path negotiated during the handshake.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Look up a handshake request header by its exact name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// All handshake request headers.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send `payload` as a single unmasked frame.
    pub async fn send(&self, payload: &[u8]) -> WsResult<()> {
        if self.is_closed() {
            return Err(WsError::connection_closed("connection already closed"));
        }
        let frame = encode_frame(payload);
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Shut down the write side of the socket. Later sends fail.
    pub async fn close(&self) -> WsResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(connection_id = %self.id, "closing connection");
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }
}

/// Handler invoked for every decoded message.
///
/// Implemented for any `Fn(ConnectionHandle<S>, Bytes) -> impl Future`.
/// Returning an error, or panicking, ends only the connection the
/// message arrived on.
pub trait MessageHandler<S = TcpStream>: Send + Sync + 'static {
    /// The future returned by the handler.
    type Future: Future<Output = WsResult<()>> + Send;

    /// Handle one decoded message.
    fn handle(&self, conn: ConnectionHandle<S>, payload: Bytes) -> Self::Future;
}

impl<S, F, Fut> MessageHandler<S> for F
where
    F: Fn(ConnectionHandle<S>, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = WsResult<()>> + Send,
{
    type Future = Fut;

    fn handle(&self, conn: ConnectionHandle<S>, payload: Bytes) -> Self::Future {
        self(conn, payload)
    }
}

/// A WebSocket connection past the upgrade handshake.
pub struct Connection<S = TcpStream> {
    handle: ConnectionHandle<S>,
    reader: ReadHalf<S>,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
    state: ConnectionState,
    /// Messages decoded from bytes that arrived with the handshake.
    pending: Vec<Bytes>,
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("handle", &self.handle)
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .field("buffered", &self.decoder.buffered_len())
            .finish_non_exhaustive()
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    /// Run the upgrade handshake on a freshly accepted stream.
    ///
    /// On rejection nothing is written back and the stream is dropped,
    /// which closes it.
    #[instrument(skip(stream, config))]
    pub async fn accept(
        mut stream: S,
        peer_addr: Option<SocketAddr>,
        config: &WebSocketConfig,
    ) -> WsResult<Self> {
        debug!(state = %ConnectionState::Handshaking, "reading upgrade request");
        let mut read_buf = vec![0u8; config.read_buffer_size.max(config.min_handshake_size)];

        let n = stream.read(&mut read_buf).await?;
        if n == 0 {
            return Err(WsError::connection_closed("peer closed before handshake"));
        }
        let handshake = Handshake::parse(&read_buf[..n], config.min_handshake_size)?;

        if let Err(e) = stream.write_all(&handshake.response()).await {
            error!("upgrade response write failed: {}", e);
            return Err(e.into());
        }
        stream.flush().await?;

        let mut decoder = FrameDecoder::from_config(config);
        let pending = decoder.decode(&handshake.leftover)?;

        let (reader, writer) = tokio::io::split(stream);
        let handle = ConnectionHandle {
            id: ConnectionId::new(),
            peer_addr,
            url: Arc::from(handshake.url),
            headers: Arc::new(handshake.headers),
            writer: Arc::new(Mutex::new(writer)),
            closed: Arc::new(AtomicBool::new(false)),
        };
        debug!(connection_id = %handle.id, url = %handle.url, state = %ConnectionState::Open, "handshake complete");

        read_buf.resize(config.read_buffer_size, 0);
        Ok(Self {
            handle,
            reader,
            decoder,
            read_buf,
            state: ConnectionState::Open,
            pending,
        })
    }

    /// Get a handle for sending on this connection.
    pub fn handle(&self) -> ConnectionHandle<S> {
        self.handle.clone()
    }

    /// Get the connection ID.
    pub fn id(&self) -> ConnectionId {
        self.handle.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Read once and return the messages that read completed.
    ///
    /// Messages carried by the handshake read are returned first. End of
    /// stream yields [`WsError::ConnectionClosed`]. Any error moves the
    /// connection to [`ConnectionState::Closed`].
    pub async fn read_messages(&mut self) -> WsResult<Vec<Bytes>> {
        if self.state == ConnectionState::Closed {
            return Err(WsError::connection_closed("connection already closed"));
        }
        if !self.pending.is_empty() {
            return Ok(std::mem::take(&mut self.pending));
        }

        let result = match self.reader.read(&mut self.read_buf).await {
            Ok(0) => Err(WsError::connection_closed("peer closed the connection")),
            Ok(n) => self.decoder.decode(&self.read_buf[..n]),
            Err(e) => Err(WsError::Io(e)),
        };
        if result.is_err() {
            self.state = ConnectionState::Closed;
        }
        result
    }

    /// Dispatch messages to `handler` until the peer leaves, an error
    /// occurs, or `shutdown` is triggered.
    ///
    /// A clean end of stream or a stop request returns `Ok(())`.
    #[instrument(skip_all, fields(connection_id = %self.handle.id))]
    pub async fn run<H>(mut self, handler: &H, shutdown: &ShutdownSignal) -> WsResult<()>
    where
        H: MessageHandler<S> + ?Sized,
    {
        let result = self.dispatch(handler, shutdown).await;
        debug!(state = %ConnectionState::Closed, "connection loop finished");
        match result {
            Err(e) if e.is_closed() => {
                debug!("{}", e);
                Ok(())
            }
            other => other,
        }
    }

    async fn dispatch<H>(&mut self, handler: &H, shutdown: &ShutdownSignal) -> WsResult<()>
    where
        H: MessageHandler<S> + ?Sized,
    {
        while !shutdown.is_shutdown() {
            let messages = self.read_messages().await?;
            for payload in messages {
                let conn = self.handle.clone();
                let outcome = AssertUnwindSafe(async { handler.handle(conn, payload).await })
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!("message handler returned an error: {}", e);
                        return Err(WsError::handler_failed(e.to_string()));
                    }
                    Err(panic) => {
                        let reason = panic_message(panic.as_ref());
                        error!("message handler panicked: {}", reason);
                        return Err(WsError::handler_failed(format!("panicked: {reason}")));
                    }
                }
            }
        }
        debug!("stop requested, leaving read loop");
        Ok(())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_masked_frame;
    use crate::handshake::upgrade_response;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{duplex, DuplexStream};

    const KEY: [u8; 4] = [0xA1, 0xB2, 0xC3, 0xD4];

    fn upgrade_request() -> Vec<u8> {
        b"GET /echo HTTP/1.1\r\n\
          Host: localhost\r\n\
          Connection: Upgrade\r\n\
          Upgrade: websocket\r\n\
          Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"
            .to_vec()
    }

    async fn read_response(client: &mut DuplexStream) -> String {
        let mut buf = vec![0u8; 512];
        let n = client.read(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    async fn open_pair() -> (Connection<DuplexStream>, DuplexStream) {
        let (mut client, server) = duplex(64 * 1024);
        client.write_all(&upgrade_request()).await.unwrap();
        let conn = Connection::accept(server, None, &WebSocketConfig::default())
            .await
            .unwrap();
        let response = read_response(&mut client).await;
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        (conn, client)
    }

    #[test]
    fn test_connection_id_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new();
        assert_eq!(id.to_string(), id.as_uuid().to_string());
    }

    #[tokio::test]
    async fn test_accept_exposes_url_and_headers() {
        let (conn, _client) = open_pair().await;
        assert_eq!(conn.state(), ConnectionState::Open);
        let handle = conn.handle();
        assert_eq!(handle.url(), "/echo");
        assert_eq!(handle.header("Host"), Some("localhost"));
        assert_eq!(handle.header("host"), None);
    }

    #[tokio::test]
    async fn test_accept_writes_exact_upgrade_response() {
        let expected = upgrade_response("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        let mock = tokio_test::io::Builder::new()
            .read(&upgrade_request())
            .write(&expected)
            .build();
        let conn = Connection::accept(mock, None, &WebSocketConfig::default())
            .await
            .unwrap();
        assert_eq!(conn.handle().url(), "/echo");
        assert_eq!(conn.handle().peer_addr(), None);
    }

    #[tokio::test]
    async fn test_accept_rejection_writes_nothing() {
        let (mut client, server) = duplex(4096);
        client
            .write_all(b"GET /echo HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\nUpgrade: websocket\r\n\r\n")
            .await
            .unwrap();
        let err = Connection::accept(server, None, &WebSocketConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WsError::HandshakeRejected { .. }));

        // Server half was dropped: the client sees EOF and no response bytes.
        let mut buf = [0u8; 64];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_connection_debug_shows_state() {
        let (conn, _client) = open_pair().await;
        let rendered = format!("{conn:?}");
        assert!(rendered.starts_with("Connection {"));
        assert!(rendered.contains("state: Open"));
        assert!(rendered.contains("url: \"/echo\""));
    }

    #[tokio::test]
    async fn test_read_messages_across_reads() {
        let (mut conn, mut client) = open_pair().await;
        let frame = encode_masked_frame(b"split payload", KEY);
        client.write_all(&frame[..5]).await.unwrap();
        assert!(conn.read_messages().await.unwrap().is_empty());
        client.write_all(&frame[5..]).await.unwrap();
        assert_eq!(
            conn.read_messages().await.unwrap(),
            vec![Bytes::from_static(b"split payload")]
        );
    }

    #[tokio::test]
    async fn test_frame_sent_with_handshake_is_delivered() {
        let (mut client, server) = duplex(4096);
        let mut data = upgrade_request();
        data.extend_from_slice(&encode_masked_frame(b"early", KEY));
        client.write_all(&data).await.unwrap();

        let mut conn = Connection::accept(server, None, &WebSocketConfig::default())
            .await
            .unwrap();
        assert_eq!(
            conn.read_messages().await.unwrap(),
            vec![Bytes::from_static(b"early")]
        );
    }

    #[tokio::test]
    async fn test_eof_closes_connection() {
        let (mut conn, client) = open_pair().await;
        drop(client);
        let err = conn.read_messages().await.unwrap_err();
        assert!(err.is_closed());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_run_echoes_and_ends_on_eof() {
        let (conn, mut client) = open_pair().await;
        let shutdown = ShutdownSignal::new();
        let handler = |conn: ConnectionHandle<DuplexStream>, payload: Bytes| async move {
            conn.send(&payload).await
        };
        let task = tokio::spawn(async move { conn.run(&handler, &shutdown).await });

        client
            .write_all(&encode_masked_frame(b"ping?", KEY))
            .await
            .unwrap();
        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x81, 5, b'p', b'i', b'n', b'g', b'?']);

        drop(client);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_handler_error_ends_connection() {
        let (conn, mut client) = open_pair().await;
        let shutdown = ShutdownSignal::new();
        let handler = |_conn: ConnectionHandle<DuplexStream>, _payload: Bytes| async move {
            Err::<(), _>(WsError::protocol_error("unwanted"))
        };
        client
            .write_all(&encode_masked_frame(b"x", KEY))
            .await
            .unwrap();
        let err = conn.run(&handler, &shutdown).await.unwrap_err();
        assert!(matches!(err, WsError::HandlerFailed(_)));
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained() {
        let (conn, mut client) = open_pair().await;
        let shutdown = ShutdownSignal::new();
        let handler = |_conn: ConnectionHandle<DuplexStream>, payload: Bytes| async move {
            assert!(payload.is_empty(), "handler blew up");
            Ok::<(), WsError>(())
        };
        client
            .write_all(&encode_masked_frame(b"x", KEY))
            .await
            .unwrap();
        let err = conn.run(&handler, &shutdown).await.unwrap_err();
        assert!(err.to_string().contains("handler blew up"));
    }

    #[tokio::test]
    async fn test_run_exits_when_stopped() {
        let (conn, mut client) = open_pair().await;
        let shutdown = ShutdownSignal::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let stopper = shutdown.clone();
        let handler = move |_conn: ConnectionHandle<DuplexStream>, _payload: Bytes| {
            counter.fetch_add(1, Ordering::SeqCst);
            stopper.trigger();
            async { Ok::<(), WsError>(()) }
        };
        client
            .write_all(&encode_masked_frame(b"last", KEY))
            .await
            .unwrap();
        conn.run(&handler, &shutdown).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (conn, _client) = open_pair().await;
        let handle = conn.handle();
        handle.close().await.unwrap();
        assert!(handle.is_closed());
        let err = handle.send(b"late").await.unwrap_err();
        assert!(err.is_closed());
    }
}
