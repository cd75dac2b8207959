//! From-scratch server-side WebSocket engine.
//!
//! This crate terminates raw TCP connections, performs the HTTP Upgrade
//! handshake, and incrementally decodes client frames without relying on
//! an existing protocol library.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ WsServer (accept loop, running flag)                          │
//! │   │                                                          │
//! │   ▼  one task per connection                                 │
//! │ Connection ──► Handshake (once) ──► 101 Switching Protocols  │
//! │   │                                                          │
//! │   ▼  loop                                                    │
//! │ read ──► FrameDecoder ──► handler(ConnectionHandle, Bytes)   │
//! │            │                      │                          │
//! │            ▼                      ▼                          │
//! │        FrameBuffer          encode_frame ──► socket write    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Scope
//!
//! Opcodes and the FIN bit are parsed but not interpreted: every frame is
//! delivered as an opaque payload. Ping/pong, the close handshake,
//! extensions, and TLS are not implemented.
//!
//! # Example
//!
//! ```rust,no_run
//! use rawsock_ws::{ConnectionHandle, WebSocketConfig, WsServer};
//! use bytes::Bytes;
//!
//! #[tokio::main]
//! async fn main() -> rawsock_ws::WsResult<()> {
//!     let mut server = WsServer::with_config(WebSocketConfig::new().buffer_capacity(8192));
//!     server.on_message(|conn: ConnectionHandle, payload: Bytes| async move {
//!         conn.send(&payload).await
//!     });
//!     server.start("127.0.0.1", 9607).await
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod connection;
pub mod decoder;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod server;
pub mod shutdown;

// Re-exports for convenience
pub use buffer::FrameBuffer;
pub use config::WebSocketConfig;
pub use connection::{Connection, ConnectionHandle, ConnectionId, ConnectionState, MessageHandler};
pub use decoder::FrameDecoder;
pub use error::{WsError, WsResult};
pub use frame::{apply_mask, encode_frame, encode_masked_frame, FrameHeader};
pub use handshake::{compute_accept_key, Handshake};
pub use server::WsServer;
pub use shutdown::{ConnectionTracker, ShutdownSignal};
