//! Server stop signal and connection bookkeeping.
//!
//! Both types are thin wrappers over a [`tokio::sync::watch`] channel, so a
//! waiter that subscribes late still sees the latest value.
//!
//! [`ShutdownSignal`] is the server's running flag. The accept loop waits on
//! it alongside `accept()`, and connection loops check it before every
//! read. [`ConnectionTracker`] counts the connection tasks still alive.
//!
//! # Example
//!
//! ```rust
//! use rawsock_ws::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::new();
//! let for_other_task = shutdown.clone();
//!
//! for_other_task.trigger();
//! assert!(shutdown.is_shutdown());
//! ```

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

/// Shared stop flag for a server and its connections.
///
/// Clones observe the same flag. Once set it is never cleared.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    stopped: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Creates a signal that has not fired.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stopped: Arc::new(watch::Sender::new(false)),
        }
    }

    /// Sets the flag and wakes every pending [`recv`](Self::recv).
    pub fn trigger(&self) {
        self.stopped.send_replace(true);
    }

    /// Returns `true` once [`trigger`](Self::trigger) has been called on any clone.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.stopped.borrow()
    }

    /// Resolves when the flag is set; immediately if it already is.
    pub async fn recv(&self) {
        let mut rx = self.stopped.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Creates a signal that fires on SIGTERM or SIGINT (Ctrl+C off unix).
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn with_os_signals() -> Self {
        let signal = Self::new();
        let on_signal = signal.clone();

        tokio::spawn(async move {
            if let Err(e) = os_stop_requested().await {
                error!("cannot listen for OS signals: {}", e);
                return;
            }
            on_signal.trigger();
        });

        signal
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn os_stop_requested() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    let name = tokio::select! {
        _ = term.recv() => "SIGTERM",
        _ = int.recv() => "SIGINT",
    };
    info!("{} received, stopping server", name);
    Ok(())
}

#[cfg(not(unix))]
async fn os_stop_requested() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Ctrl+C received, stopping server");
    Ok(())
}

/// Live connection counter.
///
/// # Example
///
/// ```rust
/// use rawsock_ws::ConnectionTracker;
///
/// let tracker = ConnectionTracker::new();
/// let token = tracker.acquire();
/// assert_eq!(tracker.active_connections(), 1);
///
/// drop(token);
/// assert_eq!(tracker.active_connections(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    live: Arc<watch::Sender<usize>>,
}

impl ConnectionTracker {
    /// Creates a tracker with no live connections.
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: Arc::new(watch::Sender::new(0)),
        }
    }

    /// Counts one more connection until the returned token is dropped.
    #[must_use]
    pub fn acquire(&self) -> ConnectionToken {
        self.live.send_modify(|n| *n += 1);
        ConnectionToken {
            live: Arc::clone(&self.live),
        }
    }

    /// Number of tokens currently held.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        *self.live.borrow()
    }

    /// Resolves once no tokens are held.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.live.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by a connection task for as long as it runs.
#[derive(Debug)]
pub struct ConnectionToken {
    live: Arc<watch::Sender<usize>>,
}

impl Drop for ConnectionToken {
    fn drop(&mut self) {
        self.live.send_modify(|n| *n = n.saturating_sub(1));
    }
}
