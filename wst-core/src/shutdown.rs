//! Process-wide shutdown with connection draining.
//!
//! The root [`CancellationToken`] handed to every connection's
//! [`SocketTiming`](crate::timing::SocketTiming) lives here, together with a
//! count of live connections so the binaries can wait for them to drain.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Shutdown signal that can be shared across tasks.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    token: CancellationToken,
    active_connections: Arc<AtomicUsize>,
    timeout: Duration,
}

impl ShutdownSignal {
    /// Create a new shutdown signal.
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            token: CancellationToken::new(),
            active_connections: Arc::new(AtomicUsize::new(0)),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Root token; every connection scope descends from it.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Initiate shutdown.
    pub fn initiate_shutdown(&self) {
        self.token.cancel();
        info!("Shutdown initiated");
    }

    /// Register a new active connection.
    pub fn register_connection(&self) -> ConnectionGuard {
        let active = self.active_connections.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Connection registered, active: {}", active);
        ConnectionGuard {
            counter: self.active_connections.clone(),
        }
    }

    /// Get the number of active connections.
    pub fn active_connection_count(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Wait for all connections to drain with timeout.
    pub async fn wait_for_drain(&self) -> bool {
        info!(
            "Waiting for {} active connections to drain (timeout: {:?})",
            self.active_connection_count(),
            self.timeout
        );

        let drain_future = async {
            loop {
                let count = self.active_connection_count();
                if count == 0 {
                    info!("All connections drained successfully");
                    return true;
                }
                debug!("Waiting for {} connections to drain", count);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };

        match timeout(self.timeout, drain_future).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Shutdown timeout reached with {} connections still active",
                    self.active_connection_count()
                );
                false
            }
        }
    }
}

/// Guard that decrements the connection counter when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let prev = self.counter.fetch_sub(1, Ordering::SeqCst);
        debug!("Connection closed, active: {}", prev - 1);
    }
}

/// Graceful shutdown coordinator.
pub struct GracefulShutdown {
    signal: ShutdownSignal,
}

impl GracefulShutdown {
    /// Create a new graceful shutdown coordinator.
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            signal: ShutdownSignal::new(timeout_secs),
        }
    }

    /// Get the shutdown signal for sharing with tasks.
    pub fn signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    /// Wait for Ctrl+C or SIGTERM, then cancel the root token.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = self.signal.token.cancelled() => {}
        }

        self.signal.initiate_shutdown();
    }

    /// Wait for live connections to finish.
    pub async fn shutdown(&self) -> bool {
        self.signal.wait_for_drain().await
    }
}
