//! Graceful shutdown
//!
//! One controller is shared by the listener, every session actor and every
//! connection. Components hold a [`CancellationToken`] from
//! [`ShutdownController::token`]; connections additionally hold a
//! [`ConnectionGuard`] so shutdown can wait for them to say goodbye.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default time allowed for connections to close
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 10;

/// Shutdown phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Accepting clients
    Running,
    /// Sessions are disconnecting their clients
    Draining,
    /// All components stopped
    Terminated,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Draining => write!(f, "Draining"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Coordinates server shutdown
pub struct ShutdownController {
    cancel_token: CancellationToken,
    phase: AtomicU8,
    phase_tx: watch::Sender<ShutdownPhase>,
    initiated: AtomicBool,
    connections: AtomicU32,
    timeout: Duration,
}

impl ShutdownController {
    /// Create a controller with the default drain timeout
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS))
    }

    /// Create a controller with a custom drain timeout
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Arc<Self> {
        let (phase_tx, _) = watch::channel(ShutdownPhase::Running);
        Arc::new(Self {
            cancel_token: CancellationToken::new(),
            phase: AtomicU8::new(ShutdownPhase::Running as u8),
            phase_tx,
            initiated: AtomicBool::new(false),
            connections: AtomicU32::new(0),
            timeout,
        })
    }

    /// Token cancelled when shutdown starts
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> ShutdownPhase {
        match self.phase.load(Ordering::SeqCst) {
            0 => ShutdownPhase::Running,
            1 => ShutdownPhase::Draining,
            _ => ShutdownPhase::Terminated,
        }
    }

    /// Whether shutdown has started
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.initiated.load(Ordering::SeqCst)
    }

    /// Wait until shutdown has completed
    pub async fn terminated(&self) {
        let mut rx = self.phase_tx.subscribe();
        let _ = rx.wait_for(|phase| *phase == ShutdownPhase::Terminated).await;
    }

    /// Track a live connection
    pub fn register_connection(self: &Arc<Self>) -> ConnectionGuard {
        self.connections.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            controller: Arc::clone(self),
        }
    }

    /// Number of live connections
    #[must_use]
    pub fn connection_count(&self) -> u32 {
        self.connections.load(Ordering::SeqCst)
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
        self.phase_tx.send_replace(phase);
        info!(phase = %phase, "Shutdown phase changed");
    }

    /// Stop the server
    ///
    /// Cancels every token, then waits up to the drain timeout for
    /// connections to close. Only the first call does anything.
    pub async fn shutdown(&self) {
        if self
            .initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Shutdown already initiated");
            return;
        }

        info!("Initiating graceful shutdown...");
        self.set_phase(ShutdownPhase::Draining);
        self.cancel_token.cancel();

        let start = std::time::Instant::now();
        loop {
            let active = self.connection_count();
            if active == 0 {
                info!("All connections closed");
                break;
            }
            if start.elapsed() >= self.timeout {
                warn!(
                    connections = active,
                    timeout_secs = self.timeout.as_secs(),
                    "Drain timeout exceeded"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        self.set_phase(ShutdownPhase::Terminated);
    }
}

/// Decrements the connection count when dropped
pub struct ConnectionGuard {
    controller: Arc<ShutdownController>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.controller.connections.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Wait for Ctrl+C or SIGTERM
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_phases() {
        let controller = ShutdownController::new();
        assert_eq!(controller.phase(), ShutdownPhase::Running);
        assert!(!controller.is_shutting_down());

        controller.shutdown().await;

        assert_eq!(controller.phase(), ShutdownPhase::Terminated);
        assert!(controller.is_shutting_down());
    }

    #[tokio::test]
    async fn test_token_cancelled() {
        let controller = ShutdownController::new();
        let token = controller.token();
        assert!(!token.is_cancelled());
        controller.shutdown().await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_connection_guard() {
        let controller = ShutdownController::new();
        {
            let _a = controller.register_connection();
            let _b = controller.register_connection();
            assert_eq!(controller.connection_count(), 2);
        }
        assert_eq!(controller.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_waits_for_connections() {
        let controller = ShutdownController::with_timeout(Duration::from_secs(5));
        let guard = controller.register_connection();
        let token = controller.token();
        tokio::spawn(async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
        });

        let waiter = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.terminated().await })
        };
        controller.shutdown().await;
        assert_eq!(controller.connection_count(), 0);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_double_shutdown() {
        let controller = ShutdownController::new();
        let (a, b) = tokio::join!(controller.shutdown(), controller.shutdown());
        let _ = (a, b);
        assert_eq!(controller.phase(), ShutdownPhase::Terminated);
    }
}
