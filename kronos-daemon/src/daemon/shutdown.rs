//! Shutdown signal handling for SIGTERM and SIGINT.

use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;

/// Resolves once the process is asked to stop.
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { shutdown_tx }
    }

    /// Request shutdown without a signal.
    pub fn trigger(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Wait for SIGINT, SIGTERM or [`trigger`](Self::trigger).
    pub async fn wait_for_signal(&self) {
        let mut requested = self.shutdown_tx.subscribe();

        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), stopping scheduled backups...");
            }
            _ = terminate => {
                info!("Received SIGTERM, stopping scheduled backups...");
            }
            _ = requested.recv() => {
                info!("Shutdown requested, stopping scheduled backups...");
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
