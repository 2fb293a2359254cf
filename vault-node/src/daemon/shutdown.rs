//! Graceful shutdown on SIGTERM and SIGINT.
//!
//! The HTTP server stops accepting triggers first; runs already in flight
//! then get a grace period to finish and record their outcome. A run cut off
//! by the deadline is left `running_*` and reset to failed on next start.

use crate::jobs::JobController;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    tx: watch::Sender<bool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Resolves once shutdown has been triggered.
    pub fn subscribe(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                // A closed channel means the coordinator is gone; shut down too
                if rx.changed().await.is_err() {
                    return;
                }
            }
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Wait for SIGINT or SIGTERM, then trigger shutdown.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, shutting down"),
            _ = terminate => info!("Received SIGTERM, shutting down"),
        }
        self.trigger();
    }

    /// Wait up to `grace` for the controller's runs to finish. Returns the
    /// number still active at the deadline.
    pub async fn drain(&self, controller: &JobController, grace: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let active = controller.active_jobs();
            if active == 0 {
                info!("All jobs finished");
                return 0;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(active, "Shutdown grace period over with jobs still running");
                return active;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
