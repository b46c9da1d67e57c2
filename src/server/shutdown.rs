//! Graceful shutdown coordinator for storeproxy
//!
//! Centralizes signal handling and the shutdown of background tasks. The
//! HTTP server stops accepting connections on the first signal and in-flight
//! requests are allowed to finish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Shutdown coordinator that manages graceful shutdown of all services
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    /// Atomic flag indicating if shutdown has been initiated
    shutdown_initiated: Arc<AtomicBool>,
    /// Broadcast sender for shutdown signals
    shutdown_tx: broadcast::Sender<()>,
    /// Background tasks awaited on shutdown
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    /// Create a shutdown receiver for background tasks
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn a background task that is awaited during shutdown
    pub fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Initiate graceful shutdown
    pub fn initiate_shutdown(&self) {
        if !self.shutdown_initiated.swap(true, Ordering::Relaxed) {
            info!("Initiating graceful shutdown...");
            if let Err(e) = self.shutdown_tx.send(()) {
                warn!("No background task received the shutdown signal: {}", e);
            }
        }
    }

    /// Wait for shutdown signals (SIGTERM, SIGINT, or manual trigger)
    pub async fn wait_for_shutdown_signal(&self) {
        let mut manual = self.subscribe();
        if self.is_shutdown_initiated() {
            return;
        }

        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
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
            _ = ctrl_c => {
                info!("Received Ctrl+C signal");
            }
            _ = terminate => {
                info!("Received SIGTERM signal");
            }
            _ = manual.recv() => {
                info!("Shutdown requested");
            }
        }

        self.initiate_shutdown();
    }

    /// Wait for background tasks to finish, aborting stragglers after `timeout`
    pub async fn wait_for_tasks_completion(&self, timeout: Duration) {
        let handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        info!(
            tasks = handles.len(),
            "Waiting up to {} seconds for background tasks to complete...",
            timeout.as_secs()
        );

        for mut handle in handles {
            if tokio::time::timeout(timeout, &mut handle).await.is_err() {
                warn!("Background task did not stop in time, aborting it");
                handle.abort();
            }
        }
    }
}

/// Background task wrapper that handles shutdown signals
pub struct ShutdownAwareTask {
    shutdown_rx: broadcast::Receiver<()>,
}

impl ShutdownAwareTask {
    /// Create a new shutdown-aware task
    pub fn new(coordinator: &ShutdownCoordinator) -> Self {
        Self {
            shutdown_rx: coordinator.subscribe(),
        }
    }

    /// Wait for either a shutdown signal or the specified duration
    pub async fn wait_or_shutdown(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown_rx.recv() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}
