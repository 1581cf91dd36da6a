//! Shutdown and cancellation signalling
//!
//! A `ShutdownCoordinator` owns the trigger; cloned `ShutdownSignal`s are
//! handed to the sync coordinator (checked between item deliveries), the
//! sync worker loop and the HTTP server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

/// Shutdown signal that can be cloned and shared
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    shutdown: Arc<AtomicBool>,
    watch_rx: watch::Receiver<bool>,
    /// Held by detached signals so the channel stays open
    _sender: Option<Arc<watch::Sender<bool>>>,
}

impl ShutdownSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            watch_rx: rx,
            _sender: Some(Arc::new(tx)),
        }
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Wait for shutdown signal
    pub async fn wait(&self) {
        let mut rx = self.watch_rx.clone();
        // Err means the coordinator is gone; treat as shutdown
        let _ = rx.wait_for(|v| *v).await;
    }
}

/// Owner of the shutdown trigger
#[derive(Debug)]
pub struct ShutdownCoordinator {
    shutdown: Arc<AtomicBool>,
    watch_tx: watch::Sender<bool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (watch_tx, _) = watch::channel(false);
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            watch_tx,
        }
    }

    /// Get a shutdown signal that can be cloned
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            shutdown: self.shutdown.clone(),
            watch_rx: self.watch_tx.subscribe(),
            _sender: None,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Initiate shutdown
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Initiating shutdown");
        self.watch_tx.send_replace(true);
    }
}

/// Resolve on SIGINT or SIGTERM
pub async fn os_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
