//! Background sync trigger loop
//!
//! Starts a drain when connectivity comes back, once at session start if
//! there is pending work or an unsynced product, and optionally on a fixed
//! interval while online when the queue or a verdict request is pending.
//!
//! # Configuration
//!
//! - `SYNC_INTERVAL_SECS` - periodic drain while online (default: unset, triggers only)

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::infra::ShutdownSignal;

use super::{ConnectivitySignal, SyncCoordinator};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncWorkerConfig {
    pub interval: Option<Duration>,
}

impl SyncWorkerConfig {
    pub fn from_env() -> Self {
        let interval = std::env::var("SYNC_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .map(Duration::from_secs);

        Self { interval }
    }
}

pub struct SyncWorker {
    coordinator: Arc<SyncCoordinator>,
    connectivity: ConnectivitySignal,
    config: SyncWorkerConfig,
}

impl SyncWorker {
    pub fn new(
        coordinator: Arc<SyncCoordinator>,
        connectivity: ConnectivitySignal,
        config: SyncWorkerConfig,
    ) -> Self {
        Self {
            coordinator,
            connectivity,
            config,
        }
    }

    /// Run until `shutdown` fires
    pub async fn run(self, shutdown: ShutdownSignal) {
        info!(
            interval_secs = ?self.config.interval.map(|d| d.as_secs()),
            online = self.connectivity.is_online(),
            "Starting sync worker"
        );

        let mut online_rx = self.connectivity.subscribe();
        let mut ticker = self.config.interval.map(|period| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        // Session start
        if self.connectivity.is_online() {
            if self.coordinator.unsynced_products().await > 0 {
                self.sync("session_start", &shutdown).await;
            } else {
                self.sync_if_pending("session_start", &shutdown).await;
            }
        }
        self.report_stranded_products().await;

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!("Sync worker shutting down");
                    break;
                }
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        debug!("Connectivity signal closed, stopping sync worker");
                        break;
                    }
                    if *online_rx.borrow_and_update() {
                        self.sync("reconnect", &shutdown).await;
                    }
                }
                _ = tick(&mut ticker) => {
                    if self.connectivity.is_online() {
                        self.sync_if_pending("interval", &shutdown).await;
                    }
                }
            }
        }
    }

    async fn sync_if_pending(&self, trigger: &str, shutdown: &ShutdownSignal) {
        match self.coordinator.has_pending_work().await {
            Ok(true) => self.sync(trigger, shutdown).await,
            Ok(false) => debug!(trigger, "Nothing to sync"),
            Err(e) => error!(trigger, error = %e, "Failed to inspect pending work"),
        }
    }

    /// Unsynced products with nothing queued are only resent by their next
    /// write; interval ticks ignore them
    async fn report_stranded_products(&self) {
        let unsynced = self.coordinator.unsynced_products().await;
        if unsynced == 0 {
            return;
        }
        if let Ok(false) = self.coordinator.has_pending_work().await {
            warn!(
                unsynced,
                "Products have changes that are neither synced nor queued"
            );
        }
    }

    async fn sync(&self, trigger: &str, shutdown: &ShutdownSignal) {
        debug!(trigger, "Sync triggered");
        if let Err(e) = self
            .coordinator
            .run_sync_until(shutdown, |progress| debug!(progress, "Sync progress"))
            .await
        {
            error!(trigger, error = %e, "Sync failed");
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
