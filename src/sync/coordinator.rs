//! Sync coordinator
//!
//! Drains the durable queue into the remote store, one item at a time in
//! FIFO order. A failed item stays queued and the drain moves on; only a
//! confirmed upsert removes an item. At most one drain runs at a time;
//! overlapping calls return immediately with a skipped report.
//!
//! Every delivered log is then scored once: its verdict request is kept in
//! `pending_verdicts` until the verdict has been applied locally, so a failed
//! request is retried by the next drain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::domain::{FraudRecord, ProvenanceLog, QueueItem};
use crate::infra::{
    FraudEvaluator, PendingVerdict, RemoteStore, Result, Retry, RetryPolicy, ShutdownSignal,
    SqliteQueue,
};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::store::ProductStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Idle,
    Draining,
}

/// Observable coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    /// Last reported progress percentage of the current or last drain
    pub progress: u8,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
            progress: 0,
        }
    }
}

/// Outcome of one `run_sync` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Another drain was in flight; nothing was done
    pub skipped: bool,
    /// Items in the snapshot taken at the start of the drain
    pub total: usize,
    pub delivered: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    pub verdicts_applied: usize,
    /// Verdict requests that failed and stay pending
    pub verdicts_pending: usize,
    /// Products flipped to synced after a full drain
    pub products_synced: usize,
    /// Stopped early on shutdown
    pub cancelled: bool,
}

impl SyncReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// Every item in the snapshot was delivered
    pub fn is_complete(&self) -> bool {
        !self.skipped && !self.cancelled && self.delivered == self.total
    }
}

/// Resets the drain flag and publishes Idle, even if the drain future is
/// dropped midway
struct DrainGuard<'a> {
    draining: &'a AtomicBool,
    status: &'a watch::Sender<SyncStatus>,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.status.send_if_modified(|s| {
            let draining = s.phase == SyncPhase::Draining;
            s.phase = SyncPhase::Idle;
            draining
        });
        self.draining.store(false, Ordering::Release);
    }
}

pub struct SyncCoordinator {
    queue: SqliteQueue,
    remote: Arc<dyn RemoteStore>,
    products: Arc<ProductStore>,
    policy: RetryPolicy,
    evaluator: Option<Arc<dyn FraudEvaluator>>,
    user_id: Option<String>,
    metrics: Option<Arc<MetricsRegistry>>,
    draining: AtomicBool,
    status: watch::Sender<SyncStatus>,
}

impl SyncCoordinator {
    pub fn new(
        queue: SqliteQueue,
        remote: Arc<dyn RemoteStore>,
        products: Arc<ProductStore>,
        policy: RetryPolicy,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            queue,
            remote,
            products,
            policy,
            evaluator: None,
            user_id: None,
            metrics: None,
            draining: AtomicBool::new(false),
            status,
        }
    }

    /// Request a verdict for every delivered log and apply it to the product
    pub fn with_evaluator(
        mut self,
        evaluator: Arc<dyn FraudEvaluator>,
        user_id: Option<String>,
    ) -> Self {
        self.evaluator = Some(evaluator);
        self.user_id = user_id;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn queue(&self) -> &SqliteQueue {
        &self.queue
    }

    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Whether a trigger should start a drain
    pub async fn has_pending_work(&self) -> Result<bool> {
        if self.queue.count().await? > 0 {
            return Ok(true);
        }
        Ok(self.evaluator.is_some() && self.queue.pending_verdict_count().await? > 0)
    }

    /// Products whose changes are neither synced nor queued, e.g. after a
    /// write that could not be persisted or an item that was dead-lettered
    pub async fn unsynced_products(&self) -> usize {
        self.products.unsynced_count().await
    }

    /// Drain the queue, reporting progress percentages to `on_progress`
    pub async fn run_sync<F>(&self, on_progress: F) -> Result<SyncReport>
    where
        F: FnMut(u8) + Send,
    {
        self.run_sync_until(&ShutdownSignal::never(), on_progress)
            .await
    }

    /// Like [`run_sync`](Self::run_sync), stopping between items once
    /// `shutdown` fires
    pub async fn run_sync_until<F>(
        &self,
        shutdown: &ShutdownSignal,
        mut on_progress: F,
    ) -> Result<SyncReport>
    where
        F: FnMut(u8) + Send,
    {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sync already in progress, skipping");
            return Ok(SyncReport::skipped());
        }
        let _guard = DrainGuard {
            draining: &self.draining,
            status: &self.status,
        };

        let items = self.queue.due_items(Utc::now()).await?;
        if items.is_empty() {
            let mut report = SyncReport::default();
            self.request_pending_verdicts(shutdown, &mut report).await;
            return Ok(report);
        }

        self.status.send_replace(SyncStatus {
            phase: SyncPhase::Draining,
            progress: 0,
        });

        let started = std::time::Instant::now();
        let mut report = SyncReport {
            total: items.len(),
            ..SyncReport::default()
        };
        info!(items = report.total, "Starting sync");

        for item in items {
            if shutdown.is_shutdown() {
                info!(
                    delivered = report.delivered,
                    remaining = report.total - report.delivered - report.failed,
                    "Sync cancelled by shutdown"
                );
                report.cancelled = true;
                break;
            }

            if self.deliver(&item, &mut report).await {
                let progress = percent(report.delivered, report.total);
                on_progress(progress);
                self.status.send_modify(|s| s.progress = progress);
            }
        }

        // The last delivery of a full drain already reported 100. Items
        // still in backoff were not part of the snapshot.
        if report.is_complete() {
            match self.queue.count().await {
                Ok(0) => report.products_synced = self.products.mark_all_synced().await,
                Ok(left) => debug!(left, "Items still queued, products stay unsynced"),
                Err(e) => error!(error = %e, "Failed to inspect queue after drain"),
            }
        }

        if !report.cancelled {
            self.request_pending_verdicts(shutdown, &mut report).await;
        }

        info!(
            total = report.total,
            delivered = report.delivered,
            failed = report.failed,
            dead_lettered = report.dead_lettered,
            verdicts_applied = report.verdicts_applied,
            products_synced = report.products_synced,
            "Sync finished"
        );

        if let Some(metrics) = &self.metrics {
            metrics.inc_counter(metric_names::SYNC_RUNS).await;
            metrics
                .observe_histogram(metric_names::SYNC_LATENCY, started.elapsed().as_secs_f64())
                .await;
            if let Ok(depth) = self.queue.count().await {
                metrics.set_gauge(metric_names::QUEUE_DEPTH, depth).await;
            }
        }

        Ok(report)
    }

    /// Attempt one item; returns true if it was delivered
    async fn deliver(&self, item: &QueueItem, report: &mut SyncReport) -> bool {
        let id = item.record_id();
        let outcome = Retry::immediate(&self.policy)
            .run_with_context("sync_delivery", || {
                self.remote.upsert(item.endpoint, &id, &item.payload)
            })
            .await;

        match outcome.result {
            Ok(()) => {
                // Delivered; a failed delete only means a redundant upsert later
                if let Err(e) = self.queue.complete_delivery(item).await {
                    error!(item_id = %item.id, error = %e, "Failed to remove delivered item");
                }
                report.delivered += 1;
                self.count(metric_names::ITEMS_DELIVERED).await;
                true
            }
            Err(e) => {
                report.failed += 1;
                self.count(metric_names::DELIVERY_FAILURES).await;
                if self.record_failure(item, &e.to_string()).await {
                    report.dead_lettered += 1;
                }
                false
            }
        }
    }

    /// Book a failed delivery; returns true if the item was dead-lettered
    async fn record_failure(&self, item: &QueueItem, error: &str) -> bool {
        let attempts = item.attempts + 1;
        let backoff = self.policy.backoff_after(attempts);
        let next_attempt_at = (!backoff.is_zero())
            .then(|| chrono::Duration::from_std(backoff).ok())
            .flatten()
            .map(|d| Utc::now() + d);

        let attempts = match self.queue.record_failure(item.id, error, next_attempt_at).await {
            Ok(attempts) => attempts,
            Err(e) => {
                error!(item_id = %item.id, error = %e, "Failed to record delivery failure");
                return false;
            }
        };

        if !self.policy.is_exhausted(attempts) {
            warn!(
                item_id = %item.id,
                endpoint = %item.endpoint,
                attempts,
                error,
                "Delivery failed, item stays queued"
            );
            return false;
        }

        error!(
            item_id = %item.id,
            endpoint = %item.endpoint,
            attempts,
            error,
            "Delivery attempts exhausted, moving to dead letters"
        );
        match self.queue.dead_letter(item.id).await {
            Ok(moved) => {
                if moved {
                    self.count(metric_names::ITEMS_DEAD_LETTERED).await;
                }
                moved
            }
            Err(e) => {
                error!(item_id = %item.id, error = %e, "Failed to dead-letter item");
                false
            }
        }
    }

    /// Request verdicts for delivered logs, oldest first. A failed request
    /// keeps the log pending for the next drain.
    async fn request_pending_verdicts(&self, shutdown: &ShutdownSignal, report: &mut SyncReport) {
        let Some(evaluator) = &self.evaluator else {
            return;
        };

        let pending = match self.queue.pending_verdicts().await {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "Failed to load pending verdicts");
                return;
            }
        };

        for entry in pending {
            if shutdown.is_shutdown() {
                report.cancelled = true;
                break;
            }

            match self.request_verdict(evaluator.as_ref(), &entry).await {
                Ok(applied) => {
                    if applied {
                        report.verdicts_applied += 1;
                    }
                    if let Err(e) = self.queue.clear_verdict(&entry.log_id).await {
                        error!(log_id = %entry.log_id, error = %e, "Failed to clear pending verdict");
                    }
                }
                Err(e) => {
                    report.verdicts_pending += 1;
                    warn!(
                        log_id = %entry.log_id,
                        attempts = entry.attempts + 1,
                        error = %e,
                        "Verdict request failed, log stays pending"
                    );
                    if let Err(e) = self
                        .queue
                        .record_verdict_failure(&entry.log_id, &e.to_string())
                        .await
                    {
                        error!(log_id = %entry.log_id, error = %e, "Failed to record verdict failure");
                    }
                }
            }
        }
    }

    /// Ask for the authoritative verdict of one delivered log; `Ok(false)`
    /// when the log cannot be scored or is not held locally
    async fn request_verdict(
        &self,
        evaluator: &dyn FraudEvaluator,
        entry: &PendingVerdict,
    ) -> Result<bool> {
        let log: ProvenanceLog = match serde_json::from_value(entry.payload.clone()) {
            Ok(log) => log,
            Err(e) => {
                debug!(log_id = %entry.log_id, error = %e, "Logs payload is not a provenance log");
                return Ok(false);
            }
        };
        let record = FraudRecord::from_log(&log, self.user_id.as_deref());
        if record.gps.is_none() {
            return Ok(false);
        }

        let verdict = evaluator.evaluate(record).await?;
        self.products.apply_verdict(&log.id, &verdict).await
    }

    async fn count(&self, name: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_counter(name).await;
        }
    }
}

/// Rounded percentage; 100 only once every item is processed
fn percent(processed: usize, total: usize) -> u8 {
    if total == 0 || processed >= total {
        return 100;
    }
    (((processed as f64 / total as f64) * 100.0).round() as u8).min(99)
}
