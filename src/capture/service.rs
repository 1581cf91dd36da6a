//! Capture orchestration
//!
//! A capture acquires a position, builds the log, appends it to the product
//! aggregate and hands every resulting write to save-or-queue. Captures
//! degrade instead of failing: no GPS gives a fallback location and no
//! network gives a queued write. Only storage exhaustion is reported, as a
//! warning on the outcome.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{
    sanitize, DppData, Endpoint, Material, Product, ProvenanceLog, QueueItem, Stage,
};
use crate::geolocation::GeolocationAcquirer;
use crate::infra::{RemoteStore, Result, SqliteQueue};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::store::{PlanStore, ProductStore, StorageWarning, Stored};
use crate::sync::ConnectivitySignal;

use super::text::{TextCaptureSource, TextInput, TextSourceKind};

/// Device identity stamped on captured logs
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    pub device_id: String,
    /// Artisan stamped on captured logs
    pub user_id: Option<String>,
    pub text_source: TextSourceKind,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_id: "unknown-device".to_string(),
            user_id: None,
            text_source: TextSourceKind::Typed,
        }
    }
}

impl CaptureConfig {
    /// Load from `DEVICE_ID`, `ARTISAN_USER_ID` and `TEXT_CAPTURE_SOURCE`
    /// (typed | dictated)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let device_id = std::env::var("DEVICE_ID")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.device_id);

        let user_id = std::env::var("ARTISAN_USER_ID")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let text_source = std::env::var("TEXT_CAPTURE_SOURCE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.text_source);

        Self {
            device_id,
            user_id,
            text_source,
        }
    }
}

/// What happened to one write
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// Accepted by the remote store
    Delivered,
    /// Held in the durable queue for the next sync
    Queued(Uuid),
    /// Could not be queued because local storage is full
    NotPersisted(StorageWarning),
}

impl SaveOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SaveOutcome::Delivered)
    }

    fn storage_warning(&self) -> Option<&StorageWarning> {
        match self {
            SaveOutcome::NotPersisted(warning) => Some(warning),
            _ => None,
        }
    }
}

/// One capture action
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub product_id: String,
    pub stage: Stage,
    pub text: TextInput,
    pub photo_ref: Option<String>,
    /// Intake materials
    pub materials: Vec<Material>,
    /// Passport data; only valid with or after a Finishing log
    pub dpp: Option<DppData>,
}

impl CaptureRequest {
    pub fn new(product_id: impl Into<String>, stage: Stage, text: impl Into<TextInput>) -> Self {
        Self {
            product_id: product_id.into(),
            stage,
            text: text.into(),
            photo_ref: None,
            materials: Vec::new(),
            dpp: None,
        }
    }

    pub fn with_photo(mut self, photo_ref: impl Into<String>) -> Self {
        self.photo_ref = Some(photo_ref.into());
        self
    }

    pub fn with_materials(mut self, materials: Vec<Material>) -> Self {
        self.materials = materials;
        self
    }

    pub fn with_dpp(mut self, dpp: DppData) -> Self {
        self.dpp = Some(dpp);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureOutcome {
    pub product: Product,
    pub log: ProvenanceLog,
    /// Every write reached the remote store
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_warning: Option<String>,
}

pub struct CaptureService {
    queue: SqliteQueue,
    remote: Arc<dyn RemoteStore>,
    connectivity: ConnectivitySignal,
    products: Arc<ProductStore>,
    plan: Arc<PlanStore>,
    acquirer: GeolocationAcquirer,
    text: Arc<dyn TextCaptureSource>,
    config: CaptureConfig,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl CaptureService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: SqliteQueue,
        remote: Arc<dyn RemoteStore>,
        connectivity: ConnectivitySignal,
        products: Arc<ProductStore>,
        plan: Arc<PlanStore>,
        acquirer: GeolocationAcquirer,
        text: Arc<dyn TextCaptureSource>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            queue,
            remote,
            connectivity,
            products,
            plan,
            acquirer,
            text,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn products(&self) -> &Arc<ProductStore> {
        &self.products
    }

    /// Deliver now if online, otherwise (or on failure) queue durably.
    ///
    /// Serialization errors are returned to the caller. Storage exhaustion
    /// while queueing becomes [`SaveOutcome::NotPersisted`]. A log delivered
    /// here still waits for its verdict, which the next sync requests.
    pub async fn save<T: Serialize>(&self, endpoint: Endpoint, value: &T) -> Result<SaveOutcome> {
        let item = QueueItem::new(endpoint, sanitize(value)?);

        if self.connectivity.is_online() {
            match self
                .remote
                .upsert(endpoint, &item.record_id(), &item.payload)
                .await
            {
                Ok(()) => {
                    debug!(endpoint = %endpoint, "Saved directly");
                    if endpoint == Endpoint::Logs {
                        if let Err(e) = self
                            .queue
                            .mark_verdict_pending(&item.record_id(), &item.payload)
                            .await
                        {
                            warn!(log_id = %item.record_id(), error = %e, "Failed to track pending verdict");
                        }
                    }
                    return Ok(SaveOutcome::Delivered);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "Direct save failed, queueing");
                }
            }
        }

        match self.queue.enqueue_item(&item).await {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.inc_counter(metric_names::ITEMS_QUEUED).await;
                }
                Ok(SaveOutcome::Queued(item.id))
            }
            Err(e) if e.is_storage_exhausted() => {
                if let Some(metrics) = &self.metrics {
                    metrics.inc_counter(metric_names::STORAGE_WARNINGS).await;
                }
                Ok(SaveOutcome::NotPersisted(
                    self.products.report_storage_exhausted(&e),
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Create a draft product within the current plan's limit
    pub async fn create_product(&self) -> Result<Stored<Product>> {
        let Stored {
            value: product,
            storage_warning,
        } = self.products.create_product(&self.plan.limits()).await?;

        let saved = self.save(Endpoint::Products, &product).await?;
        let storage_warning = storage_warning.or_else(|| saved.storage_warning().cloned());
        let product = self.settle(&product.id, [&saved]).await.unwrap_or(product);

        Ok(Stored {
            value: product,
            storage_warning,
        })
    }

    /// Record one production event on a product
    pub async fn capture(&self, request: CaptureRequest) -> Result<CaptureOutcome> {
        let mut description = self.text.capture(request.text).await?;
        if description.is_empty() && request.stage == Stage::Intake {
            if let Some(material) = request.materials.first() {
                description = material.intake_description();
            }
        }

        let location = self.acquirer.acquire().await;
        if !location.is_verified() {
            if let Some(metrics) = &self.metrics {
                metrics.inc_counter(metric_names::GPS_FALLBACKS).await;
            }
        }

        let mut log = ProvenanceLog::new(
            request.stage,
            description,
            Some(location),
            self.config.device_id.clone(),
        );
        log.photo_ref = request.photo_ref;
        log.user_id = self.config.user_id.clone();

        let Stored {
            value: product,
            storage_warning,
        } = self
            .products
            .append_log(
                &request.product_id,
                log.clone(),
                request.materials.clone(),
                request.dpp,
            )
            .await?;

        let mut outcomes = Vec::with_capacity(request.materials.len() + 2);
        for material in &request.materials {
            outcomes.push(self.save(Endpoint::Materials, material).await?);
        }
        outcomes.push(self.save(Endpoint::Logs, &log).await?);
        outcomes.push(self.save(Endpoint::Products, &product).await?);

        let delivered = outcomes.iter().all(SaveOutcome::is_delivered);
        let storage_warning = storage_warning
            .or_else(|| outcomes.iter().find_map(|o| o.storage_warning().cloned()));
        let product = self.settle(&product.id, &outcomes).await.unwrap_or(product);

        info!(
            product_id = %product.id,
            log_id = %log.id,
            stage = %log.stage,
            gps_verified = log.has_verified_location(),
            delivered,
            "Captured log"
        );

        Ok(CaptureOutcome {
            product,
            log,
            delivered,
            storage_warning: storage_warning.map(|w| w.message),
        })
    }

    /// Mark products synced when everything went straight through and
    /// nothing older is still queued; returns the refreshed product
    async fn settle<'a>(
        &self,
        product_id: &str,
        outcomes: impl IntoIterator<Item = &'a SaveOutcome>,
    ) -> Option<Product> {
        if !outcomes.into_iter().all(SaveOutcome::is_delivered) {
            return None;
        }
        match self.queue.count().await {
            Ok(0) => {
                self.products.mark_all_synced().await;
                self.products.get(product_id).await
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Failed to inspect queue after direct save");
                None
            }
        }
    }
}
