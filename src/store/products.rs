//! Product aggregate store
//!
//! Single owner of all [`Product`] instances. Every mutation takes the write
//! lock, so mutations are serialized, and is followed by a snapshot write
//! when persistence is configured.

use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};

use crate::domain::{
    DppData, FraudVerdict, Material, PlanLimits, Product, ProductStatus, ProvenanceLog, Stage,
};
use crate::infra::{ProvenanceError, Result, SqliteProductSnapshots};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Local persistence is full; data may not survive a restart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageWarning {
    pub message: String,
}

/// Change notifications for store consumers
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    ProductCreated { product_id: String },
    ProductUpdated { product_id: String },
    VerdictApplied { product_id: String, log_id: String, is_flagged: bool },
    AllSynced { count: usize },
    StorageWarning(StorageWarning),
}

/// A mutation result plus any storage warning raised while persisting it
#[derive(Debug, Clone)]
pub struct Stored<T> {
    pub value: T,
    pub storage_warning: Option<StorageWarning>,
}

pub struct ProductStore {
    products: RwLock<Vec<Product>>,
    snapshots: Option<SqliteProductSnapshots>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for ProductStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProductStore {
    /// In-memory store without persistence
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            products: RwLock::new(Vec::new()),
            snapshots: None,
            events,
        }
    }

    /// Store backed by local snapshots, loading existing products
    pub async fn with_snapshots(snapshots: SqliteProductSnapshots) -> Result<Self> {
        let products = snapshots.load_all().await?;
        info!(count = products.len(), "Loaded product snapshots");

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            products: RwLock::new(products),
            snapshots: Some(snapshots),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub async fn get(&self, id: &str) -> Option<Product> {
        self.products.read().await.iter().find(|p| p.id == id).cloned()
    }

    pub async fn count(&self) -> usize {
        self.products.read().await.len()
    }

    pub async fn unsynced_count(&self) -> usize {
        self.products.read().await.iter().filter(|p| !p.synced).count()
    }

    /// Create a draft product named `Item #<n+1>` within the plan's limit
    pub async fn create_product(&self, plan: &PlanLimits) -> Result<Stored<Product>> {
        let mut products = self.products.write().await;

        if !plan.has_capacity(products.len()) {
            return Err(ProvenanceError::PlanLimitReached {
                tier: plan.tier.to_string(),
                limit: plan.product_limit,
            });
        }

        let product = Product::new(format!("Item #{}", products.len() + 1));
        products.push(product.clone());
        let storage_warning = self.persist(&product).await;
        drop(products);

        info!(product_id = %product.id, name = %product.name, "Product created");
        self.emit(StoreEvent::ProductCreated {
            product_id: product.id.clone(),
        });

        Ok(Stored {
            value: product,
            storage_warning,
        })
    }

    /// Append a log (and any intake materials) to a product.
    ///
    /// A Finishing log completes the product. DPP data is only accepted
    /// together with a Finishing log.
    pub async fn append_log(
        &self,
        product_id: &str,
        log: ProvenanceLog,
        materials: Vec<Material>,
        dpp: Option<DppData>,
    ) -> Result<Stored<Product>> {
        let mut products = self.products.write().await;
        let product = products
            .iter_mut()
            .find(|p| p.id == product_id)
            .ok_or_else(|| ProvenanceError::ProductNotFound(product_id.to_string()))?;

        let completes = log.stage == Stage::Finishing;
        if dpp.is_some() && !completes && !product.is_completed() {
            return Err(ProvenanceError::InvalidStateTransition {
                product_id: product_id.to_string(),
                from: product.status.to_string(),
                to: ProductStatus::Completed.to_string(),
            });
        }

        if product.thumbnail.is_none() && log.has_photo() {
            product.thumbnail = log.photo_ref.clone();
        }
        product.materials.extend(materials);
        product.logs.push(log);
        if completes {
            product.status = ProductStatus::Completed;
        }
        if dpp.is_some() {
            product.dpp = dpp;
        }
        product.synced = false;

        let product = product.clone();
        let storage_warning = self.persist(&product).await;
        drop(products);

        self.emit(StoreEvent::ProductUpdated {
            product_id: product.id.clone(),
        });

        Ok(Stored {
            value: product,
            storage_warning,
        })
    }

    /// Mark every unsynced product as synced; returns how many changed
    pub async fn mark_all_synced(&self) -> usize {
        let mut products = self.products.write().await;
        let mut changed = Vec::new();
        for product in products.iter_mut().filter(|p| !p.synced) {
            product.synced = true;
            changed.push(product.clone());
        }

        for product in &changed {
            self.persist(product).await;
        }
        drop(products);

        if !changed.is_empty() {
            self.emit(StoreEvent::AllSynced {
                count: changed.len(),
            });
        }
        changed.len()
    }

    /// Attach a server verdict to the log it was computed for
    pub async fn apply_verdict(&self, log_id: &str, verdict: &FraudVerdict) -> Result<bool> {
        let mut products = self.products.write().await;

        let Some(product) = products
            .iter_mut()
            .find(|p| p.logs.iter().any(|l| l.id == log_id))
        else {
            return Ok(false);
        };

        if let Some(log) = product.logs.iter_mut().find(|l| l.id == log_id) {
            log.fraud_score = Some(verdict.fraud_score);
            log.is_flagged = Some(verdict.is_flagged);
            log.flag_reason = verdict.flag_reason();
        }

        let product = product.clone();
        self.persist(&product).await;
        drop(products);

        self.emit(StoreEvent::VerdictApplied {
            product_id: product.id,
            log_id: log_id.to_string(),
            is_flagged: verdict.is_flagged,
        });
        Ok(true)
    }

    /// Surface a storage exhaustion raised outside the store (e.g. the queue)
    pub fn report_storage_exhausted(&self, err: &ProvenanceError) -> StorageWarning {
        let warning = StorageWarning {
            message: format!("Local storage is full; captured data may not persist ({err})"),
        };
        warn!(error = %err, "Local storage exhausted");
        self.emit(StoreEvent::StorageWarning(warning.clone()));
        warning
    }

    async fn persist(&self, product: &Product) -> Option<StorageWarning> {
        let snapshots = self.snapshots.as_ref()?;
        match snapshots.save(product).await {
            Ok(()) => None,
            Err(e) if e.is_storage_exhausted() => Some(self.report_storage_exhausted(&e)),
            Err(e) => {
                error!(product_id = %product.id, error = %e, "Failed to persist product snapshot");
                None
            }
        }
    }
}
