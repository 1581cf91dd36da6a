//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use provenance_capture::capture::{CaptureConfig, CaptureService, TypedText};
use provenance_capture::domain::{Endpoint, GeoLocation, ProvenanceLog, Stage, SubscriptionTier};
use provenance_capture::geolocation::{AcquirerConfig, FixedLocationProvider, GeolocationAcquirer};
use provenance_capture::infra::sqlite::{open_local_in_memory, open_server_in_memory};
use provenance_capture::infra::{
    LocationProvider, ProvenanceError, RemoteStore, Result, SqliteQueue,
};
use provenance_capture::store::{PlanStore, ProductStore};
use provenance_capture::sync::ConnectivitySignal;

/// Workshop in Cusco
pub const CUSCO: (f64, f64) = (-13.5320, -71.9675);

/// Roughly 100 km north-west of Cusco
pub const ABANCAY: (f64, f64) = (-13.6339, -72.8814);

pub const ARTISAN_ID: &str = "artisan-7";

/// Fixed reference instant
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
}

pub fn minutes_after(base: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    base + Duration::minutes(minutes)
}

/// A log with a verified fix at `(lat, lng)`
pub fn log_at(stage: Stage, (lat, lng): (f64, f64), at: DateTime<Utc>) -> ProvenanceLog {
    ProvenanceLog::new(
        stage,
        format!("{} test", stage.label()),
        Some(GeoLocation::fix(lat, lng, Some(5.0))),
        "device-test",
    )
    .with_timestamp(at)
}

pub async fn local_queue() -> SqliteQueue {
    SqliteQueue::new(open_local_in_memory().await.unwrap())
}

pub async fn server_pool() -> sqlx::SqlitePool {
    open_server_in_memory().await.unwrap()
}

pub fn gps_at((lat, lng): (f64, f64)) -> Arc<dyn LocationProvider> {
    Arc::new(FixedLocationProvider::new(lat, lng, Some(8.0)))
}

/// Capture service with a typed text source and a FREE plan
pub fn capture_service(
    queue: SqliteQueue,
    remote: Arc<dyn RemoteStore>,
    connectivity: ConnectivitySignal,
    products: Arc<ProductStore>,
    provider: Arc<dyn LocationProvider>,
) -> CaptureService {
    CaptureService::new(
        queue,
        remote,
        connectivity,
        products,
        Arc::new(PlanStore::new(SubscriptionTier::Free)),
        GeolocationAcquirer::new(provider, AcquirerConfig::default()),
        Arc::new(TypedText),
        CaptureConfig {
            device_id: "device-test".to_string(),
            ..CaptureConfig::default()
        },
    )
}

/// One accepted upsert
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub endpoint: Endpoint,
    pub id: String,
    pub payload: serde_json::Value,
}

/// Remote store that accepts everything and remembers the order
#[derive(Default)]
pub struct RecordingRemote {
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn ids_for(&self, endpoint: Endpoint) -> Vec<String> {
        self.deliveries()
            .into_iter()
            .filter(|d| d.endpoint == endpoint)
            .map(|d| d.id)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.deliveries.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteStore for RecordingRemote {
    async fn upsert(
        &self,
        endpoint: Endpoint,
        id: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        self.deliveries.lock().unwrap().push(Delivery {
            endpoint,
            id: id.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}

/// Fails the first `failures` calls, and any call for a poisoned id
#[derive(Default)]
pub struct FlakyRemote {
    failures_left: AtomicUsize,
    poisoned: Mutex<HashSet<String>>,
    attempts: AtomicUsize,
    pub inner: RecordingRemote,
}

impl FlakyRemote {
    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    pub fn poison(&self, id: &str) {
        self.poisoned.lock().unwrap().insert(id.to_string());
    }

    pub fn heal(&self) {
        self.poisoned.lock().unwrap().clear();
        self.failures_left.store(0, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for FlakyRemote {
    async fn upsert(
        &self,
        endpoint: Endpoint,
        id: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let budget = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if budget.is_ok() {
            return Err(ProvenanceError::Delivery("HTTP 503".into()));
        }
        if self.poisoned.lock().unwrap().contains(id) {
            return Err(ProvenanceError::Delivery(format!("rejected {id}")));
        }
        self.inner.upsert(endpoint, id, payload).await
    }
}
