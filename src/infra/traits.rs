//! Trait definitions for provenance capture collaborators

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;

use crate::domain::{
    Endpoint, FraudRecord, FraudVerdict, GpsReading, HomeFacility, PositionError, PositionFix,
    PositionRequest, PriorLog,
};

use super::Result;

/// Remote store receiving queued writes.
///
/// Upserts must be idempotent on `id`: delivery is at-least-once.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Upsert one record on a logical endpoint
    async fn upsert(&self, endpoint: Endpoint, id: &str, payload: &serde_json::Value)
        -> Result<()>;
}

/// Platform location capability.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Whether the platform has any location capability at all
    fn is_supported(&self) -> bool;

    /// Issue one position request
    async fn current_position(
        &self,
        request: PositionRequest,
    ) -> std::result::Result<PositionFix, PositionError>;
}

/// Server-side evidence used and written by fraud evaluation.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FraudEvidenceStore: Send + Sync {
    /// Registered home facility of an artisan
    async fn home_facility(&self, user_id: &str) -> Result<Option<HomeFacility>>;

    /// Most recent evidence for the artisan, excluding `exclude_log_id`
    async fn previous_log(&self, user_id: &str, exclude_log_id: &str)
        -> Result<Option<PriorLog>>;

    /// Persist the verdict (and the evidence it was computed from) on the log
    async fn record_verdict(
        &self,
        record: &FraudRecord,
        gps: &GpsReading,
        timestamp: DateTime<Utc>,
        verdict: &FraudVerdict,
    ) -> Result<()>;
}

/// Something that can produce an authoritative verdict for a log.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FraudEvaluator: Send + Sync {
    async fn evaluate(&self, record: FraudRecord) -> Result<FraudVerdict>;
}
