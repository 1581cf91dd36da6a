//! Evaluation service: gathers evidence, scores, and records the verdict.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::domain::{FraudRecord, FraudRequest, FraudVerdict};
use crate::infra::{FraudEvaluator, FraudEvidenceStore, ProvenanceError, Result};
use crate::metrics::{metric_names, MetricsRegistry};

use super::FraudEngine;

#[derive(Clone)]
pub struct FraudService {
    engine: FraudEngine,
    evidence: Arc<dyn FraudEvidenceStore>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl FraudService {
    pub fn new(engine: FraudEngine, evidence: Arc<dyn FraudEvidenceStore>) -> Self {
        Self {
            engine,
            evidence,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Evaluate a boundary request; rejects requests without a record or GPS
    pub async fn evaluate_request(&self, request: FraudRequest) -> Result<FraudVerdict> {
        let record = request.record.ok_or(ProvenanceError::MissingGps)?;
        self.evaluate_record(record).await
    }

    /// Score one log and persist the verdict, flagged or not
    pub async fn evaluate_record(&self, record: FraudRecord) -> Result<FraudVerdict> {
        let Some(gps) = record.gps.clone() else {
            if let Some(metrics) = &self.metrics {
                metrics.inc_counter(metric_names::FRAUD_REJECTED).await;
            }
            return Err(ProvenanceError::MissingGps);
        };
        let timestamp = record.timestamp.unwrap_or_else(Utc::now);

        let (home, prior) = match record.user_id.as_deref() {
            Some(user_id) => (
                self.evidence.home_facility(user_id).await?,
                self.evidence.previous_log(user_id, &record.id).await?,
            ),
            None => (None, None),
        };

        let verdict = self.engine.score(&gps, timestamp, home, prior.as_ref());
        self.evidence
            .record_verdict(&record, &gps, timestamp, &verdict)
            .await?;

        if verdict.is_flagged {
            warn!(
                log_id = %record.id,
                user_id = record.user_id.as_deref().unwrap_or("unknown"),
                fraud_score = verdict.fraud_score,
                reasons = ?verdict.reasons,
                "[ALERT] Fraud detected"
            );
        } else {
            debug!(
                log_id = %record.id,
                fraud_score = verdict.fraud_score,
                "Log passed fraud checks"
            );
        }

        if let Some(metrics) = &self.metrics {
            metrics.inc_counter(metric_names::FRAUD_EVALUATIONS).await;
            if verdict.is_flagged {
                metrics.inc_counter(metric_names::FRAUD_FLAGGED).await;
            }
        }

        Ok(verdict)
    }
}

#[async_trait]
impl FraudEvaluator for FraudService {
    async fn evaluate(&self, record: FraudRecord) -> Result<FraudVerdict> {
        self.evaluate_record(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GpsReading, HomeFacility, PriorLog};
    use crate::infra::MockFraudEvidenceStore;
    use chrono::{Duration, TimeZone};

    fn record(user_id: Option<&str>, gps: Option<GpsReading>) -> FraudRecord {
        FraudRecord {
            id: "log-b".into(),
            user_id: user_id.map(str::to_string),
            timestamp: Some(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 36).unwrap()),
            gps,
        }
    }

    fn gps(lat: f64, lng: f64) -> GpsReading {
        GpsReading {
            lat,
            lng,
            is_manual: false,
            is_mocked: false,
        }
    }

    #[tokio::test]
    async fn test_missing_gps_is_rejected_without_scoring() {
        let mut store = MockFraudEvidenceStore::new();
        store.expect_record_verdict().never();
        let metrics = Arc::new(MetricsRegistry::new());
        let service = FraudService::new(FraudEngine::default(), Arc::new(store))
            .with_metrics(metrics.clone());

        let err = service
            .evaluate_request(FraudRequest {
                record: Some(record(Some("a"), None)),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProvenanceError::MissingGps));

        let err = service
            .evaluate_request(FraudRequest { record: None })
            .await
            .unwrap_err();
        assert!(matches!(err, ProvenanceError::MissingGps));
        assert_eq!(metrics.get_counter(metric_names::FRAUD_REJECTED).await, 1);
    }

    #[tokio::test]
    async fn test_anonymous_record_skips_lookups() {
        let mut store = MockFraudEvidenceStore::new();
        store.expect_home_facility().never();
        store.expect_previous_log().never();
        store
            .expect_record_verdict()
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let service = FraudService::new(FraudEngine::default(), Arc::new(store));
        let verdict = service
            .evaluate_record(record(None, Some(gps(0.0, 0.9))))
            .await
            .unwrap();
        assert_eq!(verdict.fraud_score, 0);
    }

    #[tokio::test]
    async fn test_uses_home_and_prior_evidence() {
        let mut store = MockFraudEvidenceStore::new();
        store
            .expect_home_facility()
            .withf(|user| user.to_string() == "artisan-7")
            .returning(|_| {
                Ok(Some(HomeFacility {
                    home_lat: 0.0,
                    home_lng: 0.0,
                }))
            });
        store
            .expect_previous_log()
            .withf(|user, exclude| user.to_string() == "artisan-7" && exclude.to_string() == "log-b")
            .returning(|_, _| {
                Ok(Some(PriorLog {
                    timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap(),
                    lat: 0.0,
                    lng: 0.0,
                }))
            });
        store
            .expect_record_verdict()
            .withf(|record, _, _, verdict| record.id == "log-b" && verdict.fraud_score == 90)
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let service = FraudService::new(FraudEngine::default(), Arc::new(store));
        let verdict = service
            .evaluate_record(record(Some("artisan-7"), Some(gps(0.0, 0.9))))
            .await
            .unwrap();

        assert_eq!(verdict.fraud_score, 90);
        assert!(verdict.is_flagged);
        assert!(verdict.reasons[0].starts_with("Location Deviation"));
        assert!(verdict.reasons[1].starts_with("Impossible Travel Speed"));
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let mut store = MockFraudEvidenceStore::new();
        store
            .expect_home_facility()
            .returning(|_| Err(ProvenanceError::Internal("down".into())));

        let service = FraudService::new(FraudEngine::default(), Arc::new(store));
        let result = service
            .evaluate_record(record(Some("a"), Some(gps(0.0, 0.0))))
            .await;
        assert!(matches!(result, Err(ProvenanceError::Internal(_))));
    }

    #[tokio::test]
    async fn test_reevaluation_is_idempotent() {
        let pool = crate::infra::sqlite::open_server_in_memory().await.unwrap();
        let store = crate::infra::SqliteEvidenceStore::new(pool);
        store
            .set_home_facility(
                "a",
                HomeFacility {
                    home_lat: 0.0,
                    home_lng: 0.0,
                },
            )
            .await
            .unwrap();
        let service = FraudService::new(FraudEngine::default(), Arc::new(store.clone()));

        let first = FraudRecord {
            id: "log-a".into(),
            timestamp: Some(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()),
            ..record(Some("a"), Some(gps(0.0, 0.0)))
        };
        service.evaluate_record(first.clone()).await.unwrap();

        let second = FraudRecord {
            timestamp: first.timestamp.map(|t| t + Duration::minutes(30)),
            ..record(Some("a"), Some(gps(0.0, 0.9)))
        };
        let v1 = service.evaluate_record(second.clone()).await.unwrap();
        let v2 = service.evaluate_record(second).await.unwrap();
        assert_eq!(v1, v2);
        assert_eq!(v1.fraud_score, 90);

        let stored = store.verdict("log-b").await.unwrap().unwrap();
        assert_eq!(stored.verdict, v1);
    }
}
