//! Server-side fraud evidence: home facilities and per-log verdicts

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqlitePool, FromRow};

use crate::domain::{FraudRecord, FraudVerdict, GpsReading, HomeFacility, PriorLog};
use crate::infra::{FraudEvidenceStore, ProvenanceError, Result};

/// Timestamps are stored as fixed-width RFC 3339 so text order is time order
fn to_db_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Persisted verdict for one log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredVerdict {
    pub log_id: String,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lng: f64,
    #[serde(flatten)]
    pub verdict: FraudVerdict,
}

#[derive(Clone)]
pub struct SqliteEvidenceStore {
    pool: SqlitePool,
}

impl SqliteEvidenceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register or move an artisan's workshop
    pub async fn set_home_facility(&self, user_id: &str, home: HomeFacility) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO artisan_profiles (user_id, home_lat, home_lng, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                home_lat = excluded.home_lat,
                home_lng = excluded.home_lng,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(home.home_lat)
        .bind(home.home_lng)
        .bind(to_db_time(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Verdict recorded for a log, if evaluated
    pub async fn verdict(&self, log_id: &str) -> Result<Option<StoredVerdict>> {
        let row = sqlx::query_as::<_, EvidenceRow>(
            r#"
            SELECT log_id, user_id, timestamp, lat, lng, fraud_score, is_flagged, flag_reason
            FROM log_evidence WHERE log_id = ?
            "#,
        )
        .bind(log_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredVerdict::try_from).transpose()
    }

    /// Flagged logs, newest first
    pub async fn flagged(&self, limit: u32) -> Result<Vec<StoredVerdict>> {
        let rows = sqlx::query_as::<_, EvidenceRow>(
            r#"
            SELECT log_id, user_id, timestamp, lat, lng, fraud_score, is_flagged, flag_reason
            FROM log_evidence WHERE is_flagged = 1
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredVerdict::try_from).collect()
    }
}

#[async_trait]
impl FraudEvidenceStore for SqliteEvidenceStore {
    async fn home_facility(&self, user_id: &str) -> Result<Option<HomeFacility>> {
        let row: Option<(f64, f64)> =
            sqlx::query_as("SELECT home_lat, home_lng FROM artisan_profiles WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(home_lat, home_lng)| HomeFacility { home_lat, home_lng }))
    }

    async fn previous_log(&self, user_id: &str, exclude_log_id: &str) -> Result<Option<PriorLog>> {
        let row: Option<(String, f64, f64)> = sqlx::query_as(
            r#"
            SELECT timestamp, lat, lng FROM log_evidence
            WHERE user_id = ? AND log_id != ?
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(exclude_log_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(timestamp, lat, lng)| {
            Ok(PriorLog {
                timestamp: parse_db_time(&timestamp)?,
                lat,
                lng,
            })
        })
        .transpose()
    }

    async fn record_verdict(
        &self,
        record: &FraudRecord,
        gps: &GpsReading,
        timestamp: DateTime<Utc>,
        verdict: &FraudVerdict,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = to_db_time(Utc::now());
        let flag_reason = verdict.flag_reason();

        sqlx::query(
            r#"
            INSERT INTO log_evidence
                (log_id, user_id, timestamp, lat, lng, fraud_score, is_flagged, flag_reason, evaluated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(log_id) DO UPDATE SET
                user_id = excluded.user_id,
                timestamp = excluded.timestamp,
                lat = excluded.lat,
                lng = excluded.lng,
                fraud_score = excluded.fraud_score,
                is_flagged = excluded.is_flagged,
                flag_reason = excluded.flag_reason,
                evaluated_at = excluded.evaluated_at
            "#,
        )
        .bind(&record.id)
        .bind(record.user_id.as_deref())
        .bind(to_db_time(timestamp))
        .bind(gps.lat)
        .bind(gps.lng)
        .bind(verdict.fraud_score as i64)
        .bind(verdict.is_flagged)
        .bind(flag_reason.as_deref())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        // Mirror the verdict onto the delivered log record, if present
        sqlx::query(
            r#"
            UPDATE remote_records
            SET payload = json_set(payload,
                '$.fraudScore', ?,
                '$.isFlagged', json(?),
                '$.flagReason', ?)
            WHERE endpoint = 'logs' AND id = ?
            "#,
        )
        .bind(verdict.fraud_score as i64)
        .bind(if verdict.is_flagged { "true" } else { "false" })
        .bind(flag_reason.as_deref())
        .bind(&record.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn parse_db_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ProvenanceError::Internal(format!("Invalid timestamp {s:?}: {e}")))
}

#[derive(Debug, FromRow)]
struct EvidenceRow {
    log_id: String,
    user_id: Option<String>,
    timestamp: String,
    lat: f64,
    lng: f64,
    fraud_score: Option<i64>,
    is_flagged: Option<bool>,
    flag_reason: Option<String>,
}

impl TryFrom<EvidenceRow> for StoredVerdict {
    type Error = ProvenanceError;

    fn try_from(row: EvidenceRow) -> Result<Self> {
        let reasons = row
            .flag_reason
            .map(|r| r.split(", ").map(str::to_string).collect())
            .unwrap_or_default();

        Ok(StoredVerdict {
            log_id: row.log_id,
            user_id: row.user_id,
            timestamp: parse_db_time(&row.timestamp)?,
            lat: row.lat,
            lng: row.lng,
            verdict: FraudVerdict {
                fraud_score: row.fraud_score.unwrap_or(0).max(0) as u32,
                is_flagged: row.is_flagged.unwrap_or(false),
                reasons,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Endpoint;
    use crate::infra::SqliteRecordStore;
    use chrono::TimeZone;
    use serde_json::json;

    async fn setup() -> (SqliteEvidenceStore, SqliteRecordStore) {
        let pool = super::super::open_server_in_memory().await.unwrap();
        (
            SqliteEvidenceStore::new(pool.clone()),
            SqliteRecordStore::new(pool),
        )
    }

    fn record(id: &str, user: &str) -> FraudRecord {
        FraudRecord {
            id: id.to_string(),
            user_id: Some(user.to_string()),
            timestamp: None,
            gps: None,
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

    fn verdict(score: u32) -> FraudVerdict {
        FraudVerdict {
            fraud_score: score,
            is_flagged: score >= 80,
            reasons: if score > 0 { vec!["reason".into()] } else { vec![] },
        }
    }

    #[tokio::test]
    async fn test_home_facility() {
        let (store, _) = setup().await;
        assert_eq!(store.home_facility("u1").await.unwrap(), None);

        let home = HomeFacility {
            home_lat: -13.5,
            home_lng: -71.9,
        };
        store.set_home_facility("u1", home).await.unwrap();
        assert_eq!(store.home_facility("u1").await.unwrap(), Some(home));
    }

    #[tokio::test]
    async fn test_previous_log_excludes_current_and_orders_by_time() {
        let (store, _) = setup().await;
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

        store
            .record_verdict(&record("a", "u1"), &gps(1.0, 1.0), t0, &verdict(0))
            .await
            .unwrap();
        store
            .record_verdict(
                &record("b", "u1"),
                &gps(2.0, 2.0),
                t0 + chrono::Duration::hours(1),
                &verdict(0),
            )
            .await
            .unwrap();
        store
            .record_verdict(&record("other", "u2"), &gps(9.0, 9.0), t0, &verdict(0))
            .await
            .unwrap();

        let prior = store.previous_log("u1", "c").await.unwrap().unwrap();
        assert_eq!(prior.lat, 2.0);

        let prior = store.previous_log("u1", "b").await.unwrap().unwrap();
        assert_eq!(prior.timestamp, t0);

        assert!(store.previous_log("u3", "x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_verdict_updates_log_record() {
        let (store, records) = setup().await;
        records
            .put(Endpoint::Logs, "l1", &json!({"id": "l1", "stage": "Intake"}))
            .await
            .unwrap();

        store
            .record_verdict(&record("l1", "u1"), &gps(0.0, 0.0), Utc::now(), &verdict(140))
            .await
            .unwrap();

        let log = records.get(Endpoint::Logs, "l1").await.unwrap().unwrap();
        assert_eq!(log["fraudScore"], 140);
        assert_eq!(log["isFlagged"], true);
        assert_eq!(log["flagReason"], "reason");

        let stored = store.verdict("l1").await.unwrap().unwrap();
        assert_eq!(stored.verdict, verdict(140));
        assert_eq!(store.flagged(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unflagged_score_is_recorded() {
        let (store, _) = setup().await;
        store
            .record_verdict(&record("l2", "u1"), &gps(0.0, 0.0), Utc::now(), &verdict(40))
            .await
            .unwrap();

        let stored = store.verdict("l2").await.unwrap().unwrap();
        assert_eq!(stored.verdict.fraud_score, 40);
        assert!(!stored.verdict.is_flagged);
        assert!(store.flagged(10).await.unwrap().is_empty());
    }
}
