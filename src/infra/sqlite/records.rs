//! Server-side store for records delivered by field devices

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::SqlitePool;

use crate::domain::Endpoint;
use crate::infra::{RemoteStore, Result};

/// Idempotent upsert store keyed by (endpoint, id)
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a record; returns true if it was new
    pub async fn put(
        &self,
        endpoint: Endpoint,
        id: &str,
        payload: &serde_json::Value,
    ) -> Result<bool> {
        let body = serde_json::to_string(payload)?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let existed: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM remote_records WHERE endpoint = ? AND id = ?")
                .bind(endpoint.as_str())
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        sqlx::query(
            r#"
            INSERT INTO remote_records (endpoint, id, payload, received_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(endpoint, id) DO UPDATE SET payload = excluded.payload, received_at = excluded.received_at
            "#,
        )
        .bind(endpoint.as_str())
        .bind(id)
        .bind(&body)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(existed.is_none())
    }

    pub async fn get(&self, endpoint: Endpoint, id: &str) -> Result<Option<serde_json::Value>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT payload FROM remote_records WHERE endpoint = ? AND id = ?")
                .bind(endpoint.as_str())
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(body,)| serde_json::from_str(&body).map_err(Into::into))
            .transpose()
    }

    pub async fn count(&self, endpoint: Endpoint) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM remote_records WHERE endpoint = ?")
            .bind(endpoint.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as u64)
    }

    /// Cheap query used by readiness checks
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for SqliteRecordStore {
    async fn upsert(
        &self,
        endpoint: Endpoint,
        id: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        self.put(endpoint, id, payload).await.map(|_| ())
    }
}
