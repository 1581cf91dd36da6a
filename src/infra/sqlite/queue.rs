//! SQLite-backed durable offline queue
//!
//! Every mutation made while offline (or whose delivery failed) is appended
//! here and survives process restarts. Items leave the queue only through
//! [`SqliteQueue::remove`] after the remote store confirmed the write, or by
//! being moved to the dead-letter table once a configured attempt ceiling
//! is reached.
//!
//! Delivered logs are tracked in `pending_verdicts` until their fraud
//! verdict has been applied locally.

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, FromRow};
use tracing::info;
use uuid::Uuid;

use crate::domain::{Endpoint, QueueItem};
use crate::infra::{ProvenanceError, Result};

/// SQLite-based durable queue of pending remote writes
#[derive(Clone)]
pub struct SqliteQueue {
    pool: SqlitePool,
}

impl SqliteQueue {
    /// Create a queue over a pool whose schema is already migrated
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema
    pub async fn initialize(&self) -> Result<()> {
        crate::migrations::run_local(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Append a sanitized payload, returning the generated item id
    pub async fn enqueue(&self, endpoint: Endpoint, payload: &serde_json::Value) -> Result<Uuid> {
        let item = QueueItem::new(endpoint, payload.clone());
        self.enqueue_item(&item).await?;
        Ok(item.id)
    }

    /// Append an item whose id was generated by the caller
    pub async fn enqueue_item(&self, item: &QueueItem) -> Result<()> {
        let payload_json = serde_json::to_string(&item.payload)?;

        sqlx::query(
            r#"
            INSERT INTO offline_queue (id, endpoint, payload, timestamp, attempts, last_error)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.id.to_string())
        .bind(item.endpoint.as_str())
        .bind(&payload_json)
        .bind(item.enqueued_at.timestamp_millis())
        .bind(item.attempts as i64)
        .bind(item.last_error.as_deref())
        .execute(&self.pool)
        .await?;

        info!(
            item_id = %item.id,
            endpoint = %item.endpoint,
            "Queued offline write"
        );
        Ok(())
    }

    /// All queued items in FIFO order
    pub async fn drain_all(&self) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query_as::<_, QueueRow>(
            r#"
            SELECT id, endpoint, payload, timestamp, attempts, last_error
            FROM offline_queue
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(QueueItem::try_from).collect()
    }

    /// Items whose backoff has elapsed at `now`, in FIFO order
    pub async fn due_items(&self, now: DateTime<Utc>) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query_as::<_, QueueRow>(
            r#"
            SELECT id, endpoint, payload, timestamp, attempts, last_error
            FROM offline_queue
            WHERE next_attempt_at IS NULL OR next_attempt_at <= ?
            ORDER BY seq ASC
            "#,
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(QueueItem::try_from).collect()
    }

    /// Delete an item after confirmed remote delivery
    pub async fn remove(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM offline_queue WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a delivered item; a delivered log becomes a pending verdict in
    /// the same transaction
    pub async fn complete_delivery(&self, item: &QueueItem) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM offline_queue WHERE id = ?")
            .bind(item.id.to_string())
            .execute(&mut *tx)
            .await?;

        if item.endpoint == Endpoint::Logs {
            insert_pending_verdict(&mut tx, &item.record_id(), &item.payload).await?;
        }

        tx.commit().await?;
        Ok(removed.rows_affected() > 0)
    }

    /// Track a log delivered outside the queue until its verdict arrives
    pub async fn mark_verdict_pending(&self, log_id: &str, payload: &serde_json::Value) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_pending_verdict(&mut tx, log_id, payload).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Logs awaiting a verdict, oldest delivery first
    pub async fn pending_verdicts(&self) -> Result<Vec<PendingVerdict>> {
        let rows = sqlx::query_as::<_, PendingVerdictRow>(
            r#"
            SELECT log_id, payload, attempts, last_error
            FROM pending_verdicts
            ORDER BY delivered_at ASC, log_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PendingVerdict::try_from).collect()
    }

    pub async fn pending_verdict_count(&self) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pending_verdicts")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as u64)
    }

    /// Forget a log whose verdict was applied (or can never be computed)
    pub async fn clear_verdict(&self, log_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pending_verdicts WHERE log_id = ?")
            .bind(log_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a failed verdict request; the log stays pending
    pub async fn record_verdict_failure(&self, log_id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE pending_verdicts SET attempts = attempts + 1, last_error = ? WHERE log_id = ?",
        )
        .bind(error)
        .bind(log_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Number of queued items
    pub async fn count(&self) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM offline_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as u64)
    }

    /// Queued items per endpoint
    pub async fn count_by_endpoint(&self) -> Result<Vec<(Endpoint, u64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT endpoint, COUNT(*) FROM offline_queue GROUP BY endpoint ORDER BY endpoint",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(endpoint, count)| {
                let endpoint = endpoint
                    .parse::<Endpoint>()
                    .map_err(ProvenanceError::Internal)?;
                Ok((endpoint, count as u64))
            })
            .collect()
    }

    /// Record a failed delivery; returns the new attempt count
    pub async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<u32> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE offline_queue
            SET attempts = attempts + 1, last_error = ?, next_attempt_at = ?
            WHERE id = ?
            RETURNING attempts
            "#,
        )
        .bind(error)
        .bind(next_attempt_at.map(|t| t.timestamp_millis()))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.0 as u32).unwrap_or(0))
    }

    /// Move an item to the dead-letter table
    pub async fn dead_letter(&self, id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query(
            r#"
            INSERT OR REPLACE INTO offline_queue_dead_letters
                (id, endpoint, payload, timestamp, attempts, last_error, dead_lettered_at)
            SELECT id, endpoint, payload, timestamp, attempts, last_error, ?
            FROM offline_queue WHERE id = ?
            "#,
        )
        .bind(Utc::now().timestamp_millis())
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM offline_queue WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(moved.rows_affected() > 0)
    }

    /// Dead-lettered items, oldest first
    pub async fn list_dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let rows = sqlx::query_as::<_, DeadLetterRow>(
            r#"
            SELECT id, endpoint, payload, timestamp, attempts, last_error, dead_lettered_at
            FROM offline_queue_dead_letters
            ORDER BY dead_lettered_at ASC, timestamp ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DeadLetter::try_from).collect()
    }

    /// Put every dead-lettered item back at the tail of the queue with a
    /// fresh attempt budget
    pub async fn requeue_dead_letters(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO offline_queue (id, endpoint, payload, timestamp, attempts, last_error)
            SELECT id, endpoint, payload, timestamp, 0, last_error
            FROM offline_queue_dead_letters
            ORDER BY dead_lettered_at ASC, timestamp ASC
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM offline_queue_dead_letters")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let requeued = result.rows_affected();
        if requeued > 0 {
            info!(count = requeued, "Requeued dead-lettered items");
        }
        Ok(requeued)
    }
}

async fn insert_pending_verdict(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    log_id: &str,
    payload: &serde_json::Value,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO pending_verdicts (log_id, payload, delivered_at)
        VALUES (?, ?, ?)
        ON CONFLICT(log_id) DO UPDATE SET payload = excluded.payload
        "#,
    )
    .bind(log_id)
    .bind(serde_json::to_string(payload)?)
    .bind(Utc::now().timestamp_millis())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// A delivered log whose verdict has not been applied yet
#[derive(Debug, Clone, PartialEq)]
pub struct PendingVerdict {
    pub log_id: String,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, FromRow)]
struct PendingVerdictRow {
    log_id: String,
    payload: String,
    attempts: i64,
    last_error: Option<String>,
}

impl TryFrom<PendingVerdictRow> for PendingVerdict {
    type Error = ProvenanceError;

    fn try_from(row: PendingVerdictRow) -> Result<Self> {
        Ok(PendingVerdict {
            log_id: row.log_id,
            payload: serde_json::from_str(&row.payload)?,
            attempts: row.attempts.max(0) as u32,
            last_error: row.last_error,
        })
    }
}

/// A queue item that exhausted its delivery attempts
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub item: QueueItem,
    pub dead_lettered_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct QueueRow {
    id: String,
    endpoint: String,
    payload: String,
    timestamp: i64,
    attempts: i64,
    last_error: Option<String>,
}

#[derive(Debug, FromRow)]
struct DeadLetterRow {
    id: String,
    endpoint: String,
    payload: String,
    timestamp: i64,
    attempts: i64,
    last_error: Option<String>,
    dead_lettered_at: i64,
}

fn millis_to_datetime(ms: i64, field: &str) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| ProvenanceError::Internal(format!("Invalid {field}: {ms}")))
}

impl TryFrom<QueueRow> for QueueItem {
    type Error = ProvenanceError;

    fn try_from(row: QueueRow) -> Result<Self> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| ProvenanceError::Internal(format!("Invalid queue id: {}", e)))?;

        let endpoint = row
            .endpoint
            .parse::<Endpoint>()
            .map_err(ProvenanceError::Internal)?;

        let payload: serde_json::Value = serde_json::from_str(&row.payload)?;

        Ok(QueueItem {
            id,
            endpoint,
            payload,
            enqueued_at: millis_to_datetime(row.timestamp, "timestamp")?,
            attempts: row.attempts.max(0) as u32,
            last_error: row.last_error,
        })
    }
}

impl TryFrom<DeadLetterRow> for DeadLetter {
    type Error = ProvenanceError;

    fn try_from(row: DeadLetterRow) -> Result<Self> {
        let dead_lettered_at = millis_to_datetime(row.dead_lettered_at, "dead_lettered_at")?;
        let item = QueueItem::try_from(QueueRow {
            id: row.id,
            endpoint: row.endpoint,
            payload: row.payload,
            timestamp: row.timestamp,
            attempts: row.attempts,
            last_error: row.last_error,
        })?;
        Ok(DeadLetter {
            item,
            dead_lettered_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn create_test_queue() -> SqliteQueue {
        let pool = super::super::open_local_in_memory().await.unwrap();
        SqliteQueue::new(pool)
    }

    #[tokio::test]
    async fn test_enqueue_and_drain_fifo() {
        let queue = create_test_queue().await;

        let a = queue.enqueue(Endpoint::Products, &json!({"id": "p1"})).await.unwrap();
        let b = queue.enqueue(Endpoint::Logs, &json!({"id": "l1"})).await.unwrap();
        let c = queue.enqueue(Endpoint::Materials, &json!({"id": "m1"})).await.unwrap();

        let items = queue.drain_all().await.unwrap();
        let ids: Vec<Uuid> = items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![a, b, c]);
        assert_eq!(items[1].endpoint, Endpoint::Logs);
        assert_eq!(items[1].payload, json!({"id": "l1"}));
        assert_eq!(queue.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_drain_does_not_remove() {
        let queue = create_test_queue().await;
        queue.enqueue(Endpoint::Logs, &json!(1)).await.unwrap();

        queue.drain_all().await.unwrap();
        queue.drain_all().await.unwrap();
        assert_eq!(queue.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_no_deduplication() {
        let queue = create_test_queue().await;
        let payload = json!({"same": true});
        queue.enqueue(Endpoint::Logs, &payload).await.unwrap();
        queue.enqueue(Endpoint::Logs, &payload).await.unwrap();
        assert_eq!(queue.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_remove() {
        let queue = create_test_queue().await;
        let id = queue.enqueue(Endpoint::Logs, &json!({})).await.unwrap();

        assert!(queue.remove(id).await.unwrap());
        assert!(!queue.remove(id).await.unwrap());
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_record_failure_and_backoff() {
        let queue = create_test_queue().await;
        let id = queue.enqueue(Endpoint::Logs, &json!({})).await.unwrap();

        let later = Utc::now() + chrono::Duration::minutes(5);
        let attempts = queue.record_failure(id, "503", Some(later)).await.unwrap();
        assert_eq!(attempts, 1);

        assert!(queue.due_items(Utc::now()).await.unwrap().is_empty());
        let due = queue
            .due_items(later + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].attempts, 1);
        assert_eq!(due[0].last_error.as_deref(), Some("503"));

        // Backoff never hides items from the full drain
        assert_eq!(queue.drain_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dead_letter_and_requeue() {
        let queue = create_test_queue().await;
        let id = queue.enqueue(Endpoint::Products, &json!({"n": 1})).await.unwrap();
        queue.record_failure(id, "rejected", None).await.unwrap();

        assert!(queue.dead_letter(id).await.unwrap());
        assert_eq!(queue.count().await.unwrap(), 0);

        let dead = queue.list_dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].item.id, id);
        assert_eq!(dead[0].item.attempts, 1);

        assert_eq!(queue.requeue_dead_letters().await.unwrap(), 1);
        assert!(queue.list_dead_letters().await.unwrap().is_empty());

        let items = queue.drain_all().await.unwrap();
        assert_eq!(items[0].id, id);
        assert_eq!(items[0].attempts, 0);
        assert_eq!(items[0].payload, json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_delivered_log_becomes_pending_verdict() {
        let queue = create_test_queue().await;
        queue.enqueue(Endpoint::Logs, &json!({"id": "l1"})).await.unwrap();
        queue.enqueue(Endpoint::Products, &json!({"id": "p1"})).await.unwrap();
        let items = queue.drain_all().await.unwrap();

        assert!(queue.complete_delivery(&items[0]).await.unwrap());
        assert!(queue.complete_delivery(&items[1]).await.unwrap());
        assert!(!queue.complete_delivery(&items[1]).await.unwrap());
        assert_eq!(queue.count().await.unwrap(), 0);

        let pending = queue.pending_verdicts().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].log_id, "l1");
        assert_eq!(pending[0].payload, json!({"id": "l1"}));

        queue.record_verdict_failure("l1", "502").await.unwrap();
        let pending = queue.pending_verdicts().await.unwrap();
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("502"));

        // a repeated delivery keeps the failure history
        queue.mark_verdict_pending("l1", &json!({"id": "l1", "v": 2})).await.unwrap();
        assert_eq!(queue.pending_verdict_count().await.unwrap(), 1);
        assert_eq!(queue.pending_verdicts().await.unwrap()[0].attempts, 1);

        assert!(queue.clear_verdict("l1").await.unwrap());
        assert_eq!(queue.pending_verdict_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_count_by_endpoint() {
        let queue = create_test_queue().await;
        queue.enqueue(Endpoint::Logs, &json!(1)).await.unwrap();
        queue.enqueue(Endpoint::Logs, &json!(2)).await.unwrap();
        queue.enqueue(Endpoint::Products, &json!(3)).await.unwrap();

        let counts = queue.count_by_endpoint().await.unwrap();
        assert_eq!(counts, vec![(Endpoint::Logs, 2), (Endpoint::Products, 1)]);
    }
}
