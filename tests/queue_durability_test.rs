//! Restart durability of the offline queue and product snapshots.
//!
//! Each test writes to an on-disk SQLite file, closes the pool and reopens
//! the same file, the way a field device comes back after being killed.

mod common;

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use provenance_capture::domain::{Endpoint, Stage, SubscriptionTier};
use provenance_capture::infra::sqlite::open_file;
use provenance_capture::infra::{SqliteProductSnapshots, SqliteQueue};
use provenance_capture::store::ProductStore;

use common::*;

async fn open_queue(dir: &TempDir) -> SqliteQueue {
    let pool = open_file(dir.path().join("device.db")).await.unwrap();
    let queue = SqliteQueue::new(pool);
    queue.initialize().await.unwrap();
    queue
}

#[tokio::test]
async fn test_queue_survives_restart_in_order() {
    let dir = TempDir::new().unwrap();

    let ids = {
        let queue = open_queue(&dir).await;
        let a = queue
            .enqueue(Endpoint::Products, &json!({"id": "p-1", "name": "Item #1"}))
            .await
            .unwrap();
        let b = queue
            .enqueue(Endpoint::Logs, &json!({"id": "l-1", "stage": "Intake"}))
            .await
            .unwrap();
        let c = queue
            .enqueue(Endpoint::Materials, &json!({"id": "m-1", "materialType": "Wool"}))
            .await
            .unwrap();
        queue.pool().close().await;
        vec![a, b, c]
    };

    let queue = open_queue(&dir).await;
    let items = queue.drain_all().await.unwrap();

    assert_eq!(items.iter().map(|i| i.id).collect::<Vec<_>>(), ids);
    assert_eq!(items[0].endpoint, Endpoint::Products);
    assert_eq!(items[1].payload["stage"], "Intake");
    assert_eq!(items[2].record_id(), "m-1");

    // reading does not consume
    assert_eq!(queue.count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_removed_items_stay_removed_after_restart() {
    let dir = TempDir::new().unwrap();

    {
        let queue = open_queue(&dir).await;
        let first = queue.enqueue(Endpoint::Logs, &json!({"id": "l-1"})).await.unwrap();
        queue.enqueue(Endpoint::Logs, &json!({"id": "l-2"})).await.unwrap();
        assert!(queue.remove(first).await.unwrap());
        queue.pool().close().await;
    }

    let queue = open_queue(&dir).await;
    let items = queue.drain_all().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].record_id(), "l-2");
}

#[tokio::test]
async fn test_failure_bookkeeping_and_dead_letters_survive_restart() {
    let dir = TempDir::new().unwrap();

    {
        let queue = open_queue(&dir).await;
        let doomed = queue.enqueue(Endpoint::Logs, &json!({"id": "l-bad"})).await.unwrap();
        let retried = queue.enqueue(Endpoint::Logs, &json!({"id": "l-retry"})).await.unwrap();

        queue.record_failure(doomed, "HTTP 500", None).await.unwrap();
        assert!(queue.dead_letter(doomed).await.unwrap());
        assert_eq!(queue.record_failure(retried, "timeout", None).await.unwrap(), 1);
        queue.pool().close().await;
    }

    let queue = open_queue(&dir).await;
    let items = queue.drain_all().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].attempts, 1);
    assert_eq!(items[0].last_error.as_deref(), Some("timeout"));

    let dead = queue.list_dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].item.record_id(), "l-bad");

    assert_eq!(queue.requeue_dead_letters().await.unwrap(), 1);
    let items = queue.drain_all().await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[1].record_id(), "l-bad");
    assert_eq!(items[1].attempts, 0);
}

#[tokio::test]
async fn test_product_snapshots_reload_after_restart() {
    let dir = TempDir::new().unwrap();

    let product_id = {
        let queue = open_queue(&dir).await;
        let snapshots = SqliteProductSnapshots::new(queue.pool().clone());
        let store = ProductStore::with_snapshots(snapshots).await.unwrap();

        let product = store
            .create_product(&SubscriptionTier::Free.limits())
            .await
            .unwrap()
            .value;
        store
            .append_log(
                &product.id,
                log_at(Stage::Intake, CUSCO, t0()),
                Vec::new(),
                None,
            )
            .await
            .unwrap();
        queue.pool().close().await;
        product.id
    };

    let queue = open_queue(&dir).await;
    let snapshots = SqliteProductSnapshots::new(queue.pool().clone());
    let store = Arc::new(ProductStore::with_snapshots(snapshots).await.unwrap());

    let product = store.get(&product_id).await.unwrap();
    assert_eq!(product.name, "Item #1");
    assert_eq!(product.logs.len(), 1);
    assert!(!product.synced);
    assert_eq!(store.unsynced_count().await, 1);
}
