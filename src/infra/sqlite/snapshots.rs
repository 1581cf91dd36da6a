//! Local persistence of product aggregates

use chrono::Utc;
use sqlx::sqlite::SqlitePool;

use crate::domain::Product;
use crate::infra::Result;

/// Stores one JSON snapshot per product, overwritten on every mutation
#[derive(Clone)]
pub struct SqliteProductSnapshots {
    pool: SqlitePool,
}

impl SqliteProductSnapshots {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, product: &Product) -> Result<()> {
        let body = serde_json::to_string(product)?;
        let now = Utc::now().timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO product_snapshots (id, body, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
            "#,
        )
        .bind(&product.id)
        .bind(&body)
        .bind(product.created_at.timestamp_millis())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All products, oldest first
    pub async fn load_all(&self) -> Result<Vec<Product>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT body FROM product_snapshots ORDER BY created_at ASC, id ASC")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(body,)| serde_json::from_str(&body).map_err(Into::into))
            .collect()
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM product_snapshots WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
