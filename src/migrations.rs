//! Database migrations.
//!
//! Uses SQLx embedded migrations for both the server (records, evidence) and
//! the field device (offline queue, product snapshots).

use sqlx::SqlitePool;

use crate::infra::Result;

static LOCAL_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/local");
static SERVER_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/server");

pub async fn run_local(pool: &SqlitePool) -> Result<()> {
    LOCAL_MIGRATOR.run(pool).await?;
    Ok(())
}

pub async fn run_server(pool: &SqlitePool) -> Result<()> {
    SERVER_MIGRATOR.run(pool).await?;
    Ok(())
}
