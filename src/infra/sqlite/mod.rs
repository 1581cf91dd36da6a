//! SQLite implementations
//!
//! Field device: the durable offline queue, product snapshots and settings.
//! Server: received records and fraud evidence.

mod evidence;
mod queue;
mod records;
mod settings;
mod snapshots;

pub use evidence::*;
pub use queue::*;
pub use records::*;
pub use settings::*;
pub use snapshots::*;

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

use crate::infra::Result;

/// Open a pool from a `sqlite:` URL or `:memory:`.
///
/// In-memory databases are pinned to a single connection that never expires,
/// otherwise each new connection would see an empty database.
pub async fn open_pool(url: &str, max_connections: u32) -> Result<SqlitePool> {
    if url == ":memory:" || url.contains("mode=memory") {
        let options = SqliteConnectOptions::from_str(url)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        return Ok(pool);
    }

    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Open (creating if needed) an on-disk database file.
pub async fn open_file(path: impl AsRef<Path>) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Fresh in-memory database with the field-device schema
pub async fn open_local_in_memory() -> Result<SqlitePool> {
    let pool = open_pool(":memory:", 1).await?;
    crate::migrations::run_local(&pool).await?;
    Ok(pool)
}

/// Fresh in-memory database with the server schema
pub async fn open_server_in_memory() -> Result<SqlitePool> {
    let pool = open_pool(":memory:", 1).await?;
    crate::migrations::run_server(&pool).await?;
    Ok(pool)
}
