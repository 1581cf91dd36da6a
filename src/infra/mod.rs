//! Infrastructure layer for provenance capture
//!
//! Contains trait definitions and implementations for:
//! - Durable offline queue and local snapshots (SQLite)
//! - Server record and fraud evidence storage (SQLite)
//! - HTTP clients for record delivery and fraud evaluation
//! - Retry policy for queued deliveries
//! - Shutdown signalling

mod error;
mod http;
mod retry;
mod shutdown;
pub mod sqlite;
mod traits;

pub use error::*;
pub use http::{HttpFraudClient, HttpRemoteStore};
pub use retry::{Retry, RetryPolicy, RetryResult};
pub use shutdown::{os_shutdown_signal, ShutdownCoordinator, ShutdownSignal};
pub use sqlite::{
    DeadLetter, PendingVerdict, SqliteEvidenceStore, SqliteProductSnapshots, SqliteQueue,
    SqliteRecordStore, SqliteSettings, StoredVerdict, TIER_SETTING,
};
pub use traits::*;
