//! Error types for provenance capture infrastructure

use thiserror::Error;

/// SQLite primary result code for "database or disk is full"
const SQLITE_FULL: &str = "13";

/// ENOSPC on Linux/macOS
const ENOSPC: i32 = 28;

/// Errors that can occur in the capture, sync and fraud pipelines
#[derive(Error, Debug)]
pub enum ProvenanceError {
    /// Database error
    #[error("database error: {0}")]
    Database(sqlx::Error),

    /// Local persistence is full; queued data may not persist
    #[error("local storage exhausted: {0}")]
    StorageExhausted(String),

    /// Payload could not be represented as pure data
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote store rejected or could not be reached
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// Migration error
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Product not found
    #[error("product not found: {0}")]
    ProductNotFound(String),

    /// Invalid state transition
    #[error("invalid state transition for product {product_id}: {from} -> {to}")]
    InvalidStateTransition {
        product_id: String,
        from: String,
        to: String,
    },

    /// Plan product limit reached
    #[error("plan limit reached: {tier} allows {limit} products")]
    PlanLimitReached { tier: String, limit: usize },

    /// Fraud evaluation request without usable GPS data
    #[error("Missing record or GPS data")]
    MissingGps,

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProvenanceError {
    pub fn is_storage_exhausted(&self) -> bool {
        matches!(self, ProvenanceError::StorageExhausted(_))
    }
}

impl From<sqlx::Error> for ProvenanceError {
    fn from(err: sqlx::Error) -> Self {
        let exhausted = match &err {
            sqlx::Error::Database(db) => db.code().as_deref() == Some(SQLITE_FULL),
            sqlx::Error::Io(io) => io.raw_os_error() == Some(ENOSPC),
            _ => false,
        };
        if exhausted {
            ProvenanceError::StorageExhausted(err.to_string())
        } else {
            ProvenanceError::Database(err)
        }
    }
}

impl From<reqwest::Error> for ProvenanceError {
    fn from(err: reqwest::Error) -> Self {
        ProvenanceError::Delivery(err.to_string())
    }
}

/// Result type for provenance operations
pub type Result<T> = std::result::Result<T, ProvenanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enospc_is_storage_exhausted() {
        let io = std::io::Error::from_raw_os_error(ENOSPC);
        let err = ProvenanceError::from(sqlx::Error::Io(io));
        assert!(err.is_storage_exhausted());
    }

    #[test]
    fn test_other_errors_stay_database() {
        let err = ProvenanceError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, ProvenanceError::Database(_)));
        assert!(!err.is_storage_exhausted());
    }

    #[test]
    fn test_missing_gps_message() {
        assert_eq!(
            ProvenanceError::MissingGps.to_string(),
            "Missing record or GPS data"
        );
    }
}
