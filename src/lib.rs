//! Provenance Capture Library
//!
//! Offline-first capture of production logs with durable sync, and
//! GPS/timestamp fraud scoring on the server.
//!
//! ## Modules
//!
//! - [`domain`] - Core domain types (logs, products, queue items, verdicts)
//! - [`infra`] - Infrastructure implementations (SQLite, HTTP clients, retry)
//! - [`geolocation`] - Position acquisition with a watchdog and fallback
//! - [`store`] - Product aggregate store and subscription plan store
//! - [`capture`] - Capture flows: products, logs, materials
//! - [`sync`] - Connectivity signal, sync coordinator and trigger worker
//! - [`integrity`] - Client-side integrity scoring
//! - [`fraud`] - Server-side fraud scoring engine and evaluation service
//! - [`metrics`] - In-process counters, gauges and histograms
//! - [`telemetry`] - Logging initialisation
//! - [`api`] - REST API routes

pub mod api;
pub mod capture;
pub mod domain;
pub mod fraud;
pub mod geolocation;
pub mod infra;
pub mod integrity;
pub mod metrics;
pub mod migrations;
pub mod server;
pub mod store;
pub mod sync;
pub mod telemetry;

// Re-export commonly used types
pub use domain::{
    Endpoint, FraudRecord, FraudVerdict, GeoLocation, ProvenanceLog, Product, QueueItem, Stage,
};

pub use infra::{
    FraudEvaluator, LocationProvider, ProvenanceError, RemoteStore, Result, RetryPolicy,
    SqliteQueue,
};
