//! Offline queue reconciliation
//!
//! - [`SyncCoordinator`] drains the durable queue (`Idle -> Draining -> Idle`)
//! - [`ConnectivitySignal`] is the online/offline flag driving it
//! - [`SyncWorker`] turns connectivity transitions into drains

mod connectivity;
mod coordinator;
mod worker;

pub use connectivity::ConnectivitySignal;
pub use coordinator::{SyncCoordinator, SyncPhase, SyncReport, SyncStatus};
pub use worker::{SyncWorker, SyncWorkerConfig};
