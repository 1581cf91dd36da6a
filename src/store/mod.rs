//! In-memory sources of truth for the field device
//!
//! - [`ProductStore`] owns product aggregates
//! - [`PlanStore`] owns the subscription tier

mod plan;
mod products;

pub use plan::PlanStore;
pub use products::{ProductStore, StorageWarning, StoreEvent, Stored};
