//! Domain models for provenance capture
//!
//! Core types for logs, products, queued writes and fraud verdicts.

mod fraud;
mod geo;
mod log;
mod plan;
mod product;
mod queue;

pub use fraud::*;
pub use geo::*;
pub use log::*;
pub use plan::*;
pub use product::*;
pub use queue::*;
