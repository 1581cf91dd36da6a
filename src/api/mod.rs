//! HTTP API: record upserts, artisan registration and the fraud boundary

mod error;
mod rest;

pub use error::{validation_error, ApiError, ErrorCode, ErrorDetails, FraudBoundaryError};
pub use rest::{functions_router, router};
