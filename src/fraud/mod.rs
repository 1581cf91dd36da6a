//! Server-side fraud scoring
//!
//! [`FraudEngine`] is the pure, additive scorer over one log's GPS reading,
//! the artisan's home facility and their previous log. [`FraudService`] wires
//! it to the evidence store and records every verdict.

mod engine;
mod service;

pub use engine::{
    FraudEngine, FraudThresholds, HOME_DEVIATION_SCORE, IMPOSSIBLE_SPEED_SCORE,
    MOCK_LOCATION_REASON, MOCK_LOCATION_SCORE,
};
pub use service::FraudService;
