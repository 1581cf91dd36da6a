//! Product aggregate and derived risk score.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{Material, ProvenanceLog, Stage};

/// Lifecycle status of a product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductStatus {
    Draft,
    Completed,
}

impl fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductStatus::Draft => write!(f, "Draft"),
            ProductStatus::Completed => write!(f, "Completed"),
        }
    }
}

/// Digital Product Passport summary attached on completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DppData {
    /// Unique item identifier
    pub uid: String,
    /// kg CO2e
    pub carbon_footprint_estimate: f64,
    pub recyclability: String,
    pub compliance_standard: String,
}

/// Aggregate root: a product with its ordered logs and materials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub status: ProductStatus,
    /// Capture order; not guaranteed to be monotonic in time
    pub logs: Vec<ProvenanceLog>,
    pub materials: Vec<Material>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpp: Option<DppData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    pub synced: bool,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            status: ProductStatus::Draft,
            logs: Vec::new(),
            materials: Vec::new(),
            dpp: None,
            thumbnail: None,
            synced: false,
            created_at: Utc::now(),
        }
    }

    /// First log captured for a stage
    pub fn first_log(&self, stage: Stage) -> Option<&ProvenanceLog> {
        self.logs.iter().find(|l| l.stage == stage)
    }

    pub fn has_stage(&self, stage: Stage) -> bool {
        self.first_log(stage).is_some()
    }

    pub fn is_completed(&self) -> bool {
        self.status == ProductStatus::Completed
    }

    /// Next stage the capture workflow should offer
    pub fn next_stage(&self) -> Option<Stage> {
        if self.is_completed() {
            return None;
        }
        [Stage::Intake, Stage::Creation, Stage::Finishing]
            .into_iter()
            .find(|s| !self.has_stage(*s))
    }
}

/// Factors behind a client-side integrity score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskFactors {
    pub gps_verified: bool,
    pub photo_verified: bool,
    pub chronology_valid: bool,
}

impl Default for RiskFactors {
    fn default() -> Self {
        Self {
            gps_verified: true,
            photo_verified: true,
            chronology_valid: true,
        }
    }
}

/// Derived, non-authoritative integrity score for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskScore {
    pub product_id: String,
    /// 0..=100
    pub score: u8,
    pub factors: RiskFactors,
}
