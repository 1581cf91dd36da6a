//! Subscription tiers and their limits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "FREE",
            SubscriptionTier::Pro => "PRO",
            SubscriptionTier::Enterprise => "ENTERPRISE",
        }
    }

    pub fn limits(&self) -> PlanLimits {
        use FeatureKey::*;
        match self {
            SubscriptionTier::Free => PlanLimits {
                tier: *self,
                product_limit: 3,
                features: &[],
            },
            SubscriptionTier::Pro => PlanLimits {
                tier: *self,
                product_limit: 100,
                features: &[ExportCompliance, CustomBranding, BulkUpload],
            },
            SubscriptionTier::Enterprise => PlanLimits {
                tier: *self,
                product_limit: 10_000,
                features: &[ExportCompliance, CustomBranding, BulkUpload, ApiAccess],
            },
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FREE" => Ok(SubscriptionTier::Free),
            "PRO" => Ok(SubscriptionTier::Pro),
            "ENTERPRISE" => Ok(SubscriptionTier::Enterprise),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// Gated premium features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKey {
    ExportCompliance,
    CustomBranding,
    BulkUpload,
    ApiAccess,
}

impl FeatureKey {
    pub const ALL: [FeatureKey; 4] = [
        FeatureKey::ExportCompliance,
        FeatureKey::CustomBranding,
        FeatureKey::BulkUpload,
        FeatureKey::ApiAccess,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKey::ExportCompliance => "export_compliance",
            FeatureKey::CustomBranding => "custom_branding",
            FeatureKey::BulkUpload => "bulk_upload",
            FeatureKey::ApiAccess => "api_access",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub tier: SubscriptionTier,
    /// Maximum number of products (passport codes)
    pub product_limit: usize,
    pub features: &'static [FeatureKey],
}

impl PlanLimits {
    pub fn allows(&self, feature: FeatureKey) -> bool {
        self.features.contains(&feature)
    }

    pub fn has_capacity(&self, current_count: usize) -> bool {
        current_count < self.product_limit
    }
}

/// Result of an external checkout flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutOutcome {
    Completed { tier: SubscriptionTier },
    Failed { reason: String },
}
