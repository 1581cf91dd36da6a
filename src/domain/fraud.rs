//! Fraud evaluation wire types and verdicts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{GeoLocation, ProvenanceLog};

/// GPS block of a fraud evaluation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsReading {
    pub lat: f64,
    pub lng: f64,
    #[serde(rename = "isManual", default)]
    pub is_manual: bool,
    /// Device reports a mock-location provider
    #[serde(default)]
    pub is_mocked: bool,
}

impl GpsReading {
    pub fn from_location(location: &GeoLocation) -> Self {
        Self {
            lat: location.latitude,
            lng: location.longitude,
            is_manual: location.is_manual_fallback,
            is_mocked: false,
        }
    }

    /// Mock provider or manual entry
    pub fn is_untrusted(&self) -> bool {
        self.is_manual || self.is_mocked
    }
}

/// The log record as seen by the fraud boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Evaluation time is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps: Option<GpsReading>,
}

impl FraudRecord {
    /// Build the evaluation record for a captured log; `user_id` overrides
    /// the artisan stamped on the log
    pub fn from_log(log: &ProvenanceLog, user_id: Option<&str>) -> Self {
        Self {
            id: log.id.clone(),
            user_id: user_id
                .map(str::to_string)
                .or_else(|| log.user_id.clone()),
            timestamp: Some(log.timestamp),
            gps: log.location.as_ref().map(GpsReading::from_location),
        }
    }
}

/// `{ "record": { ... } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudRequest {
    pub record: Option<FraudRecord>,
}

/// Successful evaluation response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudResponse {
    pub success: bool,
    pub fraud_score: u32,
    pub is_flagged: bool,
    pub reasons: Vec<String>,
}

impl From<FraudVerdict> for FraudResponse {
    fn from(verdict: FraudVerdict) -> Self {
        Self {
            success: true,
            fraud_score: verdict.fraud_score,
            is_flagged: verdict.is_flagged,
            reasons: verdict.reasons,
        }
    }
}

/// Authoritative per-log verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudVerdict {
    /// Additive, unclamped
    pub fraud_score: u32,
    pub is_flagged: bool,
    pub reasons: Vec<String>,
}

impl FraudVerdict {
    /// Reasons joined for storage on the log record
    pub fn flag_reason(&self) -> Option<String> {
        if self.reasons.is_empty() {
            None
        } else {
            Some(self.reasons.join(", "))
        }
    }
}

impl From<FraudResponse> for FraudVerdict {
    fn from(response: FraudResponse) -> Self {
        Self {
            fraud_score: response.fraud_score,
            is_flagged: response.is_flagged,
            reasons: response.reasons,
        }
    }
}

/// An artisan's registered workshop location
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HomeFacility {
    pub home_lat: f64,
    pub home_lng: f64,
}

/// The artisan's most recent other log, used for the travel speed check
#[derive(Debug, Clone, PartialEq)]
pub struct PriorLog {
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lng: f64,
}
