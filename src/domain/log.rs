//! Provenance logs and intake materials.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::GeoLocation;

/// Production stage a log belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Intake,
    Creation,
    Finishing,
    Serialization,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Intake => "Intake",
            Stage::Creation => "Creation",
            Stage::Finishing => "Finishing",
            Stage::Serialization => "Serialization",
        }
    }

    /// Human readable label shown on passports
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Intake => "Material Intake",
            Stage::Creation => "Creation Log",
            Stage::Finishing => "Finishing",
            Stage::Serialization => "Serialization",
        }
    }

    /// Intake and Finishing anchor the material journey and need GPS evidence
    pub fn is_critical(&self) -> bool {
        matches!(self, Stage::Intake | Stage::Finishing)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "intake" | "material intake" => Ok(Stage::Intake),
            "creation" | "creation log" => Ok(Stage::Creation),
            "finishing" => Ok(Stage::Finishing),
            "serialization" => Ok(Stage::Serialization),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

/// One immutable, timestamped production event.
///
/// Capture fields never change after creation. The fraud fields are filled
/// in later from the server verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceLog {
    pub id: String,
    pub stage: Stage,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoLocation>,
    pub device_id: String,
    /// Artisan who captured the log
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fraud_score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_flagged: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_reason: Option<String>,
}

impl ProvenanceLog {
    /// Create a log stamped with the current time
    pub fn new(
        stage: Stage,
        description: impl Into<String>,
        location: Option<GeoLocation>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            stage,
            timestamp: Utc::now(),
            description: description.into(),
            photo_ref: None,
            location,
            device_id: device_id.into(),
            user_id: None,
            fraud_score: None,
            is_flagged: None,
            flag_reason: None,
        }
    }

    pub fn with_photo(mut self, photo_ref: impl Into<String>) -> Self {
        self.photo_ref = Some(photo_ref.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Whether the log carries a real (non-fallback) GPS fix
    pub fn has_verified_location(&self) -> bool {
        self.location.as_ref().is_some_and(GeoLocation::is_verified)
    }

    pub fn has_photo(&self) -> bool {
        self.photo_ref.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// Raw material registered at intake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    pub id: String,
    pub material_type: String,
    pub origin: String,
    pub supplier_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
}

impl Material {
    pub fn new(
        material_type: impl Into<String>,
        origin: impl Into<String>,
        supplier_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            material_type: material_type.into(),
            origin: origin.into(),
            supplier_id: supplier_id.into(),
            timestamp: Utc::now(),
            photo_ref: None,
            quantity: None,
            quality: None,
        }
    }

    pub fn with_quantity(mut self, quantity: impl Into<String>) -> Self {
        self.quantity = Some(quantity.into());
        self
    }

    pub fn with_photo(mut self, photo_ref: impl Into<String>) -> Self {
        self.photo_ref = Some(photo_ref.into());
        self
    }

    /// Description used for the intake log, e.g. "Intake: 5kg Wool from Andes, Peru."
    pub fn intake_description(&self) -> String {
        format!(
            "Intake: {} {} from {}.",
            self.quantity.as_deref().unwrap_or(""),
            self.material_type,
            self.origin
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GeoErrorCode;

    #[test]
    fn test_stage_parse() {
        assert_eq!("intake".parse::<Stage>().unwrap(), Stage::Intake);
        assert_eq!("Material Intake".parse::<Stage>().unwrap(), Stage::Intake);
        assert_eq!("FINISHING".parse::<Stage>().unwrap(), Stage::Finishing);
        assert!("packing".parse::<Stage>().is_err());
    }

    #[test]
    fn test_verified_location() {
        let log = ProvenanceLog::new(Stage::Intake, "wool", None, "dev-1");
        assert!(!log.has_verified_location());

        let log = ProvenanceLog::new(
            Stage::Intake,
            "wool",
            Some(GeoLocation::fallback(GeoErrorCode::PermissionDenied)),
            "dev-1",
        );
        assert!(!log.has_verified_location());

        let log = ProvenanceLog::new(
            Stage::Intake,
            "wool",
            Some(GeoLocation::fix(-13.5, -71.9, Some(8.0))),
            "dev-1",
        );
        assert!(log.has_verified_location());
    }

    #[test]
    fn test_log_json_shape() {
        let log = ProvenanceLog::new(Stage::Creation, "Weaving. Duration: 4h 30m.", None, "dev-1")
            .with_photo("photos/abc.jpg");
        let json = serde_json::to_value(&log).unwrap();

        assert_eq!(json["stage"], "Creation");
        assert_eq!(json["photoRef"], "photos/abc.jpg");
        assert_eq!(json["deviceId"], "dev-1");
        assert!(json.get("fraudScore").is_none());
    }

    #[test]
    fn test_intake_description() {
        let material = Material::new("Wool", "Andes, Peru", "SUPPLIER_LOCAL").with_quantity("5kg");
        assert_eq!(material.intake_description(), "Intake: 5kg Wool from Andes, Peru.");
    }
}
