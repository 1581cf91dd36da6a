//! Geographic types and great-circle distance.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Mean Earth radius used for all distance calculations (km)
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Sentinel coordinates recorded when no sensor fix is available.
pub const FALLBACK_LATITUDE: f64 = -13.1631;
pub const FALLBACK_LONGITUDE: f64 = -72.5450;

/// Reason a location could not be read from the platform sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeoErrorCode {
    /// Platform has no location capability
    Unsupported,
    /// User or OS refused location access
    PermissionDenied,
    /// Sensor could not produce a fix
    PositionUnavailable,
    /// Platform request timed out on its own
    OsTimeout,
    /// Our watchdog fired before the platform answered
    WatchdogTimeout,
    Unknown,
}

impl GeoErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeoErrorCode::Unsupported => "UNSUPPORTED",
            GeoErrorCode::PermissionDenied => "PERMISSION_DENIED",
            GeoErrorCode::PositionUnavailable => "POSITION_UNAVAILABLE",
            GeoErrorCode::OsTimeout => "OS_TIMEOUT",
            GeoErrorCode::WatchdogTimeout => "WATCHDOG_TIMEOUT",
            GeoErrorCode::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for GeoErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A position attached to a provenance log.
///
/// When `is_manual_fallback` is set the coordinates are a sentinel, not a
/// sensor reading, and must never count as verified evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_meters: Option<f64>,
    #[serde(default)]
    pub is_manual_fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<GeoErrorCode>,
}

impl GeoLocation {
    /// A real sensor fix
    pub fn fix(latitude: f64, longitude: f64, accuracy_meters: Option<f64>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_meters,
            is_manual_fallback: false,
            error_code: None,
        }
    }

    /// A fallback position at the given sentinel coordinates
    pub fn fallback_at(latitude: f64, longitude: f64, code: GeoErrorCode) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_meters: Some(0.0),
            is_manual_fallback: true,
            error_code: Some(code),
        }
    }

    /// A fallback position at the default sentinel coordinates
    pub fn fallback(code: GeoErrorCode) -> Self {
        Self::fallback_at(FALLBACK_LATITUDE, FALLBACK_LONGITUDE, code)
    }

    /// True only for sensor readings
    pub fn is_verified(&self) -> bool {
        !self.is_manual_fallback
    }

    /// Great-circle distance to another location in kilometers
    pub fn distance_km(&self, other: &GeoLocation) -> f64 {
        haversine_km(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Options for a single platform location request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionRequest {
    /// Platform-side timeout, shorter than the acquirer's watchdog
    pub timeout: Duration,
    /// Oldest cached fix the platform may return (zero = fresh only)
    pub maximum_age: Duration,
    pub high_accuracy: bool,
}

/// Raw sensor reading returned by a platform provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: Option<f64>,
}

/// Platform location failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PositionError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable")]
    PositionUnavailable,
    #[error("platform location request timed out")]
    Timeout,
    #[error("location error: {0}")]
    Other(String),
}

impl PositionError {
    pub fn code(&self) -> GeoErrorCode {
        match self {
            PositionError::PermissionDenied => GeoErrorCode::PermissionDenied,
            PositionError::PositionUnavailable => GeoErrorCode::PositionUnavailable,
            PositionError::Timeout => GeoErrorCode::OsTimeout,
            PositionError::Other(_) => GeoErrorCode::Unknown,
        }
    }
}

/// Haversine great-circle distance between two lat/lng points (km).
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();

    let a = (d_lat / 2.0).sin() * (d_lat / 2.0).sin()
        + lat1.to_radians().cos()
            * lat2.to_radians().cos()
            * (d_lng / 2.0).sin()
            * (d_lng / 2.0).sin();

    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}
