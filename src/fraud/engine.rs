//! Additive fraud scoring over a log's GPS evidence.

use chrono::{DateTime, Utc};

use crate::domain::{haversine_km, FraudVerdict, GpsReading, HomeFacility, PriorLog};

pub const MOCK_LOCATION_SCORE: u32 = 100;
pub const HOME_DEVIATION_SCORE: u32 = 40;
pub const IMPOSSIBLE_SPEED_SCORE: u32 = 50;

pub const MOCK_LOCATION_REASON: &str = "GPS Mock/Manual Entry Detected";

/// Tunable thresholds for [`FraudEngine`]
#[derive(Debug, Clone, PartialEq)]
pub struct FraudThresholds {
    /// Allowed distance from the registered home facility
    pub home_radius_km: f64,
    /// Travel speed above which a log is treated as teleportation
    pub max_speed_kmh: f64,
    /// Total score at which a log is flagged
    pub flag_threshold: u32,
    /// Prior logs closer in time than this are skipped for the speed check
    pub min_hours_delta: f64,
}

impl Default for FraudThresholds {
    fn default() -> Self {
        Self {
            home_radius_km: 2.0,
            max_speed_kmh: 100.0,
            flag_threshold: 80,
            min_hours_delta: 0.01,
        }
    }
}

impl FraudThresholds {
    /// Load thresholds from `FRAUD_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            home_radius_km: std::env::var("FRAUD_HOME_RADIUS_KM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.home_radius_km),
            max_speed_kmh: std::env::var("FRAUD_MAX_SPEED_KMH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_speed_kmh),
            flag_threshold: std::env::var("FRAUD_FLAG_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.flag_threshold),
            min_hours_delta: std::env::var("FRAUD_MIN_HOURS_DELTA")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| *v > 0.0)
                .unwrap_or(defaults.min_hours_delta),
        }
    }
}

/// Stateless scorer. The same inputs always give the same verdict.
#[derive(Debug, Clone, Default)]
pub struct FraudEngine {
    thresholds: FraudThresholds,
}

impl FraudEngine {
    pub fn new(thresholds: FraudThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &FraudThresholds {
        &self.thresholds
    }

    pub fn score(
        &self,
        gps: &GpsReading,
        timestamp: DateTime<Utc>,
        home: Option<HomeFacility>,
        prior: Option<&PriorLog>,
    ) -> FraudVerdict {
        let mut fraud_score = 0u32;
        let mut reasons = Vec::new();

        if gps.is_untrusted() {
            fraud_score += MOCK_LOCATION_SCORE;
            reasons.push(MOCK_LOCATION_REASON.to_string());
        }

        if let Some(home) = home {
            let distance = haversine_km(gps.lat, gps.lng, home.home_lat, home.home_lng);
            if distance > self.thresholds.home_radius_km {
                fraud_score += HOME_DEVIATION_SCORE;
                reasons.push(format!(
                    "Location Deviation (>{}km from Home: {:.2}km)",
                    self.thresholds.home_radius_km, distance
                ));
            }
        }

        if let Some(prior) = prior {
            let hours_delta =
                (timestamp - prior.timestamp).num_milliseconds() as f64 / 3_600_000.0;
            if hours_delta >= self.thresholds.min_hours_delta {
                let distance = haversine_km(gps.lat, gps.lng, prior.lat, prior.lng);
                let speed = distance / hours_delta;
                if speed > self.thresholds.max_speed_kmh {
                    fraud_score += IMPOSSIBLE_SPEED_SCORE;
                    reasons.push(format!("Impossible Travel Speed ({speed:.0} km/h)"));
                }
            }
        }

        FraudVerdict {
            fraud_score,
            is_flagged: fraud_score >= self.thresholds.flag_threshold,
            reasons,
        }
    }
}
