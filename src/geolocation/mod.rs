//! Geolocation acquisition with a bounded wait
//!
//! [`GeolocationAcquirer::acquire`] never fails. It races one platform
//! request against a watchdog and resolves to a tagged fallback position on
//! any error, so capture flows degrade to unverified evidence instead of
//! blocking.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::domain::{
    GeoErrorCode, GeoLocation, PositionError, PositionFix, PositionRequest, FALLBACK_LATITUDE,
    FALLBACK_LONGITUDE,
};
use crate::infra::LocationProvider;

/// Configuration for the acquirer
#[derive(Debug, Clone, PartialEq)]
pub struct AcquirerConfig {
    /// Hard upper bound on `acquire`
    pub watchdog: Duration,
    /// Timeout handed to the platform; kept below the watchdog
    pub platform_timeout: Duration,
    pub fallback_latitude: f64,
    pub fallback_longitude: f64,
}

impl Default for AcquirerConfig {
    fn default() -> Self {
        Self {
            watchdog: Duration::from_millis(10_000),
            platform_timeout: Duration::from_millis(9_000),
            fallback_latitude: FALLBACK_LATITUDE,
            fallback_longitude: FALLBACK_LONGITUDE,
        }
    }
}

impl AcquirerConfig {
    /// Load configuration from `GPS_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let watchdog = std::env::var("GPS_WATCHDOG_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.watchdog);

        let platform_timeout = std::env::var("GPS_PLATFORM_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.platform_timeout);

        let fallback_latitude = std::env::var("GPS_FALLBACK_LAT")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(defaults.fallback_latitude);

        let fallback_longitude = std::env::var("GPS_FALLBACK_LNG")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(defaults.fallback_longitude);

        Self {
            watchdog,
            platform_timeout: platform_timeout.min(watchdog),
            fallback_latitude,
            fallback_longitude,
        }
    }

    fn fallback(&self, code: GeoErrorCode) -> GeoLocation {
        GeoLocation::fallback_at(self.fallback_latitude, self.fallback_longitude, code)
    }
}

/// Obtains a best-effort position fix for a capture
#[derive(Clone)]
pub struct GeolocationAcquirer {
    provider: Arc<dyn LocationProvider>,
    config: AcquirerConfig,
}

impl GeolocationAcquirer {
    pub fn new(provider: Arc<dyn LocationProvider>, config: AcquirerConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &AcquirerConfig {
        &self.config
    }

    /// Single attempt, bounded by the watchdog. Never fails.
    pub async fn acquire(&self) -> GeoLocation {
        if !self.provider.is_supported() {
            warn!(error_code = %GeoErrorCode::Unsupported, "Geolocation unsupported, using fallback");
            return self.config.fallback(GeoErrorCode::Unsupported);
        }

        let request = PositionRequest {
            timeout: self.config.platform_timeout,
            maximum_age: Duration::ZERO,
            high_accuracy: true,
        };

        // Dropping the platform future on expiry discards any late result
        match tokio::time::timeout(self.config.watchdog, self.provider.current_position(request))
            .await
        {
            Ok(Ok(fix)) => {
                debug!(
                    latitude = fix.latitude,
                    longitude = fix.longitude,
                    accuracy = ?fix.accuracy_meters,
                    "GPS fix acquired"
                );
                GeoLocation::fix(fix.latitude, fix.longitude, fix.accuracy_meters)
            }
            Ok(Err(e)) => {
                let code = e.code();
                error!(error = %e, error_code = %code, "GPS hardware error, using fallback");
                self.config.fallback(code)
            }
            Err(_) => {
                warn!(
                    error_code = %GeoErrorCode::WatchdogTimeout,
                    watchdog_ms = self.config.watchdog.as_millis() as u64,
                    "GPS watchdog fired, using fallback"
                );
                self.config.fallback(GeoErrorCode::WatchdogTimeout)
            }
        }
    }
}

/// Provider for platforms without location hardware
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedLocationProvider;

#[async_trait]
impl LocationProvider for UnsupportedLocationProvider {
    fn is_supported(&self) -> bool {
        false
    }

    async fn current_position(
        &self,
        _request: PositionRequest,
    ) -> Result<PositionFix, PositionError> {
        Err(PositionError::PositionUnavailable)
    }
}

/// Provider that reports a configured position (fixed workshops, kiosks)
#[derive(Debug, Clone, Copy)]
pub struct FixedLocationProvider {
    fix: PositionFix,
}

impl FixedLocationProvider {
    pub fn new(latitude: f64, longitude: f64, accuracy_meters: Option<f64>) -> Self {
        Self {
            fix: PositionFix {
                latitude,
                longitude,
                accuracy_meters,
            },
        }
    }
}

#[async_trait]
impl LocationProvider for FixedLocationProvider {
    fn is_supported(&self) -> bool {
        true
    }

    async fn current_position(
        &self,
        _request: PositionRequest,
    ) -> Result<PositionFix, PositionError> {
        Ok(self.fix)
    }
}
