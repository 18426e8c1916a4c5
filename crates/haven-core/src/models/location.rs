//! Location model
//!
//! A resolved location always exists: a live fix when the device
//! answers in time, otherwise the last persisted fix, otherwise a
//! hardcoded default. An emergency alert is never blocked on GPS.

use serde::{Deserialize, Serialize};

/// Center of the service region, used when no fix was ever obtained.
const DEFAULT_LATITUDE: f64 = 23.8103;
const DEFAULT_LONGITUDE: f64 = 90.4125;

/// Geographic coordinates as submitted to the alert endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    /// Reported accuracy in meters, when the provider gives one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl Coordinates {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
        }
    }

    #[must_use]
    pub const fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }
}

/// Where a resolved fix came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    /// Fresh fix obtained within the timeout
    Live,
    /// Last persisted live fix, replayed because no fresh one arrived
    Fallback,
    /// Hardcoded constant, never persisted
    Default,
}

impl LocationSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Fallback => "fallback",
            Self::Default => "default",
        }
    }
}

/// A resolved location fix with its provenance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub coordinates: Coordinates,
    pub source: LocationSource,
}

impl LocationFix {
    #[must_use]
    pub const fn live(coordinates: Coordinates) -> Self {
        Self {
            coordinates,
            source: LocationSource::Live,
        }
    }

    #[must_use]
    pub const fn fallback(coordinates: Coordinates) -> Self {
        Self {
            coordinates,
            source: LocationSource::Fallback,
        }
    }

    /// The hardcoded default fix for devices with no location history.
    #[must_use]
    pub const fn default_fix() -> Self {
        Self {
            coordinates: Coordinates::new(DEFAULT_LATITUDE, DEFAULT_LONGITUDE),
            source: LocationSource::Default,
        }
    }

    /// Whether the fix is degraded (anything other than a live fix).
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        !matches!(self.source, LocationSource::Live)
    }
}
