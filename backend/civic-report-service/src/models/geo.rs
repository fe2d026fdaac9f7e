use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;

/// A validated WGS84 position in decimal degrees.
///
/// Fields are private so a `Coordinate` can only exist with finite,
/// in-range values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct RawCoordinate {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = LifecycleError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Coordinate::new(raw.latitude, raw.longitude)
    }
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, LifecycleError> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(LifecycleError::InvalidCoordinate(format!(
                "({}, {}) is not a finite position",
                latitude, longitude
            )));
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(LifecycleError::InvalidCoordinate(format!(
                "latitude {} out of range",
                latitude
            )));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(LifecycleError::InvalidCoordinate(format!(
                "longitude {} out of range",
                longitude
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Build from an optional latitude/longitude pair as submitted by clients.
    ///
    /// Both halves absent means "no location"; only one half present is invalid.
    pub fn from_parts(
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> Result<Option<Self>, LifecycleError> {
        match (latitude, longitude) {
            (Some(lat), Some(lon)) => Coordinate::new(lat, lon).map(Some),
            (None, None) => Ok(None),
            _ => Err(LifecycleError::InvalidCoordinate(
                "latitude and longitude must be supplied together".to_string(),
            )),
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}
