//! Great-circle distance and geofence checks

use crate::error::{LifecycleError, Result};
use crate::models::Coordinate;

/// Mean Earth radius used for every proximity check
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Haversine distance between two coordinates, in metres.
pub fn distance_meters(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.latitude().to_radians();
    let lat2 = b.latitude().to_radians();
    let d_lat = (b.latitude() - a.latitude()).to_radians();
    let d_lon = (b.longitude() - a.longitude()).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.min(1.0).sqrt().atan2((1.0 - h).max(0.0).sqrt());

    EARTH_RADIUS_METERS * c
}

/// A circular fence around a report's coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geofence {
    radius_meters: f64,
}

impl Geofence {
    pub fn new(radius_meters: f64) -> Self {
        Self { radius_meters }
    }

    pub fn radius_meters(&self) -> f64 {
        self.radius_meters
    }

    /// Check that `position` lies within the fence centred on `center`.
    ///
    /// The distance is rounded to the millimetre before the inclusive
    /// comparison. Returns the rounded distance on success.
    pub fn check(&self, center: &Coordinate, position: &Coordinate) -> Result<f64> {
        let distance = (distance_meters(center, position) * 1000.0).round() / 1000.0;
        if distance <= self.radius_meters {
            Ok(distance)
        } else {
            Err(LifecycleError::GeofenceViolation {
                distance_meters: distance,
                limit_meters: self.radius_meters,
            })
        }
    }
}
