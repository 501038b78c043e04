//! # Distance
//!
//! Great-circle distance on a spherical Earth. Every coordinate pair entering the
//! system goes through [`Coordinates::new`], so [`haversine_km`] itself never
//! validates and simply computes whatever it is given.
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// A validated WGS84 point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinates")]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Deserialize)]
struct RawCoordinates {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<RawCoordinates> for Coordinates {
    type Error = TrackerError;

    fn try_from(raw: RawCoordinates) -> Result<Self, Self::Error> {
        Coordinates::new(raw.latitude, raw.longitude)
    }
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, TrackerError> {
        if is_valid(latitude, longitude) {
            Ok(Self {
                latitude,
                longitude,
            })
        } else {
            Err(TrackerError::InvalidCoordinates {
                latitude,
                longitude,
            })
        }
    }

    pub fn distance_km(&self, other: &Coordinates) -> f64 {
        haversine_km(
            self.latitude,
            self.longitude,
            other.latitude,
            other.longitude,
        )
    }

    /// Label shown when no address could be resolved for this point.
    pub fn raw_label(&self) -> String {
        format!("{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

pub fn is_valid(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}
