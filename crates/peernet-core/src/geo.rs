//! GPS locations and great-circle math
//!
//! Locations are decimal degrees. The wire protocols carry micro-degree
//! integers, so every location that can appear in a query result is
//! quantized to 1e-6 degrees at creation time; predictions and live results
//! then encode byte-identically.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{SimError, SimResult};

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Wire sentinel for "no location" in micro-degree fields.
pub const NO_LOCATION_MICRO: i32 = i32::MAX;

/// A GPS coordinate in decimal degrees.
///
/// Latitude is in [-90, 90]; longitude is in (-180, 180].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsLocation {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
}

impl GpsLocation {
    /// Create a validated location.
    pub fn new(latitude: f64, longitude: f64) -> SimResult<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(SimError::invalid(format!(
                "latitude {latitude} out of range [-90, 90]"
            )));
        }
        if !longitude.is_finite() || longitude <= -180.0 || longitude > 180.0 {
            return Err(SimError::invalid(format!(
                "longitude {longitude} out of range (-180, 180]"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Build from wire micro-degrees.
    pub fn from_micro(latitude: i32, longitude: i32) -> Self {
        Self {
            latitude: f64::from(latitude) / 1e6,
            longitude: f64::from(longitude) / 1e6,
        }
    }

    /// Latitude as wire micro-degrees.
    pub fn latitude_micro(&self) -> i32 {
        (self.latitude * 1e6).round() as i32
    }

    /// Longitude as wire micro-degrees.
    pub fn longitude_micro(&self) -> i32 {
        (self.longitude * 1e6).round() as i32
    }

    /// Round to micro-degree precision so that domain state and wire
    /// encodings agree exactly.
    pub fn quantized(&self) -> Self {
        Self::from_micro(self.latitude_micro(), self.longitude_micro())
    }

    /// Great-circle distance to `other` in metres (haversine).
    pub fn distance_to(&self, other: &GpsLocation) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }

    /// Destination point reached by travelling `distance_m` metres along the
    /// initial bearing `bearing_deg` (degrees clockwise from north).
    pub fn destination(&self, bearing_deg: f64, distance_m: f64) -> Self {
        let delta = distance_m / EARTH_RADIUS_M;
        let theta = bearing_deg.to_radians();
        let lat1 = self.latitude.to_radians();
        let lon1 = self.longitude.to_radians();

        let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
        let lon2 = lon1
            + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());

        Self {
            latitude: lat2.to_degrees().clamp(-90.0, 90.0),
            longitude: normalize_longitude(lon2.to_degrees()),
        }
    }

    /// Uniformly random point in the disc of `radius_m` metres around self,
    /// quantized to micro-degrees.
    pub fn random_in_disc<R: Rng + ?Sized>(&self, radius_m: f64, rng: &mut R) -> Self {
        if radius_m <= 0.0 {
            return self.quantized();
        }
        let bearing = rng.gen_range(0.0..360.0);
        let distance = rng.gen_range(0.0..=radius_m);
        self.destination(bearing, distance).quantized()
    }
}

impl fmt::Display for GpsLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.6}, {:.6}]", self.latitude, self.longitude)
    }
}

/// Wrap a longitude in degrees into (-180, 180].
pub fn normalize_longitude(longitude: f64) -> f64 {
    let wrapped = (longitude + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 {
        180.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(GpsLocation::new(90.1, 0.0).is_err());
        assert!(GpsLocation::new(-90.1, 0.0).is_err());
        assert!(GpsLocation::new(0.0, -180.0).is_err());
        assert!(GpsLocation::new(0.0, 180.1).is_err());
        assert!(GpsLocation::new(0.0, 180.0).is_ok());
        assert!(GpsLocation::new(-90.0, -179.999).is_ok());
    }

    #[test]
    fn distance_between_known_points() {
        // Paris to London is roughly 344 km.
        let paris = GpsLocation::new(48.8566, 2.3522).unwrap();
        let london = GpsLocation::new(51.5074, -0.1278).unwrap();
        let d = paris.distance_to(&london);
        assert!((d - 343_900.0).abs() < 2_000.0, "distance was {d}");
    }

    #[test]
    fn distance_is_symmetric_and_zero_on_self() {
        let a = GpsLocation::new(10.0, 20.0).unwrap();
        let b = GpsLocation::new(-33.9, 151.2).unwrap();
        assert!((a.distance_to(&b) - b.distance_to(&a)).abs() < 1e-6);
        assert!(a.distance_to(&a) < 1e-9);
    }

    #[test]
    fn destination_travels_expected_distance() {
        let start = GpsLocation::new(10.0, 20.0).unwrap();
        for bearing in [0.0, 45.0, 123.4, 270.0] {
            let end = start.destination(bearing, 50_000.0);
            let d = start.distance_to(&end);
            assert!((d - 50_000.0).abs() < 1.0, "bearing {bearing}: {d}");
        }
    }

    #[test]
    fn disc_samples_stay_within_radius() {
        let center = GpsLocation::new(10.0, 20.0).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(7);
        for _ in 0..500 {
            let p = center.random_in_disc(50_000.0, &mut rng);
            // Quantization moves a point by less than a metre.
            assert!(center.distance_to(&p) <= 50_001.0);
        }
    }

    #[test]
    fn disc_sampling_is_deterministic_given_seed() {
        let center = GpsLocation::new(10.0, 20.0).unwrap();
        let mut a = ChaCha12Rng::seed_from_u64(42);
        let mut b = ChaCha12Rng::seed_from_u64(42);
        for _ in 0..100 {
            assert_eq!(
                center.random_in_disc(30_000.0, &mut a),
                center.random_in_disc(30_000.0, &mut b)
            );
        }
    }

    #[test]
    fn longitude_normalization_wraps_into_half_open_range() {
        assert_eq!(normalize_longitude(190.0), -170.0);
        assert_eq!(normalize_longitude(-190.0), 170.0);
        assert_eq!(normalize_longitude(540.0), 180.0);
        assert_eq!(normalize_longitude(-180.0), 180.0);
        assert_eq!(normalize_longitude(0.0), 0.0);
    }

    #[test]
    fn micro_degree_roundtrip() {
        let loc = GpsLocation::new(12.3456789, -98.7654321).unwrap();
        let q = loc.quantized();
        assert_eq!(q.latitude_micro(), 12_345_679);
        assert_eq!(q.longitude_micro(), -98_765_432);
        assert_eq!(q, GpsLocation::from_micro(12_345_679, -98_765_432));
    }
}
