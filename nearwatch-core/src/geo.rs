//! Great-circle distance and the degree-delta bounding box used to prefilter
//! alert candidates before the exact distance check.

use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Approximate kilometres per degree of latitude. Also the equatorial
/// kilometres per degree of longitude, scaled by `cos(lat)` elsewhere.
pub const KM_PER_DEGREE: f64 = 111.0;

pub const KM_PER_MILE: f64 = 1.60934;

/// Longitude scale never drops below this, so the box stays finite at the poles.
const MIN_LONGITUDE_SCALE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

pub fn miles_to_km(miles: f64) -> f64 {
    miles * KM_PER_MILE
}

/// Haversine distance in kilometres.
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Kilometres per degree of longitude at the given latitude.
pub fn longitude_km_per_degree(latitude: f64) -> f64 {
    (KM_PER_DEGREE * latitude.to_radians().cos()).max(MIN_LONGITUDE_SCALE)
}

/// Degree deltas `(lat, lon)` covering `radius_km` around a point at `latitude`.
pub fn degree_deltas(radius_km: f64, latitude: f64) -> (f64, f64) {
    (
        radius_km / KM_PER_DEGREE,
        radius_km / longitude_km_per_degree(latitude),
    )
}

/// Coarse test: does `point` fall inside the degree box of a circle of
/// `radius_km` around `center`? The longitude scale is taken at the point's
/// latitude, which is what the store-side prefilter can bind as a constant.
/// Degrades near the poles and across the antimeridian.
pub fn in_degree_box(center: Coordinates, radius_km: f64, point: Coordinates) -> bool {
    let (lat_delta, lon_delta) = degree_deltas(radius_km, point.latitude);
    (point.latitude - center.latitude).abs() <= lat_delta
        && (point.longitude - center.longitude).abs() <= lon_delta
}
