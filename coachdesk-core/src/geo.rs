//! Geographic helpers for address proximity search.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance to another point in kilometres.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine_km(*self, *other)
    }
}

/// A circle used to restrict a search to nearby records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct GeoRadius {
    pub center: GeoPoint,
    pub radius_km: f64,
}

impl GeoRadius {
    pub fn new(center: GeoPoint, radius_km: f64) -> Self {
        Self { center, radius_km }
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        self.center.distance_km(point) <= self.radius_km
    }
}

/// Haversine great-circle distance between two points in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distance() {
        let delhi = GeoPoint::new(28.6139, 77.2090);
        assert!(haversine_km(delhi, delhi).abs() < 1e-9);
    }

    #[test]
    fn test_delhi_to_mumbai() {
        let delhi = GeoPoint::new(28.6139, 77.2090);
        let mumbai = GeoPoint::new(19.0760, 72.8777);
        let d = delhi.distance_km(&mumbai);
        assert!((1140.0..1160.0).contains(&d), "got {}", d);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = GeoPoint::new(12.9716, 77.5946);
        let b = GeoPoint::new(13.0827, 80.2707);
        assert!((haversine_km(a, b) - haversine_km(b, a)).abs() < 1e-9);
    }

    #[test]
    fn test_radius_contains() {
        let center = GeoPoint::new(28.6139, 77.2090);
        let radius = GeoRadius::new(center, 10.0);
        assert!(radius.contains(&GeoPoint::new(28.6304, 77.2177)));
        assert!(!radius.contains(&GeoPoint::new(28.4595, 77.0266)));
    }
}
