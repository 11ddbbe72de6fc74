//! Great-circle distances over the WGS-84 mean Earth radius.

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two coordinates, in kilometers.
///
/// Inputs are decimal degrees. Symmetric, non-negative, and zero for
/// identical points.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lng2 - lng1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_zero() {
        assert_eq!(haversine_km(33.52, -86.81, 33.52, -86.81), 0.0);
    }

    #[test]
    fn symmetric() {
        let forward = haversine_km(33.52, -86.82, 33.75, -86.41);
        let backward = haversine_km(33.75, -86.41, 33.52, -86.82);
        assert!((forward - backward).abs() < 1e-12);
    }

    #[test]
    fn birmingham_block() {
        // One hundredth of a degree of longitude at ~33.5N is just under a kilometer.
        let dist = haversine_km(33.52, -86.82, 33.52, -86.81);
        assert!((dist - 0.93).abs() < 0.02, "got {}", dist);
    }

    #[test]
    fn one_degree_longitude_at_equator() {
        let dist = haversine_km(0.0, 0.0, 0.0, 1.0);
        assert!(dist > 110.0 && dist < 112.0, "got {}", dist);
    }

    #[test]
    fn triangle_inequality() {
        let a = (40.7128, -74.0060);
        let b = (39.9526, -75.1652);
        let c = (38.9072, -77.0369);
        let ab = haversine_km(a.0, a.1, b.0, b.1);
        let bc = haversine_km(b.0, b.1, c.0, c.1);
        let ac = haversine_km(a.0, a.1, c.0, c.1);
        assert!(ac <= ab + bc + 1e-9);
    }
}
