//! Great-circle distance between GPS coordinates.

const EARTH_RADIUS: f64 = 6371.0; // Earth radius in kilometers

/// Haversine distance in meters between two (lat, lon) points given in degrees.
///
/// Invalid coordinates (NaN) propagate as NaN; callers format nothing until
/// they have checked the sample they are working with.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin() * (d_lat / 2.0).sin()
        + lat1.to_radians().cos() * lat2.to_radians().cos()
        * (d_lon / 2.0).sin() * (d_lon / 2.0).sin();

    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS * c * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_for_identical_points() {
        assert_eq!(haversine_distance(22.3190, 87.3091, 22.3190, 87.3091), 0.0);
    }

    #[test]
    fn symmetric() {
        let ab = haversine_distance(22.3190, 87.3091, 22.3312, 87.3072);
        let ba = haversine_distance(22.3312, 87.3072, 22.3190, 87.3091);
        assert_eq!(ab, ba);
    }

    #[test]
    fn one_degree_of_longitude_at_equator() {
        // 1 degree of longitude on the equator is about 111,195 m for R = 6371 km.
        let d = haversine_distance(0.0, 0.0, 0.0, 1.0);
        assert!((d - 111_195.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn nan_propagates() {
        assert!(haversine_distance(f64::NAN, 0.0, 0.0, 1.0).is_nan());
    }
}
