//! Spherical geodesy primitives shared by every filter stage.
//!
//! Angles are degrees clockwise from true north. Distances are meters on a
//! sphere of mean Earth radius.

use crate::types::LatLng;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters (haversine form, `atan2` for stability).
pub fn haversine(from: LatLng, to: LatLng) -> f64 {
    let phi1 = from.lat.to_radians();
    let phi2 = to.lat.to_radians();
    let d_phi = phi2 - phi1;
    let d_lambda = (to.lng - from.lng).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push `a` a hair outside [0, 1] near antipodes.
    let a = a.clamp(0.0, 1.0);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Initial bearing (forward azimuth) from `from` toward `to`, in [0, 360).
pub fn bearing(from: LatLng, to: LatLng) -> f64 {
    let phi1 = from.lat.to_radians();
    let phi2 = to.lat.to_radians();
    let d_lambda = (to.lng - from.lng).to_radians();
    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    wrap_360(y.atan2(x).to_degrees())
}

/// Normalize any angle to [0, 360).
pub fn wrap_360(deg: f64) -> f64 {
    let r = deg.rem_euclid(360.0);
    // rem_euclid can return exactly 360.0 for tiny negative inputs
    if r >= 360.0 {
        0.0
    } else {
        r
    }
}

/// Normalize an angle difference to (-180, 180].
pub fn wrap_180(deg: f64) -> f64 {
    let r = wrap_360(deg);
    if r > 180.0 {
        r - 360.0
    } else {
        r
    }
}

/// Shortest signed rotation from `from` to `to`, in (-180, 180].
pub fn angle_delta(from: f64, to: f64) -> f64 {
    wrap_180(to - from)
}

/// Point `east_m` / `north_m` meters away from `origin` (local flat offset).
///
/// Only meant for placing simulated peers a few hundred meters apart.
pub fn offset_m(origin: LatLng, east_m: f64, north_m: f64) -> LatLng {
    let d_lat = (north_m / EARTH_RADIUS_M).to_degrees();
    let d_lng = (east_m / (EARTH_RADIUS_M * origin.lat.to_radians().cos())).to_degrees();
    LatLng::new(origin.lat + d_lat, origin.lng + d_lng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn p(lat: f64, lng: f64) -> LatLng {
        LatLng::new(lat, lng)
    }

    #[test]
    fn test_haversine_zero_and_symmetric() {
        let pairs = [
            (p(0.0, 0.0), p(0.0, 0.0009)),
            (p(48.8566, 2.3522), p(51.5074, -0.1278)),
            (p(-33.86, 151.21), p(-33.87, 151.20)),
            (p(89.9, 10.0), p(-89.9, -170.0)),
        ];
        for (a, b) in pairs {
            assert_eq!(haversine(a, a), 0.0);
            assert_abs_diff_eq!(haversine(a, b), haversine(b, a), epsilon = 1e-6);
            assert!(haversine(a, b) >= 0.0);
        }
    }

    #[test]
    fn test_haversine_known_distance() {
        // 0.0009° of longitude at the equator ≈ 100.08 m
        let d = haversine(p(0.0, 0.0), p(0.0, 0.0009));
        assert_abs_diff_eq!(d, 100.08, epsilon = 0.05);
    }

    #[test]
    fn test_haversine_antipodal_is_finite() {
        let d = haversine(p(0.0, 0.0), p(0.0, 180.0));
        assert!(d.is_finite());
        assert_abs_diff_eq!(d, std::f64::consts::PI * EARTH_RADIUS_M, epsilon = 1.0);
    }

    #[test]
    fn test_bearing_cardinals() {
        assert_abs_diff_eq!(bearing(p(0.0, 0.0), p(1.0, 0.0)), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bearing(p(0.0, 0.0), p(0.0, 1.0)), 90.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bearing(p(0.0, 0.0), p(-1.0, 0.0)), 180.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bearing(p(0.0, 0.0), p(0.0, -1.0)), 270.0, epsilon = 1e-9);
    }

    #[test]
    fn test_bearing_range() {
        let origin = p(37.77, -122.42);
        for i in 0..72 {
            let theta = (i as f64 * 5.0).to_radians();
            let other = p(origin.lat + 0.01 * theta.cos(), origin.lng + 0.01 * theta.sin());
            let b = bearing(origin, other);
            assert!((0.0..360.0).contains(&b), "bearing {} out of range", b);
        }
    }

    #[test]
    fn test_wrapping() {
        assert_eq!(wrap_360(360.0), 0.0);
        assert_eq!(wrap_360(-90.0), 270.0);
        assert_eq!(wrap_360(725.0), 5.0);
        assert_eq!(wrap_180(180.0), 180.0);
        assert_eq!(wrap_180(-180.0), 180.0);
        assert_eq!(wrap_180(190.0), -170.0);
        assert_eq!(angle_delta(350.0, 10.0), 20.0);
        assert_eq!(angle_delta(10.0, 350.0), -20.0);
    }

    #[test]
    fn test_offset_roundtrips_through_haversine() {
        let origin = p(45.0, 6.0);
        let moved = offset_m(origin, 30.0, 40.0);
        assert_abs_diff_eq!(haversine(origin, moved), 50.0, epsilon = 0.05);
        assert_abs_diff_eq!(bearing(origin, moved), 36.87, epsilon = 0.05);
    }
}
