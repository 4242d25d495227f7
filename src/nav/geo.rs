//! Geographic calculations on the WGS-84 sphere
//!
//! All angles in degrees, all distances in meters. Headings follow the
//! compass convention: 0° is true north, clockwise positive, wrapping at
//! 360°.

/// Mean Earth radius (IUGG R1), meters
pub const EARTH_RADIUS_M: f64 = 6371008.8;

/// Great-circle distance between two (lat, lon) points, meters (haversine)
pub fn haversine_m(a: (f64, f64), b: (f64, f64)) -> f64 {
    let lat1 = a.0.to_radians();
    let lat2 = b.0.to_radians();
    let dlat = (b.0 - a.0).to_radians();
    let dlon = (b.1 - a.1).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Initial great-circle bearing from `a` to `b`, degrees in [0, 360)
pub fn initial_bearing_deg(a: (f64, f64), b: (f64, f64)) -> f64 {
    let lat1 = a.0.to_radians();
    let lat2 = b.0.to_radians();
    let dlon = (b.1 - a.1).to_radians();

    let x = dlon.sin() * lat2.cos();
    let y = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();

    let bearing = x.atan2(y).to_degrees();
    (bearing + 360.0) % 360.0
}

/// Map any angle into (-180, 180]
#[inline]
pub fn normalize_signed_deg(angle: f64) -> f64 {
    let mut a = angle % 360.0;
    if a <= -180.0 {
        a += 360.0;
    } else if a > 180.0 {
        a -= 360.0;
    }
    a
}

/// Shortest signed rotation from `current` to `target` (positive = turn right)
#[inline]
pub fn heading_error_deg(current: f64, target: f64) -> f64 {
    normalize_signed_deg(target - current)
}

/// Mean of compass headings via unit-vector sum, degrees in [0, 360).
///
/// Returns `None` for an empty slice or when the samples cancel out (e.g.
/// exactly 0° and 180°), where no mean direction exists.
pub fn circular_mean_deg(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let (sx, sy) = samples.iter().fold((0.0f64, 0.0f64), |(sx, sy), &deg| {
        let rad = deg.to_radians();
        (sx + rad.cos(), sy + rad.sin())
    });
    if sx.hypot(sy) < 1e-9 {
        return None;
    }
    let mean = sy.atan2(sx).to_degrees();
    Some((mean + 360.0) % 360.0)
}

/// Angular spread of compass headings, degrees in [0, 360).
///
/// Computed as 360° minus the largest gap between consecutive samples on
/// the circle, so 359° and 1° have a range of 2°, not 358°.
pub fn circular_range_deg(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let mut sorted: Vec<f64> = samples.iter().map(|&d| (d % 360.0 + 360.0) % 360.0).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let mut max_gap = 360.0 - sorted[sorted.len() - 1] + sorted[0];
    for pair in sorted.windows(2) {
        let gap = pair[1] - pair[0];
        if gap > max_gap {
            max_gap = gap;
        }
    }
    360.0 - max_gap
}

/// Destination point given start, bearing, and distance along the great circle
pub fn destination_point(start: (f64, f64), bearing_deg: f64, distance_m: f64) -> (f64, f64) {
    let lat1 = start.0.to_radians();
    let lon1 = start.1.to_radians();
    let bearing = bearing_deg.to_radians();
    let angular = distance_m / EARTH_RADIUS_M;

    let lat2 = (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * bearing.cos()).asin();
    let lon2 = lon1
        + (bearing.sin() * angular.sin() * lat1.cos())
            .atan2(angular.cos() - lat1.sin() * lat2.sin());

    (lat2.to_degrees(), lon2.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_haversine_zero_distance() {
        assert_relative_eq!(
            haversine_m((52.0, 21.0), (52.0, 21.0)),
            0.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_haversine_antipodal() {
        // Half the circumference of the sphere
        let d = haversine_m((0.0, 0.0), (0.0, 180.0));
        assert_relative_eq!(d, std::f64::consts::PI * EARTH_RADIUS_M, epsilon = 1.0);
    }

    #[test]
    fn test_haversine_one_degree_longitude_at_equator() {
        let d = haversine_m((0.0, 0.0), (0.0, 1.0));
        assert_relative_eq!(d, EARTH_RADIUS_M * 1.0_f64.to_radians(), epsilon = 1.0);
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        assert_relative_eq!(initial_bearing_deg((52.0, 21.0), (53.0, 21.0)), 0.0, epsilon = 0.1);
        assert_relative_eq!(initial_bearing_deg((52.0, 21.0), (51.0, 21.0)), 180.0, epsilon = 0.1);
        assert_relative_eq!(initial_bearing_deg((0.0, 0.0), (0.0, 1.0)), 90.0, epsilon = 0.1);
        assert_relative_eq!(initial_bearing_deg((0.0, 1.0), (0.0, 0.0)), 270.0, epsilon = 0.1);
    }

    #[test]
    fn test_normalize_signed_boundaries() {
        assert_relative_eq!(normalize_signed_deg(360.0), 0.0);
        assert_relative_eq!(normalize_signed_deg(-180.0), 180.0);
        assert_relative_eq!(normalize_signed_deg(180.0), 180.0);
        assert_relative_eq!(normalize_signed_deg(540.0), 180.0);
        assert_relative_eq!(normalize_signed_deg(-90.0), -90.0);
        assert_relative_eq!(normalize_signed_deg(350.0), -10.0);
    }

    #[test]
    fn test_heading_error_shortest_rotation() {
        // Right turn across north
        assert_relative_eq!(heading_error_deg(350.0, 10.0), 20.0);
        // Left turn across north
        assert_relative_eq!(heading_error_deg(10.0, 350.0), -20.0);
        assert_relative_eq!(heading_error_deg(90.0, 90.0), 0.0);
    }

    #[test]
    fn test_circular_mean_identity() {
        let mean = circular_mean_deg(&[84.4, 84.4, 84.4]).unwrap();
        assert_relative_eq!(mean, 84.4, epsilon = 1e-9);
    }

    #[test]
    fn test_circular_mean_wraps_north() {
        let mean = circular_mean_deg(&[359.0, 1.0]).unwrap();
        // Mean of headings either side of north is north
        assert!(mean < 0.001 || mean > 359.999, "mean was {}", mean);
    }

    #[test]
    fn test_circular_mean_degenerate() {
        assert!(circular_mean_deg(&[]).is_none());
        assert!(circular_mean_deg(&[0.0, 180.0]).is_none());
    }

    #[test]
    fn test_circular_range_wraps_north() {
        assert_relative_eq!(circular_range_deg(&[359.0, 1.0]), 2.0, epsilon = 1e-9);
        assert_relative_eq!(circular_range_deg(&[90.0, 92.0, 91.0]), 2.0, epsilon = 1e-9);
        assert_relative_eq!(circular_range_deg(&[90.0]), 0.0);
    }

    #[test]
    fn test_destination_point_round_trip() {
        let start = (52.237049, 21.017532);
        let dest = destination_point(start, 90.0, 27.0);
        assert_relative_eq!(haversine_m(start, dest), 27.0, epsilon = 0.01);
        assert_relative_eq!(initial_bearing_deg(start, dest), 90.0, epsilon = 0.1);
    }
}
