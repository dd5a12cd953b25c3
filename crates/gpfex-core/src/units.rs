//! Unit scaling between the snapshot's user-unit coordinate space and the
//! micron coordinates used by the container and the report.
//!
//! The scale factor always comes from the active snapshot's declared unit
//! (meters per user unit), never from a caller-supplied default, so both
//! export paths produce bit-identical micron values for identical geometry.

use crate::geometry::Polygon;

/// Convert a user-unit value to microns given the snapshot's unit in
/// meters per user unit.
pub fn to_microns(value: f64, meters_per_user_unit: f64) -> f64 {
    value * meters_per_user_unit * 1e6
}

/// The multiplicative factor from user units to microns.
pub fn micron_scale(meters_per_user_unit: f64) -> f64 {
    meters_per_user_unit * 1e6
}

/// Convert a polygon from user units to microns.
pub fn polygon_to_microns(polygon: &Polygon, meters_per_user_unit: f64) -> Polygon {
    polygon.scaled(micron_scale(meters_per_user_unit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;

    #[test]
    fn test_to_microns_linear() {
        let unit = 1e-6;
        let a = to_microns(1.5, unit);
        let b = to_microns(3.0, unit);
        assert!((b - 2.0 * a).abs() < 1e-12);
        assert!((a - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_to_microns_zero() {
        for &unit in &[1e-9, 1e-6, 2.5e-7] {
            assert_eq!(to_microns(0.0, unit), 0.0);
        }
    }

    #[test]
    fn test_polygon_to_microns() {
        let p = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(1000.0, 0.0),
            Point::new(1000.0, 500.0),
        ]);
        // 1 nm user unit: 1000 user units = 1 um
        let um = polygon_to_microns(&p, 1e-9);
        assert_eq!(um.vertices[1], Point::new(1.0, 0.0));
        assert_eq!(um.vertices[2], Point::new(1.0, 0.5));
    }
}
