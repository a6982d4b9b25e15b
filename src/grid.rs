//! Maidenhead locator decoding and great-circle geometry.
//!
//! Locators are decoded to the center of the smallest cell they resolve:
//!
//! ```text
//! F N 4 2 a b
//! │ │ │ │ │ └─ subsquare latitude   (2.5', A-X)
//! │ │ │ │ └─── subsquare longitude  (5',   A-X)
//! │ │ │ └───── square latitude      (1°,   0-9)
//! │ │ └─────── square longitude     (2°,   0-9)
//! │ └───────── field latitude       (10°,  A-R)
//! └─────────── field longitude      (20°,  A-R)
//! ```
//!
//! Everything here is pure and can be called from any thread.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometers to statute miles.
pub const KM_TO_MILES: f64 = 0.621371;

const FIELD_LON_DEG: f64 = 20.0;
const FIELD_LAT_DEG: f64 = 10.0;
const SQUARE_LON_DEG: f64 = 2.0;
const SQUARE_LAT_DEG: f64 = 1.0;
const SUBSQUARE_LON_DEG: f64 = SQUARE_LON_DEG / 24.0;
const SUBSQUARE_LAT_DEG: f64 = SQUARE_LAT_DEG / 24.0;

/// A point on the Earth's surface in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude, positive north.
    pub latitude: f64,
    /// Longitude, positive east.
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

/// Offset of `c` within `first..=last`, or `None` when out of range.
fn offset(c: u8, first: u8, last: u8) -> Option<f64> {
    (first..=last).contains(&c).then(|| f64::from(c - first))
}

/// Convert a Maidenhead locator to the center of its cell.
///
/// Accepts 4, 5 or 6 characters, case-insensitive. A fifth character must be
/// a valid subsquare letter but only a full pair refines the result, so a
/// 5-character locator resolves to its square.
///
/// # Example
///
/// ```
/// use ft8_feed::grid::locator_to_coordinate;
///
/// let c = locator_to_coordinate("FN42").unwrap();
/// assert!((c.latitude - 42.5).abs() < 1e-9);
/// assert!((c.longitude - -71.0).abs() < 1e-9);
/// assert!(locator_to_coordinate("FN4").is_none());
/// ```
pub fn locator_to_coordinate(locator: &str) -> Option<Coordinate> {
    let bytes: Vec<u8> = locator.bytes().map(|b| b.to_ascii_uppercase()).collect();
    if !(4..=6).contains(&bytes.len()) {
        return None;
    }

    let mut lon = -180.0
        + offset(bytes[0], b'A', b'R')? * FIELD_LON_DEG
        + offset(bytes[2], b'0', b'9')? * SQUARE_LON_DEG;
    let mut lat = -90.0
        + offset(bytes[1], b'A', b'R')? * FIELD_LAT_DEG
        + offset(bytes[3], b'0', b'9')? * SQUARE_LAT_DEG;

    let subsquare_lon = match bytes.get(4) {
        Some(&c) => Some(offset(c, b'A', b'X')?),
        None => None,
    };
    let subsquare_lat = match bytes.get(5) {
        Some(&c) => Some(offset(c, b'A', b'X')?),
        None => None,
    };

    match (subsquare_lon, subsquare_lat) {
        (Some(x), Some(y)) => {
            lon += x * SUBSQUARE_LON_DEG + SUBSQUARE_LON_DEG / 2.0;
            lat += y * SUBSQUARE_LAT_DEG + SUBSQUARE_LAT_DEG / 2.0;
        }
        _ => {
            lon += SQUARE_LON_DEG / 2.0;
            lat += SQUARE_LAT_DEG / 2.0;
        }
    }

    Some(Coordinate::new(lat, lon))
}

/// Whether `locator` decodes to a coordinate.
#[inline]
pub fn is_valid_locator(locator: &str) -> bool {
    locator_to_coordinate(locator).is_some()
}

/// Great-circle distance between two points in kilometers (haversine).
pub fn distance_km(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

    // Rounding can push h a hair past 1.0 for antipodal points.
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Initial great-circle bearing from `a` to `b`, in `[0, 360)` degrees.
pub fn bearing_degrees(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();

    let bearing = y.atan2(x).to_degrees().rem_euclid(360.0);
    // rem_euclid can return exactly 360.0 for tiny negative inputs
    if bearing >= 360.0 { 0.0 } else { bearing }
}

/// Distance from `from` to the center of `locator`, if the locator is valid.
pub fn distance_to_locator(from: Coordinate, locator: &str) -> Option<f64> {
    locator_to_coordinate(locator).map(|to| distance_km(from, to))
}

/// Render a distance with one decimal place, e.g. `"12.3 km"` or `"7.6 mi"`.
pub fn format_distance(km: f64, use_miles: bool) -> String {
    if use_miles {
        format!("{:.1} mi", km * KM_TO_MILES)
    } else {
        format!("{:.1} km", km)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {} within {} of {}",
            actual,
            tolerance,
            expected
        );
    }

    #[test]
    fn test_four_char_center() {
        let c = locator_to_coordinate("FN42").unwrap();
        assert_close(c.latitude, 42.5, 1e-9);
        assert_close(c.longitude, -71.0, 1e-9);
    }

    #[test]
    fn test_lowercase_locator() {
        assert_eq!(locator_to_coordinate("fn42"), locator_to_coordinate("FN42"));
        assert_eq!(
            locator_to_coordinate("fn42ab"),
            locator_to_coordinate("FN42AB")
        );
    }

    #[test]
    fn test_six_char_center() {
        // FN31pr is the classic W1AW locator
        let c = locator_to_coordinate("FN31pr").unwrap();
        assert_close(c.latitude, 41.0 + 17.0 / 24.0 + 1.0 / 48.0, 1e-9);
        assert_close(c.longitude, -74.0 + 15.0 / 12.0 + 1.0 / 24.0, 1e-9);
    }

    #[test]
    fn test_grid_corners() {
        let sw = locator_to_coordinate("AA00").unwrap();
        assert_close(sw.latitude, -89.5, 1e-9);
        assert_close(sw.longitude, -179.0, 1e-9);

        let ne = locator_to_coordinate("RR99XX").unwrap();
        assert!(ne.latitude < 90.0 && ne.longitude < 180.0);
        assert_close(ne.latitude, 90.0 - 1.0 / 48.0, 1e-9);
        assert_close(ne.longitude, 180.0 - 1.0 / 24.0, 1e-9);
    }

    #[test]
    fn test_five_char_resolves_to_square() {
        assert_eq!(locator_to_coordinate("FN42A"), locator_to_coordinate("FN42"));
        assert!(locator_to_coordinate("FN42Z").is_none());
    }

    #[test]
    fn test_invalid_locators() {
        for bad in [
            "", "F", "FN", "FN4", "FN42ABC", "SN42", "FS42", "FNA2", "FN4B", "FN42YA", "FN42AY",
            "12FN", "FN42 ", "ÅN42",
        ] {
            assert!(locator_to_coordinate(bad).is_none(), "{:?} should be rejected", bad);
            assert!(!is_valid_locator(bad));
        }
    }

    #[test]
    fn test_distance_known_pair() {
        // Boston to London, roughly 5265 km
        let boston = Coordinate::new(42.3601, -71.0589);
        let london = Coordinate::new(51.5074, -0.1278);
        assert_close(distance_km(boston, london), 5265.0, 15.0);
    }

    #[test]
    fn test_distance_zero_and_antipodal() {
        let a = Coordinate::new(12.5, 99.0);
        assert_eq!(distance_km(a, a), 0.0);

        let b = Coordinate::new(-12.5, -81.0);
        assert_close(
            distance_km(a, b),
            std::f64::consts::PI * EARTH_RADIUS_KM,
            1e-2,
        );
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = Coordinate::new(0.0, 0.0);
        assert_close(bearing_degrees(origin, Coordinate::new(10.0, 0.0)), 0.0, 1e-9);
        assert_close(bearing_degrees(origin, Coordinate::new(0.0, 10.0)), 90.0, 1e-9);
        assert_close(bearing_degrees(origin, Coordinate::new(-10.0, 0.0)), 180.0, 1e-9);
        assert_close(bearing_degrees(origin, Coordinate::new(0.0, -10.0)), 270.0, 1e-9);
    }

    #[test]
    fn test_distance_to_locator() {
        let here = locator_to_coordinate("FN42").unwrap();
        assert_close(distance_to_locator(here, "FN42").unwrap(), 0.0, 1e-9);
        assert!(distance_to_locator(here, "ZZ99").is_none());
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(12.34, false), "12.3 km");
        assert_eq!(format_distance(12.34, true), "7.7 mi");
        assert_eq!(format_distance(0.0, true), "0.0 mi");
        assert_eq!(format_distance(1000.0, true), "621.4 mi");
    }
}
