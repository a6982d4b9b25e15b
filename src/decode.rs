//! Data structures representing FT8 decodes.
//!
//! This module defines the record produced for every ingested decode line
//! and the amateur band list the operator selects from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::grid::{self, Coordinate};

/// Sentinel the preferences layer uses for "no band selected".
pub const NO_BAND_SENTINEL: &str = "Select Band";

/// Amateur band the operator is working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    M80,
    M60,
    M40,
    M30,
    M20,
    M17,
    M15,
    M12,
    M10,
    M6,
}

impl Band {
    /// Every selectable band, longest wavelength first.
    pub const ALL: [Band; 10] = [
        Band::M80,
        Band::M60,
        Band::M40,
        Band::M30,
        Band::M20,
        Band::M17,
        Band::M15,
        Band::M12,
        Band::M10,
        Band::M6,
    ];

    /// The band name used on the wire, e.g. `"20m"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Band::M80 => "80m",
            Band::M60 => "60m",
            Band::M40 => "40m",
            Band::M30 => "30m",
            Band::M20 => "20m",
            Band::M17 => "17m",
            Band::M15 => "15m",
            Band::M12 => "12m",
            Band::M10 => "10m",
            Band::M6 => "6m",
        }
    }

    /// Parse a stored band preference, mapping the "none selected" sentinel
    /// (and blank values) to `None`.
    pub fn parse_selection(s: &str) -> Result<Option<Band>, UnknownBand> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case(NO_BAND_SENTINEL) {
            return Ok(None);
        }
        s.parse().map(Some)
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known band.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown band: {0}")]
pub struct UnknownBand(pub String);

impl FromStr for Band {
    type Err = UnknownBand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Band::ALL
            .into_iter()
            .find(|b| b.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownBand(s.to_string()))
    }
}

impl Serialize for Band {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Band {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Deserialize an optional band, accepting the "Select Band" sentinel.
pub fn deserialize_band_selection<'de, D>(deserializer: D) -> Result<Option<Band>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    match s {
        Some(s) => Band::parse_selection(&s).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

/// A single decoded FT8 message.
///
/// A raw line like:
/// ```text
/// 134500 -12  0.3 1234 ~ CQ K1ABC FN42
/// ```
///
/// becomes a `DecodeRecord` with:
/// - `callsign`: "K1ABC"
/// - `grid`: "FN42"
/// - `snr`: -12
/// - `frequency`: 1234
/// - `message`: "CQ K1ABC FN42"
///
/// Fields are private so the grid invariant holds: a non-empty grid is
/// always a locator [`grid::locator_to_coordinate`] accepts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodeRecord {
    callsign: String,
    grid: String,
    snr: i32,
    frequency: u32,
    message: String,
    timestamp: DateTime<Utc>,
}

impl DecodeRecord {
    /// Build a record stamped with the current time.
    pub fn new(
        callsign: impl Into<String>,
        grid: impl Into<String>,
        snr: i32,
        frequency: u32,
        message: impl Into<String>,
    ) -> Self {
        Self::with_timestamp(callsign, grid, snr, frequency, message, Utc::now())
    }

    /// Build a record with an explicit timestamp.
    ///
    /// An unparsable grid is stored as the empty string.
    pub fn with_timestamp(
        callsign: impl Into<String>,
        grid: impl Into<String>,
        snr: i32,
        frequency: u32,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut grid = grid.into();
        if !grid.is_empty() && !(matches!(grid.len(), 4 | 6) && grid::is_valid_locator(&grid)) {
            grid.clear();
        }
        Self {
            callsign: callsign.into(),
            grid,
            snr,
            frequency,
            message: message.into(),
            timestamp,
        }
    }

    /// Callsign of the transmitting station; empty when none was found.
    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    /// Maidenhead locator, or empty.
    pub fn grid(&self) -> &str {
        &self.grid
    }

    /// Signal-to-noise ratio in dB.
    pub fn snr(&self) -> i32 {
        self.snr
    }

    /// Audio frequency offset in Hz, 0 when unknown.
    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Center of this station's grid, if it reported one.
    pub fn coordinate(&self) -> Option<Coordinate> {
        if self.grid.is_empty() {
            return None;
        }
        grid::locator_to_coordinate(&self.grid)
    }

    /// Distance in kilometers from `receiver` to this station's grid.
    pub fn distance_km_from(&self, receiver: Coordinate) -> Option<f64> {
        self.coordinate().map(|c| grid::distance_km(receiver, c))
    }

    /// Initial bearing in degrees from `receiver` to this station's grid.
    pub fn bearing_from(&self, receiver: Coordinate) -> Option<f64> {
        self.coordinate().map(|c| grid::bearing_degrees(receiver, c))
    }

    /// One-line rendering, with the distance included when both the receiver
    /// position and the station's grid are known.
    ///
    /// ```text
    /// 13:45:00 | K1ABC | SNR:-12 | 123.4 km | CQ K1ABC FN42
    /// ```
    pub fn display_text(&self, receiver: Option<Coordinate>, use_miles: bool) -> String {
        let mut text = format!(
            "{} | {} | SNR:{:+}",
            self.timestamp.format("%H:%M:%S"),
            self.callsign,
            self.snr
        );
        if let Some(km) = receiver.and_then(|r| self.distance_km_from(r)) {
            text.push_str(" | ");
            text.push_str(&grid::format_distance(km, use_miles));
        }
        text.push_str(" | ");
        text.push_str(&self.message);
        text
    }
}

impl fmt::Display for DecodeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_text(None, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_1345() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 13, 45, 0).unwrap()
    }

    #[test]
    fn test_invalid_grid_is_dropped() {
        let record = DecodeRecord::new("K1ABC", "ZZ99", -3, 1000, "CQ K1ABC ZZ99");
        assert_eq!(record.grid(), "");
        assert!(record.coordinate().is_none());

        let record = DecodeRecord::new("K1ABC", "FN42", -3, 1000, "CQ K1ABC FN42");
        assert_eq!(record.grid(), "FN42");
        assert!(record.coordinate().is_some());
    }

    #[test]
    fn test_five_char_grid_is_dropped() {
        let record = DecodeRecord::new("K1ABC", "FN42A", 0, 0, "x");
        assert_eq!(record.grid(), "");

        let record = DecodeRecord::new("K1ABC", "FN42AB", 0, 0, "x");
        assert_eq!(record.grid(), "FN42AB");
    }

    #[test]
    fn test_display_without_receiver() {
        let record =
            DecodeRecord::with_timestamp("K1ABC", "FN42", -12, 1234, "CQ K1ABC FN42", at_1345());
        assert_eq!(record.to_string(), "13:45:00 | K1ABC | SNR:-12 | CQ K1ABC FN42");
    }

    #[test]
    fn test_display_with_receiver() {
        let record =
            DecodeRecord::with_timestamp("K1ABC", "FN42", 5, 1234, "CQ K1ABC FN42", at_1345());
        let here = grid::locator_to_coordinate("FN42").unwrap();
        assert_eq!(
            record.display_text(Some(here), true),
            "13:45:00 | K1ABC | SNR:+5 | 0.0 mi | CQ K1ABC FN42"
        );
    }

    #[test]
    fn test_display_skips_distance_without_grid() {
        let record = DecodeRecord::with_timestamp("UNKNOWN", "", 0, 0, "noise", at_1345());
        let here = Coordinate::new(42.0, -71.0);
        assert_eq!(
            record.display_text(Some(here), false),
            "13:45:00 | UNKNOWN | SNR:+0 | noise"
        );
        assert!(record.distance_km_from(here).is_none());
        assert!(record.bearing_from(here).is_none());
    }

    #[test]
    fn test_band_parsing() {
        assert_eq!("20m".parse::<Band>().unwrap(), Band::M20);
        assert_eq!("20M".parse::<Band>().unwrap(), Band::M20);
        assert!("11m".parse::<Band>().is_err());

        assert_eq!(Band::parse_selection("Select Band").unwrap(), None);
        assert_eq!(Band::parse_selection("").unwrap(), None);
        assert_eq!(Band::parse_selection("6m").unwrap(), Some(Band::M6));
    }

    #[test]
    fn test_band_roundtrips_through_display() {
        for band in Band::ALL {
            assert_eq!(band.to_string().parse::<Band>().unwrap(), band);
        }
    }

    #[test]
    fn test_record_serializes() {
        let record =
            DecodeRecord::with_timestamp("K1ABC", "FN42", -12, 1234, "CQ K1ABC FN42", at_1345());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["callsign"], "K1ABC");
        assert_eq!(json["grid"], "FN42");
        assert_eq!(json["snr"], -12);
        assert_eq!(json["frequency"], 1234);
    }
}
