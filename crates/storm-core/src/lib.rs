//! # Storm Core
//!
//! Core domain models shared by the storm tracking crates: detected storm
//! cells, storm identities, radar ranges, sensor geometry and the frame naming
//! conventions of the radar image store.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod error;
pub mod geo;
pub mod naming;

pub use error::{CoreError, CoreResult};
pub use geo::*;

/// Nominal interval between radar frames, in minutes
pub const FRAME_INTERVAL_MINUTES: i64 = 5;

// ============================================================================
// RADAR RANGE
// ============================================================================

/// Radar product range, e.g. `70km`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RadarRange {
    label: String,
    km: f64,
}

impl RadarRange {
    /// Parse a range label of the form `{number}km`
    pub fn parse(label: &str) -> CoreResult<Self> {
        let km = label
            .strip_suffix("km")
            .and_then(|n| n.parse::<f64>().ok())
            .filter(|km| km.is_finite() && *km > 0.0)
            .ok_or_else(|| CoreError::invalid_radar_range(label))?;

        Ok(Self {
            label: label.to_string(),
            km,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn km(&self) -> f64 {
        self.km
    }
}

impl fmt::Display for RadarRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

impl TryFrom<String> for RadarRange {
    type Error = CoreError;

    fn try_from(label: String) -> Result<Self, Self::Error> {
        Self::parse(&label)
    }
}

impl From<RadarRange> for String {
    fn from(range: RadarRange) -> Self {
        range.label
    }
}

// ============================================================================
// STORM IDENTITY
// ============================================================================

/// Storm identity, formatted `{sequence}_{YYYYMMDD}`
///
/// Sequence numbers start at 1 and are allocated in increasing order within
/// one tracking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StormId {
    sequence: u64,
    date: NaiveDate,
}

impl StormId {
    pub fn new(sequence: u64, date: NaiveDate) -> Self {
        Self { sequence, date }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }
}

impl fmt::Display for StormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.sequence, naming::date_compact(self.date))
    }
}

impl Serialize for StormId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ============================================================================
// DETECTION MODELS
// ============================================================================

/// A storm cell extracted from one radar frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedCell {
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    pub radar_range_km: f64,
    /// Bounding box center, truncated to whole pixels
    #[serde(rename = "x_pixels")]
    pub x_px: u32,
    #[serde(rename = "y_pixels")]
    pub y_px: u32,
    #[serde(rename = "width_pixels")]
    pub width_px: u32,
    #[serde(rename = "height_pixels")]
    pub height_px: u32,
    /// Contour area in square pixels, exported truncated to whole pixels
    #[serde(rename = "area_sqpixels", serialize_with = "whole_pixels")]
    pub area_px: f64,
    #[serde(rename = "storm_area_km2")]
    pub area_km2: f64,
}

impl DetectedCell {
    /// Observation vector used by the tracker: (x, y, area)
    pub fn observation(&self) -> [f64; 3] {
        [self.x_px as f64, self.y_px as f64, self.area_px]
    }
}

/// One (storm, cell) pair of a finished tracking session
///
/// Storm ids are numbered per (radar range, date) session, so the same id
/// appears once per range on a given date. Rows are identified by
/// `(radar_range_km, storm_id, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedCellRow {
    pub storm_id: String,
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    pub radar_range_km: f64,
    pub x_pixels: u32,
    pub y_pixels: u32,
    pub width_pixels: u32,
    pub height_pixels: u32,
    pub area_sqpixels: u32,
    pub storm_area_km2: f64,
}

impl TrackedCellRow {
    pub fn new(storm_id: &StormId, cell: &DetectedCell) -> Self {
        Self {
            storm_id: storm_id.to_string(),
            timestamp: cell.timestamp,
            radar_range_km: cell.radar_range_km,
            x_pixels: cell.x_px,
            y_pixels: cell.y_px,
            width_pixels: cell.width_px,
            height_pixels: cell.height_px,
            area_sqpixels: cell.area_px as u32,
            storm_area_km2: cell.area_km2,
        }
    }
}

/// One point of a storm trajectory
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrajectoryPoint {
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    pub x_px: u32,
    pub y_px: u32,
    pub area_px: f64,
    pub position: GeoPosition,
}

fn whole_pixels<S: serde::Serializer>(area: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u32(*area as u32)
}

/// Timestamps are exchanged as `YYYY-MM-DD HH:MM`
pub mod timestamp_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M";

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&ts.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cell() -> DetectedCell {
        DetectedCell {
            timestamp: NaiveDate::from_ymd_opt(2024, 11, 3)
                .unwrap()
                .and_hms_opt(14, 35, 0)
                .unwrap(),
            radar_range_km: 70.0,
            x_px: 40,
            y_px: 22,
            width_px: 6,
            height_px: 4,
            area_px: 15.5,
            area_km2: 11.67,
        }
    }

    #[test]
    fn test_radar_range_parse() {
        let range = RadarRange::parse("70km").unwrap();
        assert_eq!(range.label(), "70km");
        assert_eq!(range.km(), 70.0);

        assert!(RadarRange::parse("70").is_err());
        assert!(RadarRange::parse("km").is_err());
        assert!(RadarRange::parse("-5km").is_err());
    }

    #[test]
    fn test_radar_range_serde_as_label() {
        let range: RadarRange = serde_json::from_str("\"240km\"").unwrap();
        assert_eq!(range.km(), 240.0);
        assert_eq!(serde_json::to_string(&range).unwrap(), "\"240km\"");
        assert!(serde_json::from_str::<RadarRange>("\"far\"").is_err());
    }

    #[test]
    fn test_storm_id_format() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();
        let id = StormId::new(12, date);
        assert_eq!(id.to_string(), "12_20240109");
        assert!(StormId::new(2, date) < StormId::new(10, date));
    }

    #[test]
    fn test_cell_serializes_with_export_columns() {
        let json = serde_json::to_value(sample_cell()).unwrap();
        assert_eq!(json["timestamp"], "2024-11-03 14:35");
        assert_eq!(json["x_pixels"], 40);
        assert_eq!(json["area_sqpixels"], 15);
        assert_eq!(json["storm_area_km2"], 11.67);
    }

    #[test]
    fn test_tracked_row_from_cell() {
        let cell = sample_cell();
        let id = StormId::new(3, cell.timestamp.date());
        let row = TrackedCellRow::new(&id, &cell);
        assert_eq!(row.storm_id, "3_20241103");
        assert_eq!(row.x_pixels, cell.x_px);
        assert_eq!(row.storm_area_km2, cell.area_km2);
        assert_eq!(row.area_sqpixels, 15);
        assert_eq!(cell.observation(), [40.0, 22.0, 15.5]);
    }
}
