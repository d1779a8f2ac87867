//! Frame naming conventions
//!
//! Radar frames are stored as `radar_{range}_{YYYYMMDD}_{HHMM}.png`. Only the
//! trailing `HHMM` token carries the time of day; the calendar date comes from
//! the session being processed.

use crate::{CoreError, CoreResult, RadarRange};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// File extension of radar frames
pub const FRAME_EXTENSION: &str = ".png";

/// Compact `YYYYMMDD` form of a date
pub fn date_compact(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// `YYYYMMDD_HHMM` form of a frame timestamp
pub fn timestamp_compact(timestamp: NaiveDateTime) -> String {
    timestamp.format("%Y%m%d_%H%M").to_string()
}

/// Extract the frame timestamp from an object name
///
/// Accepts a full key or a bare file name. The stem must split on `_` into at
/// least three tokens and the last one must be a valid `HHMM` time.
pub fn parse_frame_timestamp(name: &str, date: NaiveDate) -> CoreResult<NaiveDateTime> {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    let stem = file_name
        .strip_suffix(FRAME_EXTENSION)
        .ok_or_else(|| CoreError::NotAnImage(name.to_string()))?;

    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 3 {
        return Err(CoreError::invalid_frame_name(name));
    }

    let token = parts[parts.len() - 1];
    let time = parse_hhmm(token).ok_or_else(|| CoreError::invalid_timestamp(name, token))?;
    Ok(date.and_time(time))
}

fn parse_hhmm(token: &str) -> Option<NaiveTime> {
    if token.len() != 4 || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hour: u32 = token[..2].parse().ok()?;
    let minute: u32 = token[2..].parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Key identifying one frame's cell export: `{range}_{YYYYMMDD_HHMM}`
pub fn frame_key(range: &RadarRange, timestamp: NaiveDateTime) -> String {
    format!("{}_{}", range.label(), timestamp_compact(timestamp))
}

/// Listing prefix of a session's frames: `{root}/{range}/{YYYYMMDD}`
pub fn session_prefix(root: &str, range: &RadarRange, date: NaiveDate) -> String {
    join_key(&[root, range.label(), &date_compact(date)])
}

/// Object key of a per-frame cell export
pub fn cell_export_key(root: &str, range: &RadarRange, timestamp: NaiveDateTime) -> String {
    join_key(&[root, &format!("storm_cells_{}.csv", frame_key(range, timestamp))])
}

/// Object key of a per-session tracked storm export
pub fn session_export_key(root: &str, range: &RadarRange, date: NaiveDate) -> String {
    join_key(&[
        root,
        &format!("tracked_storms_{}_{}.csv", range.label(), date_compact(date)),
    ])
}

/// Object key of a tracked storm snapshot for one time bucket
pub fn snapshot_export_key(root: &str, range: &RadarRange, bucket: NaiveDateTime) -> String {
    join_key(&[
        root,
        &format!("tracked_storms_{}.csv", frame_key(range, bucket)),
    ])
}

fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 11, 3).unwrap()
    }

    #[test]
    fn test_parse_valid_frame_name() {
        let ts = parse_frame_timestamp("bronze/radar/70km/20241103/radar_70km_20241103_1435.png", date())
            .unwrap();
        assert_eq!(ts.date(), date());
        assert_eq!(ts.hour(), 14);
        assert_eq!(ts.minute(), 35);
    }

    #[test]
    fn test_parse_bare_file_name() {
        let ts = parse_frame_timestamp("radar_70km_0005.png", date()).unwrap();
        assert_eq!((ts.hour(), ts.minute()), (0, 5));
    }

    #[test]
    fn test_rejects_non_png() {
        let err = parse_frame_timestamp("radar_70km_20241103_1435.csv", date()).unwrap_err();
        assert!(matches!(err, CoreError::NotAnImage(_)));
        assert!(!err.is_parse_error());
    }

    #[test]
    fn test_rejects_too_few_tokens() {
        let err = parse_frame_timestamp("radar_1435.png", date()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFrameName(_)));
        assert!(err.is_parse_error());
    }

    #[test]
    fn test_rejects_malformed_time_tokens() {
        for name in [
            "radar_70km_20241103_143.png",
            "radar_70km_20241103_14355.png",
            "radar_70km_20241103_14a5.png",
            "radar_70km_20241103_2400.png",
            "radar_70km_20241103_1260.png",
            "radar_70km_20241103_.png",
            "radar_70km_20241103_+123.png",
        ] {
            let err = parse_frame_timestamp(name, date()).unwrap_err();
            assert!(
                matches!(err, CoreError::InvalidTimestamp { .. }),
                "{name} should fail with an invalid timestamp"
            );
        }
    }

    #[test]
    fn test_export_keys() {
        let range = RadarRange::parse("70km").unwrap();
        let ts = date().and_hms_opt(9, 5, 0).unwrap();

        assert_eq!(frame_key(&range, ts), "70km_20241103_0905");
        assert_eq!(
            cell_export_key("silver/storm_cells/", &range, ts),
            "silver/storm_cells/storm_cells_70km_20241103_0905.csv"
        );
        assert_eq!(
            session_prefix("bronze/radar", &range, date()),
            "bronze/radar/70km/20241103"
        );
        assert_eq!(
            session_export_key("silver/tracked_storms", &range, date()),
            "silver/tracked_storms/tracked_storms_70km_20241103.csv"
        );
        assert_eq!(
            snapshot_export_key("", &range, ts),
            "tracked_storms_70km_20241103_0905.csv"
        );
    }
}
