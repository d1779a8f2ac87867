//! CSV exports of detected cells and tracked storms

use crate::{PipelineError, PipelineResult};
use chrono::{Duration, NaiveDateTime, Timelike};
use serde::Serialize;
use std::collections::BTreeMap;
use storm_core::{DetectedCell, TrackedCellRow};

/// Serialize records to CSV with a header row
pub fn to_csv<T: Serialize>(records: &[T]) -> PipelineResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.serialize(record)?;
    }
    writer
        .into_inner()
        .map_err(|e| PipelineError::export(e.to_string()))
}

/// Per-frame cell export
pub fn cells_csv(cells: &[DetectedCell]) -> PipelineResult<Vec<u8>> {
    to_csv(cells)
}

/// Session export of all (storm, cell) rows
///
/// Ids restart at 1 for every range, so rows from several ranges' exports
/// must be told apart by `radar_range_km` as well as `storm_id`.
pub fn tracked_csv(rows: &[TrackedCellRow]) -> PipelineResult<Vec<u8>> {
    to_csv(rows)
}

/// Start of the `interval_minutes` bucket containing `timestamp`
pub fn snapshot_bucket(timestamp: NaiveDateTime, interval_minutes: i64) -> NaiveDateTime {
    let interval = interval_minutes.max(1);
    let offset = timestamp.minute() as i64 % interval;
    timestamp
        - Duration::minutes(offset)
        - Duration::seconds(timestamp.second() as i64)
        - Duration::nanoseconds(timestamp.nanosecond() as i64)
}

/// Group rows into time buckets, preserving row order within each bucket
pub fn snapshot_groups(
    rows: &[TrackedCellRow],
    interval_minutes: i64,
) -> BTreeMap<NaiveDateTime, Vec<TrackedCellRow>> {
    let mut groups: BTreeMap<NaiveDateTime, Vec<TrackedCellRow>> = BTreeMap::new();
    for row in rows {
        groups
            .entry(snapshot_bucket(row.timestamp, interval_minutes))
            .or_default()
            .push(row.clone());
    }
    groups
}
