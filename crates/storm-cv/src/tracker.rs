//! Multi-object storm tracking
//!
//! Tracks storm cells across frames of one tracking session (one radar range,
//! one calendar day) using Hungarian association of Kalman-predicted
//! positions and elapsed-time track expiry.

use crate::association::{self, Association};
use crate::config::TrackingConfig;
use crate::kalman::{Correction, KalmanTracker};
use crate::{CvError, CvResult};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;
use storm_core::{
    DetectedCell, RadarRange, SensorGeometry, StormId, TrackedCellRow, TrajectoryPoint,
};
use tracing::{debug, trace};

/// Lifecycle state of a storm track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackStatus {
    /// Matched on the latest frame step
    Active,
    /// Live but unmatched on the latest frame step
    Missed,
    /// Unseen for longer than the expiry gap; history is frozen
    Expired,
}

/// One storm identity followed across frames
#[derive(Debug, Clone)]
pub struct StormTrack {
    id: StormId,
    kalman: KalmanTracker,
    history: Vec<DetectedCell>,
    last_seen: NaiveDateTime,
    missed_count: u32,
    status: TrackStatus,
}

impl StormTrack {
    fn new(id: StormId, cell: DetectedCell, config: &TrackingConfig) -> Self {
        Self {
            id,
            kalman: KalmanTracker::from_observation(cell.observation(), config),
            last_seen: cell.timestamp,
            history: vec![cell],
            missed_count: 0,
            status: TrackStatus::Active,
        }
    }

    fn predict(&mut self) -> [f64; 3] {
        self.kalman.predict()
    }

    fn update(&mut self, cell: DetectedCell) -> Correction {
        let correction = self.kalman.update(cell.observation());
        self.last_seen = cell.timestamp;
        self.history.push(cell);
        self.missed_count = 0;
        self.status = TrackStatus::Active;
        correction
    }

    fn mark_missed(&mut self) {
        self.missed_count += 1;
        self.status = TrackStatus::Missed;
    }

    pub fn id(&self) -> StormId {
        self.id
    }

    /// Cells matched to this track, in time order
    pub fn history(&self) -> &[DetectedCell] {
        &self.history
    }

    pub fn last_seen(&self) -> NaiveDateTime {
        self.last_seen
    }

    pub fn missed_count(&self) -> u32 {
        self.missed_count
    }

    pub fn status(&self) -> TrackStatus {
        self.status
    }

    pub fn is_expired(&self) -> bool {
        self.status == TrackStatus::Expired
    }

    /// Current motion model state [x, y, area, vx, vy, varea]
    pub fn state(&self) -> &[f64; 6] {
        self.kalman.state()
    }

    /// Trajectory points projected through the sensor geometry
    pub fn trajectory(&self, geometry: &SensorGeometry) -> Vec<TrajectoryPoint> {
        self.history
            .iter()
            .map(|cell| TrajectoryPoint {
                timestamp: cell.timestamp,
                x_px: cell.x_px,
                y_px: cell.y_px,
                area_px: cell.area_px,
                position: geometry.pixel_to_geo(cell.x_px as f64, cell.y_px as f64),
            })
            .collect()
    }
}

/// All tracks of one (radar range, date) tracking session
#[derive(Debug, Clone)]
pub struct TrackingSession {
    range: RadarRange,
    date: NaiveDate,
    tracks: Vec<StormTrack>,
    next_sequence: u64,
    last_frame: Option<NaiveDateTime>,
    frames: u64,
}

impl TrackingSession {
    pub fn new(range: RadarRange, date: NaiveDate) -> Self {
        Self {
            range,
            date,
            tracks: Vec::new(),
            next_sequence: 1,
            last_frame: None,
            frames: 0,
        }
    }

    pub fn range(&self) -> &RadarRange {
        &self.range
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// All tracks, in allocation order
    pub fn tracks(&self) -> &[StormTrack] {
        &self.tracks
    }

    pub fn track(&self, id: StormId) -> Option<&StormTrack> {
        self.tracks.iter().find(|t| t.id == id)
    }

    /// Tracks not yet expired
    pub fn live_tracks(&self) -> impl Iterator<Item = &StormTrack> {
        self.tracks.iter().filter(|t| !t.is_expired())
    }

    /// Number of frame steps consumed
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Flatten the session into one row per (storm, cell) pair
    pub fn rows(&self) -> Vec<TrackedCellRow> {
        self.tracks
            .iter()
            .flat_map(|track| track.history.iter().map(|cell| TrackedCellRow::new(&track.id, cell)))
            .collect()
    }

    /// Trajectories keyed by storm id
    pub fn trajectories(&self, geometry: &SensorGeometry) -> BTreeMap<String, Vec<TrajectoryPoint>> {
        self.tracks
            .iter()
            .map(|track| (track.id.to_string(), track.trajectory(geometry)))
            .collect()
    }

    /// Finalize the session; live tracks are kept as they are
    pub fn into_tracks(self) -> Vec<StormTrack> {
        self.tracks
    }

    fn allocate_id(&mut self) -> StormId {
        let id = StormId::new(self.next_sequence, self.date);
        self.next_sequence += 1;
        id
    }
}

/// Outcome of one frame step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub detections: usize,
    pub matched: usize,
    pub missed: usize,
    pub created: usize,
    pub expired: usize,
    pub regularized: usize,
}

/// Drives the predict → associate → update → expire loop
#[derive(Debug, Clone, Default)]
pub struct TrackManager {
    config: TrackingConfig,
}

impl TrackManager {
    pub fn new(config: TrackingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Consume one frame's detections
    ///
    /// This method:
    /// 1. Expires tracks unseen for longer than the expiry gap
    /// 2. Predicts the remaining tracks one interval ahead
    /// 3. Associates detections with predictions (optimal, gated)
    /// 4. Updates matched tracks and marks the others missed
    /// 5. Starts new tracks for unmatched detections
    ///
    /// Frames must arrive in strictly increasing timestamp order and belong to
    /// the session's date.
    pub fn step(
        &self,
        session: &mut TrackingSession,
        timestamp: NaiveDateTime,
        detections: Vec<DetectedCell>,
    ) -> CvResult<StepReport> {
        if timestamp.date() != session.date {
            return Err(CvError::tracking(format!(
                "frame {} outside session date {}",
                timestamp, session.date
            )));
        }
        if let Some(last) = session.last_frame {
            if timestamp <= last {
                return Err(CvError::tracking(format!(
                    "frame {} does not follow {}",
                    timestamp, last
                )));
            }
        }
        session.last_frame = Some(timestamp);
        session.frames += 1;

        let mut report = StepReport {
            detections: detections.len(),
            ..Default::default()
        };

        let gap = self.config.expiry_gap();
        for track in session.tracks.iter_mut().filter(|t| !t.is_expired()) {
            if timestamp - track.last_seen > gap {
                track.status = TrackStatus::Expired;
                report.expired += 1;
                debug!("Storm {} expired, last seen {}", track.id, track.last_seen);
            }
        }

        let active: Vec<usize> = session
            .tracks
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.is_expired())
            .map(|(i, _)| i)
            .collect();

        if active.is_empty() {
            for cell in detections {
                self.create_track(session, cell);
                report.created += 1;
            }
            trace!("{}: no live tracks, started {}", timestamp, report.created);
            return Ok(report);
        }

        let predictions: Vec<[f64; 3]> = active
            .iter()
            .map(|&i| session.tracks[i].predict())
            .collect();

        let Association {
            matches,
            unmatched_tracks,
            unmatched_detections,
        } = association::associate(&predictions, &detections, self.config.gate_distance);

        let mut cells: Vec<Option<DetectedCell>> = detections.into_iter().map(Some).collect();

        for (t, d) in matches {
            if let Some(cell) = cells[d].take() {
                let track = &mut session.tracks[active[t]];
                if track.update(cell) == Correction::Regularized {
                    report.regularized += 1;
                }
                report.matched += 1;
            }
        }

        for t in unmatched_tracks {
            session.tracks[active[t]].mark_missed();
            report.missed += 1;
        }

        for d in unmatched_detections {
            if let Some(cell) = cells[d].take() {
                self.create_track(session, cell);
                report.created += 1;
            }
        }

        trace!("{}: {:?}", timestamp, report);
        Ok(report)
    }

    fn create_track(&self, session: &mut TrackingSession, cell: DetectedCell) -> StormId {
        let id = session.allocate_id();
        session.tracks.push(StormTrack::new(id, cell, &self.config));
        debug!("Created storm track {}", id);
        id
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 11, 3).unwrap()
    }

    fn t(minutes: i64) -> NaiveDateTime {
        date().and_hms_opt(12, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn session() -> TrackingSession {
        TrackingSession::new(RadarRange::parse("70km").unwrap(), date())
    }

    fn cell(at: NaiveDateTime, x: u32, y: u32, area: f64) -> DetectedCell {
        DetectedCell {
            timestamp: at,
            radar_range_km: 70.0,
            x_px: x,
            y_px: y,
            width_px: 5,
            height_px: 5,
            area_px: area,
            area_km2: storm_core::pixels_to_km2(area, 70.0, 217, 120),
        }
    }

    #[test]
    fn test_first_frame_starts_tracks() {
        let manager = TrackManager::default();
        let mut session = session();

        let report = manager
            .step(&mut session, t(0), vec![cell(t(0), 10, 10, 20.0), cell(t(0), 150, 90, 20.0)])
            .unwrap();

        assert_eq!(report.created, 2);
        assert_eq!(session.tracks().len(), 2);
        assert_eq!(session.tracks()[0].id().to_string(), "1_20241103");
        assert_eq!(session.tracks()[1].id().to_string(), "2_20241103");
    }

    #[test]
    fn test_smooth_motion_keeps_one_identity() {
        let manager = TrackManager::default();
        let mut session = session();
        let frames = 10;

        for i in 0..frames {
            let at = t(5 * i as i64);
            let x = 20 + 3 * i;
            manager
                .step(&mut session, at, vec![cell(at, x, 40, 25.0)])
                .unwrap();
        }

        assert_eq!(session.tracks().len(), 1);
        let track = &session.tracks()[0];
        assert_eq!(track.history().len(), frames as usize);
        assert_eq!(track.missed_count(), 0);
        assert_eq!(track.status(), TrackStatus::Active);
        assert!(track.history().windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_three_frame_scenario() {
        let manager = TrackManager::default();
        let mut session = session();

        for (i, x) in [50u32, 52, 54].into_iter().enumerate() {
            let at = t(5 * i as i64);
            manager.step(&mut session, at, vec![cell(at, x, 60, 30.0)]).unwrap();
        }

        let tracks = session.into_tracks();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].missed_count(), 0);
        assert_eq!(tracks[0].history().len(), 3);
    }

    #[test]
    fn test_missed_then_reacquired() {
        let manager = TrackManager::default();
        let mut session = session();

        manager.step(&mut session, t(0), vec![cell(t(0), 30, 30, 20.0)]).unwrap();
        let report = manager.step(&mut session, t(5), vec![]).unwrap();
        assert_eq!(report.missed, 1);
        assert_eq!(session.tracks()[0].status(), TrackStatus::Missed);
        assert_eq!(session.tracks()[0].missed_count(), 1);

        let report = manager
            .step(&mut session, t(10), vec![cell(t(10), 31, 30, 20.0)])
            .unwrap();
        assert_eq!(report.matched, 1);
        let track = &session.tracks()[0];
        assert_eq!(track.status(), TrackStatus::Active);
        assert_eq!(track.missed_count(), 0);
        assert_eq!(track.history().len(), 2);
    }

    #[test]
    fn test_expired_track_receives_no_assignment() {
        let manager = TrackManager::default();
        let mut session = session();

        manager.step(&mut session, t(0), vec![cell(t(0), 30, 30, 20.0)]).unwrap();
        manager.step(&mut session, t(5), vec![]).unwrap();
        manager.step(&mut session, t(10), vec![]).unwrap();
        assert_eq!(session.tracks()[0].missed_count(), 2);
        assert!(!session.tracks()[0].is_expired());

        // gap of 15 minutes exceeds 2 intervals: the old storm is out
        let report = manager
            .step(&mut session, t(15), vec![cell(t(15), 30, 30, 20.0)])
            .unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.matched, 0);
        assert_eq!(report.created, 1);

        let old = &session.tracks()[0];
        assert!(old.is_expired());
        assert_eq!(old.history().len(), 1);
        assert_eq!(old.missed_count(), 2);

        let new = &session.tracks()[1];
        assert_eq!(new.id().sequence(), 2);
        assert_eq!(new.history().len(), 1);
    }

    #[test]
    fn test_ids_strictly_increase() {
        let manager = TrackManager::default();
        let mut session = session();

        for i in 0..4 {
            let at = t(5 * i);
            // each frame adds a storm far from all others
            let detections = (0..=i as u32).map(|k| cell(at, 10 + 40 * k, 10, 15.0)).collect();
            manager.step(&mut session, at, detections).unwrap();
        }

        let sequences: Vec<u64> = session.tracks().iter().map(|t| t.id().sequence()).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_every_cell_belongs_to_one_track() {
        let manager = TrackManager::default();
        let mut session = session();

        for i in 0..5 {
            let at = t(5 * i);
            let detections = vec![
                cell(at, 20 + 2 * i as u32, 20, 18.0),
                cell(at, 120 - 2 * i as u32, 70, 40.0),
            ];
            manager.step(&mut session, at, detections).unwrap();
        }

        let rows = session.rows();
        assert_eq!(rows.len(), 10);
        assert_eq!(session.tracks().len(), 2);
        for track in session.tracks() {
            assert!(track.state().iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_out_of_order_frame_rejected() {
        let manager = TrackManager::default();
        let mut session = session();

        manager.step(&mut session, t(10), vec![]).unwrap();
        assert!(manager.step(&mut session, t(5), vec![]).is_err());
        assert!(manager.step(&mut session, t(10), vec![]).is_err());
    }

    #[test]
    fn test_frame_from_other_day_rejected() {
        let manager = TrackManager::default();
        let mut session = session();
        let tomorrow = t(0) + Duration::days(1);
        assert!(matches!(
            manager.step(&mut session, tomorrow, vec![]),
            Err(CvError::Tracking(_))
        ));
    }

    #[test]
    fn test_trajectories_are_projected() {
        let manager = TrackManager::default();
        let mut session = session();
        manager.step(&mut session, t(0), vec![cell(t(0), 108, 60, 20.0)]).unwrap();

        let geometry = SensorGeometry::default();
        let trajectories = session.trajectories(&geometry);
        let points = &trajectories["1_20241103"];
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].position, geometry.pixel_to_geo(108.0, 60.0));
    }
}
