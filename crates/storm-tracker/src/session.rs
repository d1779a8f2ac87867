//! One tracking session: a radar range over one calendar day

use crate::export;
use crate::store::ObjectStore;
use crate::{PipelineConfig, PipelineError, PipelineResult};
use chrono::{NaiveDate, NaiveDateTime};
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use storm_core::naming::{self, FRAME_EXTENSION};
use storm_core::{DetectedCell, RadarRange, TrajectoryPoint};
use storm_cv::{CellDetector, CvEngine};
use storm_db::DbClient;
use storm_telemetry::{MetricsCollector, SkipReason};
use tracing::{debug, info, warn};

/// Summary of a finished session
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionReport {
    pub radar_range: String,
    pub date: Option<NaiveDate>,
    pub frames_listed: usize,
    pub frames_tracked: usize,
    pub frames_skipped: usize,
    pub cells_detected: usize,
    pub tracks: usize,
    pub rows: usize,
    pub rows_persisted: usize,
    /// Storm id to projected trajectory
    pub trajectories: BTreeMap<String, Vec<TrajectoryPoint>>,
}

/// A frame whose name parsed, waiting for detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRef {
    pub timestamp: NaiveDateTime,
    pub key: String,
}

/// Parse, filter and order listed keys
///
/// Returns frames in increasing timestamp order plus the frame keys that were
/// rejected. Objects without the frame extension are ignored and not counted
/// as rejected. Of two frames with the same timestamp the first listed wins.
pub fn order_frames(keys: Vec<String>, date: NaiveDate) -> (Vec<FrameRef>, Vec<String>) {
    let mut frames = Vec::with_capacity(keys.len());
    let mut rejected = Vec::new();

    for key in keys {
        if !key.ends_with(FRAME_EXTENSION) {
            debug!("Ignoring non-frame object {}", key);
            continue;
        }
        match naming::parse_frame_timestamp(&key, date) {
            Ok(timestamp) => frames.push(FrameRef { timestamp, key }),
            Err(e) => {
                warn!("Skipping {}: {}", key, e);
                rejected.push(key);
            }
        }
    }

    frames.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    let mut ordered: Vec<FrameRef> = Vec::with_capacity(frames.len());
    for frame in frames {
        match ordered.last() {
            Some(prev) if prev.timestamp == frame.timestamp => {
                warn!("Skipping {}: duplicate of {}", frame.key, prev.key);
                rejected.push(frame.key);
            }
            _ => ordered.push(frame),
        }
    }

    (ordered, rejected)
}

struct DetectedFrame {
    frame: FrameRef,
    result: PipelineResult<(Vec<DetectedCell>, f64)>,
}

/// Runs one (range, date) session end to end
pub struct SessionDriver {
    range: RadarRange,
    date: NaiveDate,
    config: Arc<PipelineConfig>,
    engine: Arc<CvEngine>,
    store: Arc<dyn ObjectStore>,
    db: Option<Arc<DbClient>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl SessionDriver {
    pub fn new(
        range: RadarRange,
        date: NaiveDate,
        config: Arc<PipelineConfig>,
        engine: Arc<CvEngine>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            range,
            date,
            config,
            engine,
            store,
            db: None,
            metrics: None,
        }
    }

    pub fn with_database(mut self, db: Option<Arc<DbClient>>) -> Self {
        self.db = db;
        self
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<MetricsCollector>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Run the session
    ///
    /// This method:
    /// 1. Lists the session's frames (a listing failure aborts the session)
    /// 2. Orders frames by the timestamp in their names
    /// 3. Detects cells ahead of need on the blocking pool
    /// 4. Feeds each frame to the track manager strictly in order
    /// 5. Writes the session and snapshot exports and persists rows
    pub async fn run(self) -> PipelineResult<SessionReport> {
        let label = self.range.label().to_string();
        let prefix = naming::session_prefix(&self.config.detection_input, &self.range, self.date);
        info!("Starting session {} {} from {}", label, self.date, prefix);

        let keys = self.store.list(&prefix).await.map_err(|e| match e {
            PipelineError::Listing { .. } => e,
            other => PipelineError::listing(&prefix, other),
        })?;

        let mut report = SessionReport {
            radar_range: label.clone(),
            date: Some(self.date),
            frames_listed: keys.len(),
            ..Default::default()
        };

        let (frames, rejected) = order_frames(keys, self.date);
        report.frames_skipped += rejected.len();
        for _ in &rejected {
            self.record_skip(SkipReason::BadName);
        }
        info!("{} {}: {} frames to track", label, self.date, frames.len());

        let mut session = self.engine.start_session(self.range.clone(), self.date);
        let mut detections = self.detect_ahead(frames);

        while let Some(DetectedFrame { frame, result }) = detections.next().await {
            let (cells, detection_secs) = match result {
                Ok(detected) => detected,
                Err(e) => {
                    let reason = if e.is_not_found() {
                        SkipReason::NotFound
                    } else {
                        SkipReason::Decode
                    };
                    warn!("Skipping frame {}: {}", frame.key, e);
                    self.record_skip(reason);
                    report.frames_skipped += 1;
                    continue;
                }
            };

            if let Some(metrics) = &self.metrics {
                metrics.record_frame(&label, detection_secs, cells.len() as u64);
            }
            report.cells_detected += cells.len();

            if self.config.export_cells && !cells.is_empty() {
                self.export_cells(frame.timestamp, &cells).await;
            }

            let step = self
                .engine
                .manager()
                .step(&mut session, frame.timestamp, cells)?;
            if let Some(metrics) = &self.metrics {
                metrics.record_track_changes(&label, step.created as u64, step.expired as u64);
            }
            debug!(
                "{} {}: {} cells, {} matched, {} new, {} missed",
                label, frame.timestamp, step.detections, step.matched, step.created, step.missed
            );
            report.frames_tracked += 1;
        }

        let rows = session.rows();
        report.tracks = session.tracks().len();
        report.rows = rows.len();
        report.trajectories = session.trajectories(&self.config.geometry.sensor(&self.range)?);

        if rows.is_empty() {
            info!("{} {}: no storms tracked", label, self.date);
        } else {
            self.export_session(&rows).await?;
            report.rows_persisted = self.persist(&rows).await;
        }

        info!(
            "Finished session {} {}: {} frames, {} storms, {} rows",
            label, self.date, report.frames_tracked, report.tracks, report.rows
        );
        Ok(report)
    }

    /// Ordered stream of detection results with a bounded prefetch window
    fn detect_ahead(
        &self,
        frames: Vec<FrameRef>,
    ) -> BoxStream<'static, DetectedFrame> {
        let prefetch = self.config.prefetch_frames.max(1);
        let store = self.store.clone();
        let detector: CellDetector = self.engine.detector().clone();
        let range = self.range.clone();

        stream::iter(frames.into_iter().map(move |frame| {
            let store = store.clone();
            let detector = detector.clone();
            let range = range.clone();
            async move {
                let result = detect_frame(store, detector, range, &frame).await;
                DetectedFrame { frame, result }
            }
        }))
        .buffered(prefetch)
        .boxed()
    }

    async fn export_cells(&self, timestamp: NaiveDateTime, cells: &[DetectedCell]) {
        let key = naming::cell_export_key(&self.config.detection_output, &self.range, timestamp);
        let written = match export::cells_csv(cells) {
            Ok(bytes) => self.store.put(&key, bytes).await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => debug!("Wrote {} cells to {}", cells.len(), key),
            Err(e) => warn!("Failed to export cells to {}: {}", key, e),
        }
    }

    async fn export_session(&self, rows: &[storm_core::TrackedCellRow]) -> PipelineResult<()> {
        let root = &self.config.tracking_output;
        let key = naming::session_export_key(root, &self.range, self.date);
        self.store.put(&key, export::tracked_csv(rows)?).await?;
        info!("Wrote {} tracked rows to {}", rows.len(), key);

        if self.config.export_snapshots {
            let interval = self.engine.config().tracking.frame_interval_minutes;
            for (bucket, group) in export::snapshot_groups(rows, interval) {
                let key = naming::snapshot_export_key(root, &self.range, bucket);
                self.store.put(&key, export::tracked_csv(&group)?).await?;
                debug!("Wrote {} tracked rows to {}", group.len(), key);
            }
        }
        Ok(())
    }

    async fn persist(&self, rows: &[storm_core::TrackedCellRow]) -> usize {
        let Some(db) = &self.db else {
            return 0;
        };
        match db.storms().insert_rows(rows).await {
            Ok(count) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_rows_persisted(count as u64);
                }
                count
            }
            Err(e) => {
                warn!("Failed to persist tracked storms: {}", e);
                if let Some(metrics) = &self.metrics {
                    metrics.record_persist_failure();
                }
                0
            }
        }
    }

    fn record_skip(&self, reason: SkipReason) {
        if let Some(metrics) = &self.metrics {
            metrics.record_skipped_frame(self.range.label(), reason);
        }
    }
}

async fn detect_frame(
    store: Arc<dyn ObjectStore>,
    detector: CellDetector,
    range: RadarRange,
    frame: &FrameRef,
) -> PipelineResult<(Vec<DetectedCell>, f64)> {
    let bytes = store.get(&frame.key).await?;
    let timestamp = frame.timestamp;

    tokio::task::spawn_blocking(move || {
        let started = Instant::now();
        let cells = detector.detect_encoded(&bytes, &range, timestamp)?;
        Ok((cells, started.elapsed().as_secs_f64()))
    })
    .await
    .map_err(|e| PipelineError::Task(e.to_string()))?
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LocalObjectStore, MockObjectStore};
    use crate::testing::{frame_png, session_date};

    fn driver(store: Arc<dyn ObjectStore>) -> SessionDriver {
        SessionDriver::new(
            RadarRange::parse("70km").unwrap(),
            session_date(),
            Arc::new(PipelineConfig::default()),
            Arc::new(CvEngine::new().unwrap()),
            store,
        )
    }

    #[test]
    fn test_order_frames() {
        let keys = vec![
            "p/radar_70km_20241103_0910.png".to_string(),
            "p/radar_70km_20241103_0900.png".to_string(),
            "p/radar_70km_bad.png".to_string(),
            "p/notes.txt".to_string(),
            "p/copy_70km_20241103_0900.png".to_string(),
        ];
        let (frames, rejected) = order_frames(keys, session_date());

        let ordered: Vec<&str> = frames.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(
            ordered,
            vec!["p/radar_70km_20241103_0900.png", "p/radar_70km_20241103_0910.png"]
        );
        assert_eq!(
            rejected,
            vec!["p/radar_70km_bad.png", "p/copy_70km_20241103_0900.png"]
        );
        assert!(frames.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_session_tracks_moving_storm() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalObjectStore::new(dir.path()));
        for (minute, x) in [(0, 50), (5, 52), (10, 54)] {
            let key = format!("bronze/radar/70km/20241103/radar_70km_20241103_09{:02}.png", minute);
            store.put(&key, frame_png(&[(x, 60)])).await.unwrap();
        }

        let report = driver(store.clone()).run().await.unwrap();

        assert_eq!(report.frames_listed, 3);
        assert_eq!(report.frames_tracked, 3);
        assert_eq!(report.frames_skipped, 0);
        assert_eq!(report.tracks, 1);
        assert_eq!(report.rows, 3);
        assert_eq!(report.trajectories["1_20241103"].len(), 3);

        let session_csv = store
            .get("silver/tracked_storms/tracked_storms_70km_20241103.csv")
            .await
            .unwrap();
        assert_eq!(String::from_utf8(session_csv).unwrap().lines().count(), 4);
        assert!(store
            .get("silver/storm_cells/storm_cells_70km_20241103_0905.csv")
            .await
            .is_ok());
        assert!(store
            .get("silver/tracked_storms/tracked_storms_70km_20241103_0910.csv")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_non_frame_objects_are_not_skipped_frames() {
        let mut store = MockObjectStore::new();
        store.expect_list().returning(|prefix| {
            Ok(vec![
                format!("{}/notes.txt", prefix),
                format!("{}/radar_70km_20241103_0900.png", prefix),
                format!("{}/radar_70km_garbled.png", prefix),
                format!("{}/radar_70km_20241103_0905.png", prefix),
            ])
        });
        store.expect_get().returning(|_| Ok(frame_png(&[(40, 40)])));
        store.expect_put().returning(|_, _| Ok(()));

        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let report = driver(Arc::new(store))
            .with_metrics(Some(metrics.clone()))
            .run()
            .await
            .unwrap();

        assert_eq!(report.frames_tracked, 2);
        assert_eq!(report.frames_skipped, 1);
        let export = metrics.render().unwrap();
        assert!(export.contains(
            "storm_frames_skipped_total{radar_range=\"70km\",reason=\"bad_name\"} 1"
        ));
    }

    #[tokio::test]
    async fn test_storm_on_left_edge_joins_one_track() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalObjectStore::new(dir.path()));
        for (minute, x) in [(0, 0), (5, 0), (10, 2)] {
            let key = format!("bronze/radar/70km/20241103/radar_70km_20241103_11{:02}.png", minute);
            store.put(&key, frame_png(&[(x, 0)])).await.unwrap();
        }

        let report = driver(store.clone()).run().await.unwrap();

        assert_eq!(report.frames_tracked, 3);
        assert_eq!(report.cells_detected, 3);
        assert_eq!(report.tracks, 1);
        let trajectory = &report.trajectories["1_20241103"];
        let xs: Vec<u32> = trajectory.iter().map(|p| p.x_px).collect();
        assert_eq!(xs, vec![3, 3, 5]);
        assert!(trajectory.iter().all(|p| p.y_px == 3));

        let session_csv = store
            .get("silver/tracked_storms/tracked_storms_70km_20241103.csv")
            .await
            .unwrap();
        let text = String::from_utf8(session_csv).unwrap();
        assert!(text.contains("1_20241103,2024-11-03 11:00,70.0,3,3,6,6,25,"));
    }

    #[tokio::test]
    async fn test_missing_frame_is_skipped() {
        let mut store = MockObjectStore::new();
        store.expect_list().returning(|prefix| {
            Ok((0..3)
                .map(|i| format!("{}/radar_70km_20241103_09{:02}.png", prefix, i * 5))
                .collect())
        });
        store.expect_get().returning(|key| {
            if key.ends_with("0905.png") {
                Err(PipelineError::not_found(key))
            } else {
                Ok(frame_png(&[(40, 40)]))
            }
        });
        store.expect_put().returning(|_, _| Ok(()));

        let report = driver(Arc::new(store)).run().await.unwrap();

        assert_eq!(report.frames_tracked, 2);
        assert_eq!(report.frames_skipped, 1);
        assert_eq!(report.tracks, 1);
        assert_eq!(report.rows, 2);
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_skipped() {
        let mut store = MockObjectStore::new();
        store.expect_list().returning(|prefix| {
            Ok(vec![
                format!("{}/radar_70km_20241103_0900.png", prefix),
                format!("{}/radar_70km_20241103_0905.png", prefix),
            ])
        });
        store.expect_get().returning(|key| {
            if key.ends_with("0900.png") {
                Ok(b"not an image".to_vec())
            } else {
                Ok(frame_png(&[(40, 40)]))
            }
        });
        store.expect_put().returning(|_, _| Ok(()));

        let report = driver(Arc::new(store)).run().await.unwrap();
        assert_eq!(report.frames_skipped, 1);
        assert_eq!(report.frames_tracked, 1);
    }

    #[tokio::test]
    async fn test_listing_failure_is_fatal() {
        let mut store = MockObjectStore::new();
        store
            .expect_list()
            .returning(|_| Err(PipelineError::store("bucket unavailable")));

        let result = driver(Arc::new(store)).run().await;
        assert!(matches!(result, Err(PipelineError::Listing { .. })));
    }

    #[tokio::test]
    async fn test_empty_session_writes_nothing() {
        let mut store = MockObjectStore::new();
        store.expect_list().returning(|_| Ok(Vec::new()));
        store.expect_put().never();

        let report = driver(Arc::new(store)).run().await.unwrap();
        assert_eq!(report.tracks, 0);
        assert!(report.trajectories.is_empty());
    }
}
