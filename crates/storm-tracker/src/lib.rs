//! # Storm Tracker - Session Orchestration
//!
//! Runs one tracking session per (radar range, date) over frames held in an
//! object store. Sessions for different ranges run as independent tokio
//! tasks; within a session frames are detected ahead of need and tracked
//! strictly in timestamp order.

pub mod error;
pub mod export;
pub mod session;
pub mod store;

pub use error::{PipelineError, PipelineResult};
pub use session::{SessionDriver, SessionReport};
pub use store::{LocalObjectStore, ObjectStore};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storm_core::{GeoPosition, RadarRange, SensorGeometry};
use storm_cv::{CvConfig, CvEngine};
use storm_db::DbClient;
use storm_telemetry::MetricsCollector;
use tracing::{error, info};

/// Sensor geometry shared by all radar ranges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    pub center_latitude: f64,
    pub center_longitude: f64,
    /// Frame size used for trajectory projection
    pub width_px: u32,
    pub height_px: u32,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        let geometry = SensorGeometry::default();
        Self {
            center_latitude: geometry.center.latitude,
            center_longitude: geometry.center.longitude,
            width_px: geometry.width_px,
            height_px: geometry.height_px,
        }
    }
}

impl GeometryConfig {
    /// Geometry of one radar range
    pub fn sensor(&self, range: &RadarRange) -> storm_core::CoreResult<SensorGeometry> {
        SensorGeometry::new(
            GeoPosition::new(self.center_latitude, self.center_longitude),
            range.km(),
            self.width_px,
            self.height_px,
        )
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Radar range labels, e.g. `70km`
    pub radar_ranges: Vec<String>,
    /// Root of `{range}/{YYYYMMDD}/*.png` frames
    pub detection_input: String,
    /// Root of per-frame cell exports
    pub detection_output: String,
    /// Root of tracked storm exports
    pub tracking_output: String,
    /// Frames detected ahead of the tracker
    pub prefetch_frames: usize,
    pub export_cells: bool,
    pub export_snapshots: bool,
    pub geometry: GeometryConfig,
    pub cv: CvConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            radar_ranges: vec!["70km".to_string()],
            detection_input: "bronze/radar".to_string(),
            detection_output: "silver/storm_cells".to_string(),
            tracking_output: "silver/tracked_storms".to_string(),
            prefetch_frames: 4,
            export_cells: true,
            export_snapshots: true,
            geometry: GeometryConfig::default(),
            cv: CvConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn ranges(&self) -> PipelineResult<Vec<RadarRange>> {
        if self.radar_ranges.is_empty() {
            return Err(PipelineError::invalid_config("no radar ranges configured"));
        }
        self.radar_ranges
            .iter()
            .map(|label| RadarRange::parse(label).map_err(PipelineError::from))
            .collect()
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let ranges = self.ranges()?;
        if self.prefetch_frames == 0 {
            return Err(PipelineError::invalid_config("prefetch_frames must be positive"));
        }
        for range in &ranges {
            self.geometry.sensor(range)?;
        }
        self.cv.validate()?;
        Ok(())
    }
}

/// Outcome of one range's session
#[derive(Debug)]
pub struct RangeOutcome {
    pub radar_range: String,
    pub result: PipelineResult<SessionReport>,
}

/// Outcome of all sessions for one date
#[derive(Debug)]
pub struct DateReport {
    pub date: NaiveDate,
    pub sessions: Vec<RangeOutcome>,
}

impl DateReport {
    pub fn succeeded(&self) -> usize {
        self.sessions.iter().filter(|s| s.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.sessions.len() - self.succeeded()
    }
}

/// Entry point running every configured range for a date
pub struct StormPipeline {
    config: Arc<PipelineConfig>,
    engine: Arc<CvEngine>,
    store: Arc<dyn ObjectStore>,
    /// Database client (optional)
    db: Option<Arc<DbClient>>,
    /// Metrics collector (optional)
    metrics: Option<Arc<MetricsCollector>>,
}

impl StormPipeline {
    pub fn new(config: PipelineConfig, store: Arc<dyn ObjectStore>) -> PipelineResult<Self> {
        config.validate()?;
        info!("Initializing storm pipeline for ranges {:?}", config.radar_ranges);

        let engine = CvEngine::with_config(config.cv.clone())?;
        Ok(Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
            store,
            db: None,
            metrics: None,
        })
    }

    /// Set database client
    pub fn set_database(&mut self, db: Arc<DbClient>) {
        self.db = Some(db);
    }

    /// Set metrics collector
    pub fn set_metrics(&mut self, metrics: Arc<MetricsCollector>) {
        self.metrics = Some(metrics);
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Track every configured range for `date`
    ///
    /// Each range runs as its own task; a failed session does not affect the
    /// others.
    pub async fn process_date(&self, date: NaiveDate) -> PipelineResult<DateReport> {
        let ranges = self.config.ranges()?;
        info!("Processing {} for {} ranges", date, ranges.len());

        let handles: Vec<_> = ranges
            .into_iter()
            .map(|range| {
                let label = range.label().to_string();
                let driver = SessionDriver::new(
                    range,
                    date,
                    self.config.clone(),
                    self.engine.clone(),
                    self.store.clone(),
                )
                .with_database(self.db.clone())
                .with_metrics(self.metrics.clone());
                (label, tokio::spawn(driver.run()))
            })
            .collect();

        let mut sessions = Vec::with_capacity(handles.len());
        for (label, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(PipelineError::Task(e.to_string())),
            };
            if let Err(e) = &result {
                error!("Session {} {} failed: {}", label, date, e);
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_session(&label, result.is_ok());
            }
            sessions.push(RangeOutcome {
                radar_range: label,
                result,
            });
        }

        let report = DateReport { date, sessions };
        info!(
            "Finished {}: {} sessions succeeded, {} failed",
            date,
            report.succeeded(),
            report.failed()
        );
        Ok(report)
    }
}


// ============================================================================
// TESTS
// ============================================================================
