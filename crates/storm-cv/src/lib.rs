//! # Storm CV - Detection and Tracking
//!
//! Image-based storm cell detection and multi-object tracking on radar
//! reflectivity frames.
//!
//! ## Pipeline
//!
//! 1. Convert the frame to HSV and keep saturated, bright precipitation pixels
//! 2. Derive per-frame red and purple hue bands from hue percentiles
//! 3. Extract outer contours of the intense-precipitation mask as cells
//! 4. Associate cells with Kalman-predicted tracks (Hungarian, gated)
//! 5. Expire tracks unseen for longer than the configured gap

pub mod association;
pub mod config;
pub mod detector;
pub mod error;
pub mod kalman;
pub mod tracker;

pub use config::{CvConfig, DetectionConfig, TrackingConfig};
pub use detector::{CellDetector, HueBands};
pub use error::{CvError, CvResult};
pub use kalman::{Correction, KalmanTracker};
pub use tracker::{StepReport, StormTrack, TrackManager, TrackStatus, TrackingSession};

use chrono::{NaiveDate, NaiveDateTime};
use storm_core::{DetectedCell, RadarRange};
use tracing::info;

/// Detector and track manager sharing one validated configuration
#[derive(Debug, Clone)]
pub struct CvEngine {
    config: CvConfig,
    detector: CellDetector,
    manager: TrackManager,
}

impl CvEngine {
    /// Create an engine with the default configuration
    pub fn new() -> CvResult<Self> {
        Self::with_config(CvConfig::default())
    }

    /// Create an engine with a custom configuration
    pub fn with_config(config: CvConfig) -> CvResult<Self> {
        config.validate()?;
        info!(
            "Initializing CV engine (gate {:.1}, max missed {}, kernel {})",
            config.tracking.gate_distance, config.tracking.max_missed, config.detection.morph_kernel
        );

        Ok(Self {
            detector: CellDetector::new(config.detection.clone()),
            manager: TrackManager::new(config.tracking.clone()),
            config,
        })
    }

    pub fn config(&self) -> &CvConfig {
        &self.config
    }

    pub fn detector(&self) -> &CellDetector {
        &self.detector
    }

    pub fn manager(&self) -> &TrackManager {
        &self.manager
    }

    /// Open an empty tracking session
    pub fn start_session(&self, range: RadarRange, date: NaiveDate) -> TrackingSession {
        TrackingSession::new(range, date)
    }

    /// Detect cells in an encoded frame and feed them to the session
    ///
    /// Returns the detections alongside the step outcome.
    pub fn process_frame(
        &self,
        session: &mut TrackingSession,
        encoded: &[u8],
        timestamp: NaiveDateTime,
    ) -> CvResult<(Vec<DetectedCell>, StepReport)> {
        let cells = self.detector.detect_encoded(encoded, session.range(), timestamp)?;
        let report = self.manager.step(session, timestamp, cells.clone())?;
        Ok((cells, report))
    }
}

// ============================================================================
// TESTS
// ============================================================================
