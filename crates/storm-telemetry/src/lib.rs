//! # Storm Telemetry - Metrics
//!
//! Prometheus metrics for the storm tracking pipeline:
//! - Frames processed and skipped
//! - Cell detections and detection latency
//! - Track lifecycle
//! - Session outcomes and persistence

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use tracing::info;

/// Why a frame did not reach the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Object name has no parseable timestamp
    BadName,
    /// Object missing or unreadable
    NotFound,
    /// Bytes are not a decodable image
    Decode,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadName => "bad_name",
            Self::NotFound => "not_found",
            Self::Decode => "decode",
        }
    }
}

/// Metrics collector for the storm tracking pipeline
pub struct MetricsCollector {
    registry: Registry,

    // Frame metrics
    frames_processed: IntCounterVec,
    frames_skipped: IntCounterVec,
    detection_latency: Histogram,

    // Tracking metrics
    cells_detected: IntCounterVec,
    tracks_created: IntCounterVec,
    tracks_expired: IntCounterVec,

    // Session metrics
    sessions_completed: IntCounterVec,
    sessions_failed: IntCounterVec,
    rows_persisted: IntCounter,
    persist_failures: IntCounter,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let frames_processed = IntCounterVec::new(
            Opts::new("storm_frames_processed_total", "Frames fed to the tracker"),
            &["radar_range"],
        )?;
        registry.register(Box::new(frames_processed.clone()))?;

        let frames_skipped = IntCounterVec::new(
            Opts::new("storm_frames_skipped_total", "Frames skipped before tracking"),
            &["radar_range", "reason"],
        )?;
        registry.register(Box::new(frames_skipped.clone()))?;

        let detection_latency = Histogram::with_opts(
            HistogramOpts::new("storm_detection_seconds", "Cell detection time per frame")
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        )?;
        registry.register(Box::new(detection_latency.clone()))?;

        let cells_detected = IntCounterVec::new(
            Opts::new("storm_cells_detected_total", "Storm cells detected"),
            &["radar_range"],
        )?;
        registry.register(Box::new(cells_detected.clone()))?;

        let tracks_created = IntCounterVec::new(
            Opts::new("storm_tracks_created_total", "Storm tracks started"),
            &["radar_range"],
        )?;
        registry.register(Box::new(tracks_created.clone()))?;

        let tracks_expired = IntCounterVec::new(
            Opts::new("storm_tracks_expired_total", "Storm tracks expired"),
            &["radar_range"],
        )?;
        registry.register(Box::new(tracks_expired.clone()))?;

        let sessions_completed = IntCounterVec::new(
            Opts::new("storm_sessions_completed_total", "Tracking sessions completed"),
            &["radar_range"],
        )?;
        registry.register(Box::new(sessions_completed.clone()))?;

        let sessions_failed = IntCounterVec::new(
            Opts::new("storm_sessions_failed_total", "Tracking sessions aborted"),
            &["radar_range"],
        )?;
        registry.register(Box::new(sessions_failed.clone()))?;

        let rows_persisted = IntCounter::new(
            "storm_rows_persisted_total",
            "Tracked storm rows submitted to the database",
        )?;
        registry.register(Box::new(rows_persisted.clone()))?;

        let persist_failures = IntCounter::new(
            "storm_persist_failures_total",
            "Sessions whose rows could not be persisted",
        )?;
        registry.register(Box::new(persist_failures.clone()))?;

        info!("Metrics collector initialized");

        Ok(Self {
            registry,
            frames_processed,
            frames_skipped,
            detection_latency,
            cells_detected,
            tracks_created,
            tracks_expired,
            sessions_completed,
            sessions_failed,
            rows_persisted,
            persist_failures,
        })
    }

    /// Get Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Export metrics in Prometheus text format
    pub fn render(&self) -> prometheus::Result<String> {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    // ========================================================================
    // FRAME METRICS
    // ========================================================================

    /// Record a frame that reached the tracker
    pub fn record_frame(&self, radar_range: &str, detection_secs: f64, cells: u64) {
        self.frames_processed.with_label_values(&[radar_range]).inc();
        self.cells_detected.with_label_values(&[radar_range]).inc_by(cells);
        self.detection_latency.observe(detection_secs);
    }

    pub fn record_skipped_frame(&self, radar_range: &str, reason: SkipReason) {
        self.frames_skipped
            .with_label_values(&[radar_range, reason.as_str()])
            .inc();
    }

    // ========================================================================
    // TRACKING METRICS
    // ========================================================================

    pub fn record_track_changes(&self, radar_range: &str, created: u64, expired: u64) {
        self.tracks_created.with_label_values(&[radar_range]).inc_by(created);
        self.tracks_expired.with_label_values(&[radar_range]).inc_by(expired);
    }

    // ========================================================================
    // SESSION METRICS
    // ========================================================================

    pub fn record_session(&self, radar_range: &str, success: bool) {
        if success {
            self.sessions_completed.with_label_values(&[radar_range]).inc();
        } else {
            self.sessions_failed.with_label_values(&[radar_range]).inc();
        }
    }

    pub fn record_rows_persisted(&self, rows: u64) {
        self.rows_persisted.inc_by(rows);
    }

    pub fn record_persist_failure(&self) {
        self.persist_failures.inc();
    }
}

// ============================================================================
// TESTS
// ============================================================================
