//! Configuration for the CV module

use crate::{CvError, CvResult};
use serde::{Deserialize, Serialize};

/// Configuration for detection and tracking
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CvConfig {
    /// Storm cell detection settings
    pub detection: DetectionConfig,
    /// Tracking settings
    pub tracking: TrackingConfig,
}

/// Storm cell detection configuration
///
/// Hue is on the 8-bit 0..=179 scale, saturation and value on 0..=255.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum saturation of a precipitation pixel
    pub saturation_min: u8,
    /// Minimum value (brightness) of a precipitation pixel
    pub value_min: u8,
    /// Percentile of valid hues bounding the red band from above
    pub hue_percentile_low: f64,
    /// Percentile of valid hues bounding the purple band from below
    pub hue_percentile_high: f64,
    /// Cyan (light rain) exclusion band
    pub cyan_hue_min: u8,
    pub cyan_hue_max: u8,
    /// Minimum contour area in square pixels
    pub min_area_px: f64,
    /// Square kernel size for opening + dilation, 0 disables cleanup
    pub morph_kernel: u8,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            saturation_min: 60,
            value_min: 60,
            hue_percentile_low: 12.0,
            hue_percentile_high: 82.0,
            cyan_hue_min: 90,
            cyan_hue_max: 125,
            min_area_px: 1.0,
            morph_kernel: 0,
        }
    }
}

/// Tracking configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Frame interval in minutes, used by the motion model and for expiry
    pub frame_interval_minutes: i64,
    /// Frame intervals a track may go unseen before it expires
    pub max_missed: u32,
    /// Maximum (x, y, area) distance accepted as a match
    pub gate_distance: f64,
    /// Kalman filter process noise
    pub process_noise: f64,
    /// Kalman filter measurement noise
    pub measurement_noise: f64,
    /// Initial state covariance scale
    pub initial_covariance: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            frame_interval_minutes: storm_core::FRAME_INTERVAL_MINUTES,
            max_missed: 2,
            gate_distance: 20.0,
            process_noise: 0.01,
            measurement_noise: 10.0,
            initial_covariance: 100.0,
        }
    }
}

impl TrackingConfig {
    /// Longest gap since a track was last seen before it expires
    pub fn expiry_gap(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.frame_interval_minutes * self.max_missed as i64)
    }
}

impl CvConfig {
    /// Detection with speckle cleanup enabled
    pub fn with_cleanup(kernel: u8) -> Self {
        Self {
            detection: DetectionConfig {
                morph_kernel: kernel,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Check value ranges that would make detection or tracking meaningless
    pub fn validate(&self) -> CvResult<()> {
        let d = &self.detection;
        let percentiles = 0.0..=100.0;
        if !percentiles.contains(&d.hue_percentile_low) || !percentiles.contains(&d.hue_percentile_high) {
            return Err(CvError::invalid_config("hue percentiles must be within 0..=100"));
        }
        if d.hue_percentile_low > d.hue_percentile_high {
            return Err(CvError::invalid_config(
                "hue_percentile_low must not exceed hue_percentile_high",
            ));
        }
        if d.cyan_hue_min > d.cyan_hue_max {
            return Err(CvError::invalid_config("cyan_hue_min must not exceed cyan_hue_max"));
        }
        if !(d.min_area_px >= 0.0) {
            return Err(CvError::invalid_config("min_area_px must be non-negative"));
        }

        let t = &self.tracking;
        if t.frame_interval_minutes <= 0 {
            return Err(CvError::invalid_config("frame_interval_minutes must be positive"));
        }
        if !(t.gate_distance > 0.0) {
            return Err(CvError::invalid_config("gate_distance must be positive"));
        }
        if !(t.process_noise > 0.0 && t.measurement_noise > 0.0 && t.initial_covariance > 0.0) {
            return Err(CvError::invalid_config("noise and covariance scales must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(CvConfig::default().validate().is_ok());
        assert!(CvConfig::with_cleanup(3).validate().is_ok());
    }

    #[test]
    fn test_measurement_noise_exceeds_process_noise() {
        let t = TrackingConfig::default();
        assert!(t.measurement_noise > t.process_noise);
        assert_eq!(t.expiry_gap(), chrono::Duration::minutes(10));
    }

    #[test]
    fn test_invalid_percentiles_rejected() {
        let mut config = CvConfig::default();
        config.detection.hue_percentile_low = 90.0;
        config.detection.hue_percentile_high = 10.0;
        assert!(config.validate().is_err());

        config.detection.hue_percentile_low = 12.0;
        config.detection.hue_percentile_high = 120.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_gate_rejected() {
        let mut config = CvConfig::default();
        config.tracking.gate_distance = 0.0;
        assert!(matches!(config.validate(), Err(CvError::InvalidConfig(_))));
    }
}
