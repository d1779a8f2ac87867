//! Sensor geometry: pixel to physical unit conversion
//!
//! Radar composites are square footprints of `2 * range_km` on each side,
//! rendered into an image of `width_px x height_px`. All conversions here are
//! closed-form and side-effect free.

use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Kilometres per degree of latitude
pub const KM_PER_DEGREE: f64 = 111.0;

/// Geographic position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPosition {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// Fixed geometry of one radar product
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorGeometry {
    /// Radar site position (image center)
    pub center: GeoPosition,
    /// Radar range in kilometres (half the footprint width)
    pub range_km: f64,
    /// Image width in pixels
    pub width_px: u32,
    /// Image height in pixels
    pub height_px: u32,
}

impl Default for SensorGeometry {
    fn default() -> Self {
        Self {
            center: GeoPosition::new(1.3521, 103.8198),
            range_km: 70.0,
            width_px: 217,
            height_px: 120,
        }
    }
}

impl SensorGeometry {
    pub fn new(center: GeoPosition, range_km: f64, width_px: u32, height_px: u32) -> CoreResult<Self> {
        if !(range_km.is_finite() && range_km > 0.0) {
            return Err(CoreError::InvalidGeometry(format!("range_km={range_km}")));
        }
        if width_px == 0 || height_px == 0 {
            return Err(CoreError::InvalidGeometry(format!(
                "image size {width_px}x{height_px}"
            )));
        }
        Ok(Self {
            center,
            range_km,
            width_px,
            height_px,
        })
    }

    /// Same sensor, different image dimensions
    pub fn with_image_size(mut self, width_px: u32, height_px: u32) -> Self {
        self.width_px = width_px;
        self.height_px = height_px;
        self
    }

    /// Kilometres covered by one pixel along (x, y)
    pub fn km_per_pixel(&self) -> (f64, f64) {
        (
            (2.0 * self.range_km) / self.width_px as f64,
            (2.0 * self.range_km) / self.height_px as f64,
        )
    }

    /// Physical area of `area_px` square pixels in km²
    pub fn area_km2(&self, area_px: f64) -> f64 {
        pixels_to_km2(area_px, self.range_km, self.width_px, self.height_px)
    }

    /// Project a pixel coordinate onto latitude/longitude
    ///
    /// Uses a flat linear offset from the radar site: 111 km per degree of
    /// latitude and `111 * cos(lat_center)` km per degree of longitude.
    pub fn pixel_to_geo(&self, x_px: f64, y_px: f64) -> GeoPosition {
        let (kx, ky) = self.km_per_pixel();
        let dx_km = (x_px - self.width_px as f64 / 2.0) * kx;
        let dy_km = (y_px - self.height_px as f64 / 2.0) * ky;

        let delta_lat = dy_km / KM_PER_DEGREE;
        let delta_lon = dx_km / (KM_PER_DEGREE * self.center.latitude.to_radians().cos());

        GeoPosition::new(
            self.center.latitude + delta_lat,
            self.center.longitude + delta_lon,
        )
    }
}

/// Approximate physical area in km² of a pixel area
pub fn pixels_to_km2(area_px: f64, range_km: f64, width_px: u32, height_px: u32) -> f64 {
    let km_per_pixel_x = (2.0 * range_km) / width_px as f64;
    let km_per_pixel_y = (2.0 * range_km) / height_px as f64;
    area_px * km_per_pixel_x * km_per_pixel_y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_area_closed_form() {
        let area = pixels_to_km2(100.0, 70.0, 217, 120);
        let expected = 100.0 * (140.0 / 217.0) * (140.0 / 120.0);
        assert!((area - expected).abs() < 1e-12);
        // deterministic across calls
        assert_eq!(area, pixels_to_km2(100.0, 70.0, 217, 120));
    }

    #[test]
    fn test_geometry_area_matches_free_function() {
        let geometry = SensorGeometry::default();
        assert_eq!(geometry.area_km2(42.5), pixels_to_km2(42.5, 70.0, 217, 120));
    }

    #[test]
    fn test_center_pixel_projects_to_site() {
        let geometry = SensorGeometry::default();
        let pos = geometry.pixel_to_geo(108.5, 60.0);
        assert!((pos.latitude - 1.3521).abs() < 1e-12);
        assert!((pos.longitude - 103.8198).abs() < 1e-12);
    }

    #[test]
    fn test_pixel_offset_projection() {
        let geometry = SensorGeometry::default();
        let pos = geometry.pixel_to_geo(108.5 + 10.0, 60.0 + 6.0);

        let (kx, ky) = geometry.km_per_pixel();
        let expected_lat = 1.3521 + 6.0 * ky / 111.0;
        let expected_lon = 103.8198 + 10.0 * kx / (111.0 * 1.3521_f64.to_radians().cos());
        assert!((pos.latitude - expected_lat).abs() < 1e-12);
        assert!((pos.longitude - expected_lon).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        let center = GeoPosition::new(0.0, 0.0);
        assert!(SensorGeometry::new(center, 0.0, 100, 100).is_err());
        assert!(SensorGeometry::new(center, 70.0, 0, 100).is_err());
        assert!(SensorGeometry::new(center, 70.0, 217, 120).is_ok());
    }
}
