//! Storm cell detection using adaptive hue segmentation
//!
//! Heavy precipitation is rendered in reds and purples on radar composites,
//! light rain in cyan. Because the color scale drifts between products, the
//! red and purple bands are derived per image from the hue distribution of
//! the saturated pixels rather than fixed cut-offs.

use crate::config::DetectionConfig;
use crate::CvResult;
use chrono::NaiveDateTime;
use image::{GrayImage, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::morphology::{grayscale_dilate, grayscale_open, Mask};
use storm_core::{pixels_to_km2, DetectedCell, RadarRange};
use tracing::{debug, trace};

/// Largest hue on the 8-bit scale
const HUE_MAX: u8 = 179;
/// Bounds applied to the adaptive red band
const RED_MAX_FLOOR: i32 = 5;
const RED_MAX_CEIL: i32 = 25;
/// Minimum separation between the red and purple bands
const BAND_SEPARATION: i32 = 10;
const PURPLE_MIN_CEIL: i32 = 170;

const MASK_ON: u8 = 255;

/// Storm cell detector
#[derive(Debug, Clone, Default)]
pub struct CellDetector {
    config: DetectionConfig,
}

/// Hue bands classified as heavy precipitation for one image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HueBands {
    /// Upper bound (inclusive) of the red band `[0, red_max]`
    pub red_max: u8,
    /// Lower bound (inclusive) of the purple band `[purple_min, 179]`
    pub purple_min: u8,
}

/// Per-pixel hue/saturation/value planes
struct HsvPlanes {
    hue: Vec<u8>,
    saturation: Vec<u8>,
    value: Vec<u8>,
}

impl CellDetector {
    /// Create a new detector with the given configuration
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Decode an encoded image (PNG/JPEG) and detect storm cells in it
    pub fn detect_encoded(
        &self,
        bytes: &[u8],
        range: &RadarRange,
        timestamp: NaiveDateTime,
    ) -> CvResult<Vec<DetectedCell>> {
        let image = image::load_from_memory(bytes)?.to_rgb8();
        Ok(self.detect(&image, range, timestamp))
    }

    /// Load an image from disk and detect storm cells in it
    pub fn detect_file(
        &self,
        path: impl AsRef<std::path::Path>,
        range: &RadarRange,
        timestamp: NaiveDateTime,
    ) -> CvResult<Vec<DetectedCell>> {
        let image = image::open(path.as_ref())?.to_rgb8();
        Ok(self.detect(&image, range, timestamp))
    }

    /// Detect storm cells in a frame
    ///
    /// Process:
    /// 1. Convert to HSV color space
    /// 2. Derive red/purple hue bands from the saturated pixels
    /// 3. Mask both bands and remove the cyan (light rain) band
    /// 4. Optionally open + dilate the mask
    /// 5. Extract external contours and build cells
    pub fn detect(
        &self,
        image: &RgbImage,
        range: &RadarRange,
        timestamp: NaiveDateTime,
    ) -> Vec<DetectedCell> {
        let hsv = to_hsv(image);

        let Some(bands) = self.hue_bands(&hsv) else {
            debug!("No saturated pixels in {} frame at {}", range, timestamp);
            return Vec::new();
        };
        trace!("Hue bands for {}: {:?}", timestamp, bands);

        let mask = self.cleanup(self.heavy_rain_mask(image.width(), image.height(), &hsv, bands));

        let (width, height) = image.dimensions();
        let cells: Vec<DetectedCell> = external_contours(&mask)
            .iter()
            .filter_map(|contour| self.to_cell(contour, width, height, range, timestamp))
            .collect();

        debug!("Detected {} storm cells in {} frame at {}", cells.len(), range, timestamp);
        cells
    }

    /// Adaptive hue bands, or `None` when no pixel passes the S/V floor
    pub fn hue_bands_for(&self, image: &RgbImage) -> Option<HueBands> {
        self.hue_bands(&to_hsv(image))
    }

    fn hue_bands(&self, hsv: &HsvPlanes) -> Option<HueBands> {
        let mut valid_hues: Vec<u8> = hsv
            .hue
            .iter()
            .zip(&hsv.saturation)
            .zip(&hsv.value)
            .filter(|((_, s), v)| **s >= self.config.saturation_min && **v >= self.config.value_min)
            .map(|((h, _), _)| *h)
            .collect();

        if valid_hues.is_empty() {
            return None;
        }
        valid_hues.sort_unstable();

        let low = percentile(&valid_hues, self.config.hue_percentile_low) as i32;
        let high = percentile(&valid_hues, self.config.hue_percentile_high) as i32;

        let red_max = low.clamp(RED_MAX_FLOOR, RED_MAX_CEIL);
        let purple_min = (red_max + BAND_SEPARATION).max(high.min(PURPLE_MIN_CEIL));

        Some(HueBands {
            red_max: red_max as u8,
            purple_min: purple_min.min(HUE_MAX as i32) as u8,
        })
    }

    fn heavy_rain_mask(&self, width: u32, height: u32, hsv: &HsvPlanes, bands: HueBands) -> GrayImage {
        let cfg = &self.config;
        GrayImage::from_fn(width, height, |x, y| {
            let i = (y * width + x) as usize;
            let (h, s, v) = (hsv.hue[i], hsv.saturation[i], hsv.value[i]);

            let saturated = s >= cfg.saturation_min && v >= cfg.value_min;
            let heavy = saturated && (h <= bands.red_max || h >= bands.purple_min);
            let cyan = (cfg.cyan_hue_min..=cfg.cyan_hue_max).contains(&h);

            Luma([if heavy && !cyan { MASK_ON } else { 0 }])
        })
    }

    /// Opening removes speckle, dilation reconnects fragments
    ///
    /// The structuring element is a `k x k` square anchored at `(k/2, k/2)`,
    /// so even kernels are applied at their exact size.
    fn cleanup(&self, mask: GrayImage) -> GrayImage {
        let k = self.config.morph_kernel;
        if k < 2 {
            return mask;
        }
        let square = GrayImage::from_pixel(k as u32, k as u32, Luma([MASK_ON]));
        let element = Mask::from_image(&square, k / 2, k / 2);
        let opened = grayscale_open(&mask, &element);
        grayscale_dilate(&opened, &element)
    }

    fn to_cell(
        &self,
        contour: &Contour<i32>,
        width: u32,
        height: u32,
        range: &RadarRange,
        timestamp: NaiveDateTime,
    ) -> Option<DetectedCell> {
        let area_px = contour_area(contour);
        if area_px < self.config.min_area_px || area_px <= 0.0 {
            return None;
        }

        let (x, y, w, h) = bounding_rect(contour)?;
        let x_center = x as f64 + w as f64 / 2.0;
        let y_center = y as f64 + h as f64 / 2.0;

        Some(DetectedCell {
            timestamp,
            radar_range_km: range.km(),
            x_px: x_center as u32,
            y_px: y_center as u32,
            width_px: w,
            height_px: h,
            area_px,
            area_km2: pixels_to_km2(area_px, range.km(), width, height),
        })
    }
}

/// Convert to 8-bit HSV (hue 0..=179, saturation/value 0..=255)
fn to_hsv(image: &RgbImage) -> HsvPlanes {
    let len = (image.width() * image.height()) as usize;
    let mut planes = HsvPlanes {
        hue: Vec::with_capacity(len),
        saturation: Vec::with_capacity(len),
        value: Vec::with_capacity(len),
    };

    for pixel in image.pixels() {
        let [r, g, b] = pixel.0;
        let (h, s, v) = rgb_to_hsv(r, g, b);
        planes.hue.push(h);
        planes.saturation.push(s);
        planes.value.push(v);
    }
    planes
}

pub(crate) fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let diff = max - min;

    let s = if max > 0.0 { (255.0 * diff / max).round() } else { 0.0 };

    let mut h = if diff == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / diff
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / diff
    } else {
        240.0 + 60.0 * (rf - gf) / diff
    };
    if h < 0.0 {
        h += 360.0;
    }

    let hue = (h / 2.0).round() as u16 % 180;
    (hue as u8, s as u8, max as u8)
}

/// Percentile with linear interpolation between closest ranks
fn percentile(sorted: &[u8], pct: f64) -> f64 {
    let rank = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let (a, b) = (sorted[lo] as f64, sorted[hi] as f64);
    a + (b - a) * (rank - lo as f64)
}

/// Outermost contours of the mask, in mask coordinates
///
/// The mask is framed with one background pixel before tracing so regions
/// touching the image border are still reported as outer borders.
fn external_contours(mask: &GrayImage) -> Vec<Contour<i32>> {
    let (width, height) = mask.dimensions();
    let mut framed = GrayImage::new(width + 2, height + 2);
    image::imageops::replace(&mut framed, mask, 1, 1);

    find_contours::<i32>(&framed)
        .into_iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
        .map(|mut contour| {
            for point in &mut contour.points {
                point.x -= 1;
                point.y -= 1;
            }
            contour
        })
        .collect()
}

/// Polygon area enclosed by the contour's border pixels
fn contour_area(contour: &Contour<i32>) -> f64 {
    let points = &contour.points;
    if points.len() < 3 {
        return 0.0;
    }
    let twice_area: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(p, q)| p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64)
        .sum();
    twice_area.abs() as f64 / 2.0
}

/// Upright bounding rectangle (x, y, width, height)
fn bounding_rect(contour: &Contour<i32>) -> Option<(u32, u32, u32, u32)> {
    let min_x = contour.points.iter().map(|p| p.x).min()?;
    let max_x = contour.points.iter().map(|p| p.x).max()?;
    let min_y = contour.points.iter().map(|p| p.y).min()?;
    let max_y = contour.points.iter().map(|p| p.y).max()?;
    Some((
        min_x as u32,
        min_y as u32,
        (max_x - min_x + 1) as u32,
        (max_y - min_y + 1) as u32,
    ))
}
