//! Pixel-only helmet check used when no helmet detector output is available.
//!
//! This is a best-effort estimator, not a classifier: bald heads, glare,
//! tied-back hair and reflective gear all look like an edge-dense dome.

mod hough;

pub use hough::{detect_circles, Circle, HoughCircleParams};

use crate::{error::CoreError, head_region::ensure_analyzable};
use image::{imageops, RgbImage};
use imageproc::edges::canny;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HeuristicConfig {
    pub canny_low: f32,
    pub canny_high: f32,
    /// Share of the crop, from the top, where helmet evidence counts.
    pub upper_fraction: f32,
    /// Percentage of edge pixels in the upper band above which a helmet is assumed.
    pub edge_density_threshold: f32,
    /// Confidence attached to a positive answer.
    pub nominal_confidence: f32,
    pub circles: HoughCircleParams,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            canny_low: 50.,
            canny_high: 150.,
            upper_fraction: 0.6,
            edge_density_threshold: 8.,
            nominal_confidence: 0.5,
            circles: HoughCircleParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeuristicOutcome {
    pub helmet_present: bool,
    /// Edge pixels in the upper band, as a percentage.
    pub edge_density: f32,
    pub dense_edges: bool,
    /// First circle whose center falls in the upper band.
    pub upper_circle: Option<Circle>,
    pub circles_found: usize,
    pub confidence: f32,
}

#[derive(Debug, Clone)]
pub struct HelmetHeuristic {
    config: HeuristicConfig,
    min_region_pixels: u32,
}

impl HelmetHeuristic {
    pub fn new(config: HeuristicConfig, min_region_pixels: u32) -> Self {
        Self {
            config,
            min_region_pixels,
        }
    }

    pub fn config(&self) -> &HeuristicConfig {
        &self.config
    }

    /// Decides helmet presence on a head-region crop.
    ///
    /// Returns `InsufficientRegion` without looking at the pixels when the crop
    /// is smaller than the minimum size on either side.
    pub fn analyze(&self, crop: &RgbImage) -> Result<HeuristicOutcome, CoreError> {
        let (width, height) = crop.dimensions();
        ensure_analyzable(width as f32, height as f32, self.min_region_pixels)?;

        let gray = imageops::grayscale(crop);
        let edges = canny(&gray, self.config.canny_low, self.config.canny_high);

        let band_limit = height as f32 * self.config.upper_fraction;
        let band_rows = (band_limit as u32).clamp(1, height);
        let edge_pixels = edges
            .enumerate_pixels()
            .filter(|(_, y, pixel)| *y < band_rows && pixel[0] > 0)
            .count();
        let edge_density = edge_pixels as f32 / (band_rows * width) as f32 * 100.;
        let dense_edges = edge_density > self.config.edge_density_threshold;

        let circles = detect_circles(&gray, &self.config.circles);
        let upper_circle = circles.iter().find(|circle| circle.y < band_limit).copied();

        let helmet_present = dense_edges || upper_circle.is_some();
        tracing::debug!(
            edge_density,
            circles = circles.len(),
            upper_circle = upper_circle.is_some(),
            helmet_present,
            "Head region analysed"
        );

        Ok(HeuristicOutcome {
            helmet_present,
            edge_density,
            dense_edges,
            upper_circle,
            circles_found: circles.len(),
            confidence: if helmet_present {
                self.config.nominal_confidence
            } else {
                0.
            },
        })
    }
}
