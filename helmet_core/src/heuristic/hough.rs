//! Circle detection with the Hough gradient method.
//!
//! Every edge pixel votes for candidate centers along its gradient direction,
//! in both senses, for every radius in the configured range. Accumulator
//! peaks above the vote threshold become center candidates; candidates are
//! visited strongest first, rejected when closer than `min_dist` to an already
//! accepted circle, and kept only when enough edge pixels agree on a radius.

use image::GrayImage;
use imageproc::{
    edges::canny,
    filter::gaussian_blur_f32,
    gradients::{horizontal_sobel, vertical_sobel},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Circle {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    /// Edge pixels supporting the chosen radius.
    pub support: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HoughCircleParams {
    /// Minimum distance between accepted centers, in pixels.
    pub min_dist: f32,
    /// Upper Canny threshold for the internal edge map; the lower one is half of it.
    pub edge_threshold: f32,
    /// Votes a center needs, and edge pixels a radius needs, to be accepted.
    pub accumulator_threshold: u32,
    pub min_radius: u32,
    pub max_radius: u32,
}

impl Default for HoughCircleParams {
    fn default() -> Self {
        Self {
            min_dist: 20.,
            edge_threshold: 50.,
            accumulator_threshold: 30,
            min_radius: 10,
            max_radius: 100,
        }
    }
}

/// Radius bin width used when grouping edge distances around a center.
const RADIUS_STEP: f32 = 1.;
/// Smoothing applied before taking gradient directions, the same sigma Canny uses.
const GRADIENT_SIGMA: f32 = 1.4;

pub fn detect_circles(gray: &GrayImage, params: &HoughCircleParams) -> Vec<Circle> {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 || params.max_radius < params.min_radius {
        return Vec::new();
    }

    let edges = canny(gray, params.edge_threshold / 2., params.edge_threshold);
    let smoothed = gaussian_blur_f32(gray, GRADIENT_SIGMA);
    let gx = horizontal_sobel(&smoothed);
    let gy = vertical_sobel(&smoothed);

    let cols = width as usize;
    let mut accumulator = vec![0u32; cols * height as usize];
    let mut edge_points = Vec::new();

    for (x, y, pixel) in edges.enumerate_pixels() {
        if pixel[0] == 0 {
            continue;
        }
        let dx = gx.get_pixel(x, y)[0] as f32;
        let dy = gy.get_pixel(x, y)[0] as f32;
        let magnitude = (dx * dx + dy * dy).sqrt();
        if magnitude == 0. {
            continue;
        }
        edge_points.push((x as f32, y as f32));

        let (ux, uy) = (dx / magnitude, dy / magnitude);
        for sense in [1f32, -1.] {
            let mut last_cell = None;
            for radius in params.min_radius..=params.max_radius {
                let r = sense * radius as f32;
                let cx = (x as f32 + r * ux).round();
                let cy = (y as f32 + r * uy).round();
                // Rays leave the image for good once they cross its border.
                if cx < 0. || cy < 0. || cx >= width as f32 || cy >= height as f32 {
                    break;
                }
                let cell = cy as usize * cols + cx as usize;
                if last_cell == Some(cell) {
                    continue;
                }
                last_cell = Some(cell);
                accumulator[cell] += 1;
            }
        }
    }

    let mut centers = Vec::new();
    for y in 1..height as usize - 1 {
        for x in 1..cols - 1 {
            let cell = y * cols + x;
            let votes = accumulator[cell];
            if votes > params.accumulator_threshold
                && votes > accumulator[cell - 1]
                && votes >= accumulator[cell + 1]
                && votes > accumulator[cell - cols]
                && votes >= accumulator[cell + cols]
            {
                centers.push((x, y, votes));
            }
        }
    }
    // Stable sort: equal votes keep raster order.
    centers.sort_by(|a, b| b.2.cmp(&a.2));

    let min_dist_sq = params.min_dist * params.min_dist;
    let mut circles: Vec<Circle> = Vec::new();

    for (x, y, _) in centers {
        let (cx, cy) = (x as f32, y as f32);
        let crowded = circles.iter().any(|circle| {
            let (ddx, ddy) = (circle.x - cx, circle.y - cy);
            ddx * ddx + ddy * ddy < min_dist_sq
        });
        if crowded {
            continue;
        }

        if let Some((radius, support)) = best_radius(cx, cy, &edge_points, params) {
            if support > params.accumulator_threshold {
                circles.push(Circle {
                    x: cx,
                    y: cy,
                    radius,
                    support,
                });
            }
        }
    }

    circles
}

/// Finds the radius with the densest run of edge pixels around `(cx, cy)`.
///
/// Runs are groups of sorted distances spanning at most `RADIUS_STEP`;
/// larger radii need proportionally more pixels to win.
fn best_radius(
    cx: f32,
    cy: f32,
    edge_points: &[(f32, f32)],
    params: &HoughCircleParams,
) -> Option<(f32, u32)> {
    let (min_r, max_r) = (params.min_radius as f32, params.max_radius as f32);
    let mut distances: Vec<f32> = edge_points
        .iter()
        .map(|(x, y)| ((x - cx).powi(2) + (y - cy).powi(2)).sqrt())
        .filter(|d| (min_r..=max_r).contains(d))
        .collect();
    if distances.is_empty() {
        return None;
    }
    distances.sort_by(f32::total_cmp);

    let mut best: Option<(f32, u32)> = None;
    let mut start = 0;
    for end in 1..=distances.len() {
        let run_closed = end == distances.len() || distances[end] - distances[start] > RADIUS_STEP;
        if !run_closed {
            continue;
        }
        let count = (end - start) as u32;
        let radius = distances[(start + end - 1) / 2];
        let better = match best {
            None => true,
            Some((best_radius, best_count)) => {
                count as f32 * best_radius > best_count as f32 * radius
            }
        };
        if better {
            best = Some((radius, count));
        }
        start = end;
    }

    best
}
