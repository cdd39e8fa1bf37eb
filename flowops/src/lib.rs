//! Optical flow kernels: grayscale pyramids, Shi-Tomasi corners, and
//! pyramidal Lucas-Kanade tracking in sparse and dense flavors.
//!
//! All kernels are scalar loops over `Mono8` images. The public entry
//! points accept anything implementing
//! [`machine_vision_formats::ImageStride`] so callers can pass borrowed
//! frame views without copying.

use machine_vision_formats::{pixel_format::Mono8, ImageStride};

mod corners;
mod lk;
mod pyramid;

pub use corners::{good_features_to_track, CornerConfig};
pub use lk::{track_points, track_points_pyr, LkConfig, TrackedPoint};
pub use pyramid::{GrayMap, Pyramid};

/// A 2-D image point in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowPoint {
    pub x: f32,
    pub y: f32,
}

impl FlowPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Dense flow parameters. `step` is the sampling stride of the output grid;
/// the remaining fields mirror the sparse tracker.
#[derive(Debug, Clone, Copy)]
pub struct DenseFlowConfig {
    pub levels: usize,
    pub window: usize,
    pub iterations: usize,
    pub step: usize,
}

impl Default for DenseFlowConfig {
    fn default() -> Self {
        Self {
            levels: 3,
            window: 15,
            iterations: 3,
            step: 8,
        }
    }
}

/// Flow field sampled on a regular grid of `step`-spaced pixel centers.
#[derive(Debug, Clone)]
pub struct FlowField {
    /// Grid columns.
    pub cols: usize,
    /// Grid rows.
    pub rows: usize,
    /// Pixel spacing between samples.
    pub step: usize,
    /// Source image width in pixels.
    pub image_width: u32,
    /// Source image height in pixels.
    pub image_height: u32,
    fx: Vec<f32>,
    fy: Vec<f32>,
}

impl FlowField {
    /// Flow vector at grid cell (row, col).
    pub fn at(&self, row: usize, col: usize) -> (f32, f32) {
        let i = row * self.cols + col;
        (self.fx[i], self.fy[i])
    }

    /// Pixel position of the sample at grid cell (row, col).
    pub fn sample_pos(&self, row: usize, col: usize) -> (f32, f32) {
        (
            (col * self.step) as f32 + self.step as f32 / 2.0,
            (row * self.step) as f32 + self.step as f32 / 2.0,
        )
    }

    pub fn magnitude_map(&self) -> MagnitudeMap {
        let data = self
            .fx
            .iter()
            .zip(self.fy.iter())
            .map(|(x, y)| (x * x + y * y).sqrt())
            .collect();
        MagnitudeMap {
            cols: self.cols,
            rows: self.rows,
            data,
        }
    }
}

/// Per-sample flow magnitudes, shape (rows, cols).
#[derive(Debug, Clone)]
pub struct MagnitudeMap {
    pub cols: usize,
    pub rows: usize,
    pub data: Vec<f32>,
}

impl MagnitudeMap {
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), rows * cols);
        Self { cols, rows, data }
    }

    pub fn at(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|v| *v as f64).sum::<f64>() / self.data.len() as f64
    }
}

/// Dense optical flow between two frames, computed by running the
/// Lucas-Kanade solver at every grid sample.
pub fn dense_flow<IM1, IM2>(prev: &IM1, next: &IM2, cfg: &DenseFlowConfig) -> FlowField
where
    IM1: ImageStride<Mono8>,
    IM2: ImageStride<Mono8>,
{
    let prev_pyr = Pyramid::build(prev, cfg.levels);
    let next_pyr = Pyramid::build(next, cfg.levels);
    dense_flow_pyr(&prev_pyr, &next_pyr, cfg)
}

/// As [`dense_flow`] but with caller-provided pyramids, so the previous
/// frame's pyramid can be reused across calls.
pub fn dense_flow_pyr(prev: &Pyramid, next: &Pyramid, cfg: &DenseFlowConfig) -> FlowField {
    let base = prev.level(0);
    let w = base.width();
    let h = base.height();
    let cols = (w as usize) / cfg.step;
    let rows = (h as usize) / cfg.step;

    let mut points = Vec::with_capacity(rows * cols);
    for r in 0..rows {
        for c in 0..cols {
            points.push(FlowPoint::new(
                (c * cfg.step) as f32 + cfg.step as f32 / 2.0,
                (r * cfg.step) as f32 + cfg.step as f32 / 2.0,
            ));
        }
    }

    let lk_cfg = LkConfig {
        window: cfg.window,
        levels: cfg.levels,
        max_iterations: cfg.iterations,
        epsilon: 0.01,
    };
    let tracked = lk::track_points_pyr(prev, next, &points, &lk_cfg);

    let mut fx = vec![0.0f32; rows * cols];
    let mut fy = vec![0.0f32; rows * cols];
    for (i, t) in tracked.iter().enumerate() {
        if t.status {
            fx[i] = t.point.x - points[i].x;
            fy[i] = t.point.y - points[i].y;
        }
    }

    FlowField {
        cols,
        rows,
        step: cfg.step,
        image_width: w,
        image_height: h,
        fx,
        fy,
    }
}
