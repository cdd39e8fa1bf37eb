//! Dense-flow obstacle analyzer.
//!
//! Computes a pyramidal flow field between consecutive grayscale frames,
//! partitions it into grid zones, and scores each zone's expansion by the
//! signed projection of flow onto the direction from the zone center to a
//! 5x5 sub-grid of samples.

use flowops::{dense_flow_pyr, DenseFlowConfig, FlowField, MagnitudeMap, Pyramid};
use gnat_types::{ObstacleConfig, ObstacleResult, Zone};

use crate::zones;
use crate::ObstacleAnalyzer;

const DIVERGENCE_SAMPLES: usize = 5;
/// Divergence above which a zone counts as expanding (approaching).
const EXPANDING_THRESHOLD: f64 = 0.5;

pub struct DenseObstacleDetector {
    config: ObstacleConfig,
    flow_config: DenseFlowConfig,
    prev: Option<Pyramid>,
    magnitude: Option<MagnitudeMap>,
}

impl DenseObstacleDetector {
    pub fn new(config: ObstacleConfig) -> Self {
        Self {
            config,
            flow_config: DenseFlowConfig::default(),
            prev: None,
            magnitude: None,
        }
    }

    pub fn with_flow_config(mut self, flow_config: DenseFlowConfig) -> Self {
        self.flow_config = flow_config;
        self
    }

    fn analyze_zone(&self, flow: &FlowField, row: usize, col: usize) -> Zone {
        let bounds = zones::zone_bounds(
            &self.config.grid,
            flow.image_width,
            flow.image_height,
            row,
            col,
        );
        let (x1, y1, x2, y2) = bounds;
        let cx = (x1 + x2) as f64 / 2.0;
        let cy = (y1 + y2) as f64 / 2.0;

        // Mean magnitude over the field samples inside the zone.
        let mut mag_sum = 0.0;
        let mut mag_n = 0usize;
        for r in 0..flow.rows {
            for c in 0..flow.cols {
                let (px, py) = flow.sample_pos(r, c);
                if px >= x1 as f32 && px < x2 as f32 && py >= y1 as f32 && py < y2 as f32 {
                    let (fx, fy) = flow.at(r, c);
                    mag_sum += ((fx * fx + fy * fy) as f64).sqrt();
                    mag_n += 1;
                }
            }
        }
        let avg_magnitude = if mag_n > 0 { mag_sum / mag_n as f64 } else { 0.0 };

        // Signed projection of flow onto center-to-sample directions over a
        // 5x5 sub-grid.
        let mut div_sum = 0.0;
        let mut div_n = 0usize;
        let mut dist_sum = 0.0;
        let zw = (x2 - x1) as f64;
        let zh = (y2 - y1) as f64;
        for sy in 0..DIVERGENCE_SAMPLES {
            for sx in 0..DIVERGENCE_SAMPLES {
                let px = x1 as f64 + (sx as f64 + 0.5) * zw / DIVERGENCE_SAMPLES as f64;
                let py = y1 as f64 + (sy as f64 + 0.5) * zh / DIVERGENCE_SAMPLES as f64;
                let dx = px - cx;
                let dy = py - cy;
                let norm = (dx * dx + dy * dy).sqrt();
                if norm < 1e-9 {
                    continue;
                }
                // Nearest field sample.
                let fc = ((px / flow.step as f64) as usize).min(flow.cols.saturating_sub(1));
                let fr = ((py / flow.step as f64) as usize).min(flow.rows.saturating_sub(1));
                let (fx, fy) = flow.at(fr, fc);
                div_sum += (dx * fx as f64 + dy * fy as f64) / norm;
                div_n += 1;
                dist_sum += norm;
            }
        }
        let divergence = if div_n > 0 { div_sum / div_n as f64 } else { 0.0 };
        let expansion_rate = divergence.max(0.0);

        let ttc = if divergence > EXPANDING_THRESHOLD {
            let avg_distance = dist_sum / div_n as f64;
            Some(avg_distance / (expansion_rate * zones::NOMINAL_FPS))
        } else {
            None
        };

        let status = zones::classify(&self.config, expansion_rate, ttc);

        Zone {
            row,
            col,
            bounds,
            num_points: mag_n,
            avg_magnitude,
            divergence,
            expansion_rate,
            ttc,
            status,
        }
    }
}

impl ObstacleAnalyzer for DenseObstacleDetector {
    fn analyze_gray(&mut self, gray: &flowops::GrayMap, _now: f64) -> ObstacleResult {
        let cur = Pyramid::from_gray(gray.clone(), self.flow_config.levels);
        let prev = match self.prev.take() {
            Some(prev) => prev,
            None => {
                self.prev = Some(cur);
                return ObstacleResult::default();
            }
        };

        let flow = dense_flow_pyr(&prev, &cur, &self.flow_config);
        self.prev = Some(cur);
        let magnitude = flow.magnitude_map();
        let flow_magnitude = magnitude.mean();

        let grid = self.config.grid;
        let mut zone_list = Vec::with_capacity(grid.rows * grid.cols);
        for row in 0..grid.rows {
            for col in 0..grid.cols {
                zone_list.push(self.analyze_zone(&flow, row, col));
            }
        }

        let safe_directions = zones::safe_directions(&grid, &zone_list);
        let warnings = zones::warnings(&zone_list);
        // Dense variant scale: 0 clear, 1 warning present, 2 danger present.
        let danger_level = zone_list
            .iter()
            .map(|z| match z.status {
                gnat_types::ZoneStatus::Danger => 2,
                gnat_types::ZoneStatus::Warning => 1,
                _ => 0,
            })
            .max()
            .unwrap_or(0);

        self.magnitude = Some(magnitude);

        ObstacleResult {
            zones: zone_list,
            safe_directions,
            warnings,
            danger_level,
            flow_magnitude,
        }
    }

    fn magnitude_map(&self) -> Option<&MagnitudeMap> {
        self.magnitude.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObstacleAnalyzer;
    use flowops::GrayMap;

    fn blob(w: u32, h: u32, cx: f32, cy: f32, spread: f32) -> GrayMap {
        let mut data = vec![0u8; (w * h) as usize];
        for y in 0..h {
            for x in 0..w {
                let dx = x as f32 - cx;
                let dy = y as f32 - cy;
                let v = (255.0 * (-(dx * dx + dy * dy) / spread).exp()) as u8;
                data[(y * w + x) as usize] = v;
            }
        }
        GrayMap::new(w, h, data)
    }

    #[test]
    fn first_frame_returns_default() {
        let mut det = DenseObstacleDetector::new(ObstacleConfig::default_dense());
        let g = blob(96, 96, 48.0, 48.0, 300.0);
        let r = det.analyze_gray(&g, 0.0);
        assert!(r.zones.is_empty());
        assert_eq!(r.danger_level, 0);
        assert!(r.safe_directions.forward);
    }

    #[test]
    fn static_scene_is_clear() {
        let mut det = DenseObstacleDetector::new(ObstacleConfig::default_dense());
        let g = blob(128, 96, 64.0, 48.0, 500.0);
        det.analyze_gray(&g, 0.0);
        let r = det.analyze_gray(&g, 0.033);
        assert_eq!(r.danger_level, 0);
        assert_eq!(r.zones.len(), 12);
        assert!(r.flow_magnitude < 0.5);
        assert!(r.safe_directions.forward);
    }

    #[test]
    fn zones_tile_frame_exactly() {
        let mut det = DenseObstacleDetector::new(ObstacleConfig::default_dense());
        let g = blob(128, 96, 64.0, 48.0, 500.0);
        det.analyze_gray(&g, 0.0);
        let r = det.analyze_gray(&g, 0.033);
        let area: u64 = r
            .zones
            .iter()
            .map(|z| {
                let (x1, y1, x2, y2) = z.bounds;
                (x2 - x1) as u64 * (y2 - y1) as u64
            })
            .sum();
        assert_eq!(area, 128 * 96);
    }
}
