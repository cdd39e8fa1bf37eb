//! Sparse-flow obstacle analyzer.
//!
//! Tracks a pool of Shi-Tomasi corners with pyramidal Lucas-Kanade and
//! scores zone expansion from the tracked vectors. Considerably cheaper
//! than the dense variant on the hot path, at the cost of patchy coverage
//! in textureless regions.

use flowops::{
    good_features_to_track, track_points_pyr, CornerConfig, FlowPoint, LkConfig, MagnitudeMap,
    Pyramid,
};
use gnat_types::{ObstacleConfig, ObstacleResult, Zone};

use crate::zones;
use crate::ObstacleAnalyzer;

/// Re-seed the corner pool when fewer tracks than this survive.
const MIN_TRACKED: usize = 50;
/// Minimum points in a zone before its divergence is meaningful.
const MIN_ZONE_POINTS: usize = 3;
const EXPANDING_THRESHOLD: f64 = 0.5;

pub struct SparseObstacleDetector {
    config: ObstacleConfig,
    corner_config: CornerConfig,
    lk_config: LkConfig,
    prev: Option<Pyramid>,
    points: Vec<FlowPoint>,
    magnitude: Option<MagnitudeMap>,
}

impl SparseObstacleDetector {
    pub fn new(config: ObstacleConfig) -> Self {
        Self {
            config,
            corner_config: CornerConfig::default(),
            lk_config: LkConfig::default(),
            prev: None,
            points: Vec::new(),
            magnitude: None,
        }
    }

    fn analyze_zone(
        &self,
        width: u32,
        height: u32,
        row: usize,
        col: usize,
        tracked: &[(FlowPoint, FlowPoint)],
    ) -> Zone {
        let bounds = zones::zone_bounds(&self.config.grid, width, height, row, col);
        let (x1, y1, x2, y2) = bounds;
        let cx = (x1 + x2) as f64 / 2.0;
        let cy = (y1 + y2) as f64 / 2.0;

        // Points whose tracked position landed inside this zone.
        let in_zone: Vec<&(FlowPoint, FlowPoint)> = tracked
            .iter()
            .filter(|(new, _)| {
                new.x >= x1 as f32 && new.x < x2 as f32 && new.y >= y1 as f32 && new.y < y2 as f32
            })
            .collect();

        let num_points = in_zone.len();
        let mut zone = Zone {
            row,
            col,
            bounds,
            num_points,
            avg_magnitude: 0.0,
            divergence: 0.0,
            expansion_rate: 0.0,
            ttc: None,
            status: gnat_types::ZoneStatus::Clear,
        };

        if num_points < MIN_ZONE_POINTS {
            return zone;
        }

        // Divergence: flow projected onto the unit vector from each point
        // to the zone center. Distances are clamped below 1 px.
        let mut div_sum = 0.0;
        let mut dist_sum = 0.0;
        let mut mag_sum = 0.0;
        for (new, old) in &in_zone {
            let fx = (new.x - old.x) as f64;
            let fy = (new.y - old.y) as f64;
            mag_sum += (fx * fx + fy * fy).sqrt();
            let tx = cx - new.x as f64;
            let ty = cy - new.y as f64;
            let dist = (tx * tx + ty * ty).sqrt().max(1.0);
            div_sum += (tx * fx + ty * fy) / dist;
            dist_sum += dist;
        }
        let n = num_points as f64;
        zone.avg_magnitude = mag_sum / n;
        zone.divergence = div_sum / n;
        zone.expansion_rate = zone.divergence.max(0.0);

        if zone.divergence > EXPANDING_THRESHOLD {
            let avg_distance = dist_sum / n;
            zone.ttc = Some(avg_distance / (zone.expansion_rate * zones::NOMINAL_FPS));
        }
        zone.status = zones::classify(&self.config, zone.expansion_rate, zone.ttc);
        zone
    }
}

impl ObstacleAnalyzer for SparseObstacleDetector {
    fn analyze_gray(&mut self, gray: &flowops::GrayMap, _now: f64) -> ObstacleResult {
        let width = gray.width();
        let height = gray.height();
        let cur = Pyramid::from_gray(gray.clone(), self.lk_config.levels);

        let prev = match self.prev.take() {
            Some(prev) => prev,
            None => {
                self.points = good_features_to_track(gray, &self.corner_config);
                self.prev = Some(cur);
                return ObstacleResult::default();
            }
        };

        let mut result = ObstacleResult::default();

        let tracked: Vec<(FlowPoint, FlowPoint)> = if self.points.is_empty() {
            Vec::new()
        } else {
            track_points_pyr(&prev, &cur, &self.points, &self.lk_config)
                .into_iter()
                .zip(self.points.iter())
                .filter(|(t, _)| t.status)
                .map(|(t, old)| (t.point, *old))
                .collect()
        };

        if !tracked.is_empty() {
            let mags: Vec<f32> = tracked
                .iter()
                .map(|(new, old)| {
                    let fx = new.x - old.x;
                    let fy = new.y - old.y;
                    (fx * fx + fy * fy).sqrt()
                })
                .collect();
            result.flow_magnitude =
                mags.iter().map(|m| *m as f64).sum::<f64>() / mags.len() as f64;

            let grid = self.config.grid;
            let mut zone_list = Vec::with_capacity(grid.rows * grid.cols);
            for row in 0..grid.rows {
                for col in 0..grid.cols {
                    zone_list.push(self.analyze_zone(width, height, row, col, &tracked));
                }
            }

            // Zone-resolution magnitude map; zones tile the frame, so the
            // balancer's thirds-of-image arithmetic stays meaningful.
            let zone_mags: Vec<f32> = zone_list.iter().map(|z| z.avg_magnitude as f32).collect();
            self.magnitude = Some(MagnitudeMap::new(grid.rows, grid.cols, zone_mags));

            result.safe_directions = zones::safe_directions(&grid, &zone_list);
            result.warnings = zones::warnings(&zone_list);
            // Sparse variant scale: 0 clear, 2 warning present, 3 danger
            // present.
            result.danger_level = zone_list
                .iter()
                .map(|z| match z.status {
                    gnat_types::ZoneStatus::Danger => 3,
                    gnat_types::ZoneStatus::Warning => 2,
                    _ => 0,
                })
                .max()
                .unwrap_or(0);
            result.zones = zone_list;
        }

        // Carry surviving tracks forward; re-seed when the pool thins out.
        let survivors: Vec<FlowPoint> = tracked.iter().map(|(new, _)| *new).collect();
        self.points = if survivors.len() < MIN_TRACKED {
            good_features_to_track(gray, &self.corner_config)
        } else {
            survivors
        };

        self.prev = Some(cur);
        result
    }

    fn magnitude_map(&self) -> Option<&MagnitudeMap> {
        self.magnitude.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowops::GrayMap;

    fn textured(w: u32, h: u32, shift: i32) -> GrayMap {
        let mut data = vec![0u8; (w * h) as usize];
        for y in 0..h {
            for x in 0..w {
                let xs = (x as i32 - shift).rem_euclid(w as i32) as u32;
                data[(y * w + x) as usize] = if ((xs / 12) + (y / 12)) % 2 == 0 { 220 } else { 30 };
            }
        }
        GrayMap::new(w, h, data)
    }

    #[test]
    fn first_frame_seeds_corner_pool() {
        let mut det = SparseObstacleDetector::new(ObstacleConfig::default_sparse());
        let g = textured(160, 120, 0);
        let r = det.analyze_gray(&g, 0.0);
        assert!(r.zones.is_empty());
        assert!(!det.points.is_empty());
    }

    #[test]
    fn static_scene_stays_clear() {
        let mut det = SparseObstacleDetector::new(ObstacleConfig::default_sparse());
        let g = textured(160, 120, 0);
        det.analyze_gray(&g, 0.0);
        let r = det.analyze_gray(&g, 0.033);
        assert_eq!(r.danger_level, 0);
        assert!(r.flow_magnitude < 0.5);
        assert!(r.safe_directions.forward);
    }

    #[test]
    fn lateral_shift_produces_flow_without_danger() {
        let mut det = SparseObstacleDetector::new(ObstacleConfig::default_sparse());
        det.analyze_gray(&textured(160, 120, 0), 0.0);
        let r = det.analyze_gray(&textured(160, 120, 2), 0.033);
        // A uniform lateral shift has magnitude but no radial expansion.
        assert!(r.flow_magnitude > 0.5, "flow = {}", r.flow_magnitude);
        assert_eq!(r.danger_level, 0);
    }
}
