//! Bee-inspired corridor balance.
//!
//! Compares optic flow between the left and right thirds of the image to
//! keep the vehicle centered, and between the ventral and dorsal thirds
//! for altitude and ground-speed regulation. Stateless: one magnitude map
//! in, one [`BalanceResult`] out.

use flowops::MagnitudeMap;
use gnat_types::{
    ActionAdvice, BalanceConfig, BalanceResult, LateralAdvice, Recommendations, SpeedAdvice,
    VerticalAdvice,
};

/// Total-flow floor below which balances are reported as zero.
const FLOW_EPSILON: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct FlowBalancer {
    config: BalanceConfig,
}

impl FlowBalancer {
    pub fn new(config: BalanceConfig) -> Self {
        Self { config }
    }

    /// Lateral and vertical balance of a flow magnitude map.
    pub fn compute_balance(&self, map: &MagnitudeMap) -> BalanceResult {
        if map.data.is_empty() || map.cols == 0 || map.rows == 0 {
            return self.empty_result();
        }

        let w = map.cols;
        let h = map.rows;

        let left_flow = region_mean(map, 0..w / 3, 0..h);
        let right_flow = region_mean(map, 2 * w / 3..w, 0..h);
        let total = left_flow + right_flow;
        let lateral_balance = if total > FLOW_EPSILON {
            (left_flow - right_flow) / total
        } else {
            0.0
        };

        let ventral_flow = region_mean(map, 0..w, 2 * h / 3..h);
        let dorsal_flow = region_mean(map, 0..w, 0..h / 3);
        let total_vertical = ventral_flow + dorsal_flow;
        let vertical_balance = if total_vertical > FLOW_EPSILON {
            (dorsal_flow - ventral_flow) / total_vertical
        } else {
            0.0
        };

        let recommendations =
            self.recommendations(lateral_balance, ventral_flow, vertical_balance);

        BalanceResult {
            lateral_balance,
            ventral_flow,
            dorsal_flow,
            vertical_balance,
            left_flow,
            right_flow,
            recommendations,
        }
    }

    fn recommendations(
        &self,
        lateral_balance: f64,
        ventral_flow: f64,
        vertical_balance: f64,
    ) -> Recommendations {
        let mut recs = Recommendations {
            lateral: LateralAdvice::Centered,
            speed: SpeedAdvice::Ok,
            vertical: VerticalAdvice::Level,
            action: ActionAdvice::Continue,
        };

        // More flow on one side means that wall is closer; steer away.
        if lateral_balance > self.config.balance_threshold {
            recs.lateral = LateralAdvice::GoRight;
            recs.action = ActionAdvice::AdjustRight;
        } else if lateral_balance < -self.config.balance_threshold {
            recs.lateral = LateralAdvice::GoLeft;
            recs.action = ActionAdvice::AdjustLeft;
        }

        let target = self.config.speed_target;
        if ventral_flow > target * 1.5 {
            recs.speed = SpeedAdvice::TooFast;
            if recs.action == ActionAdvice::Continue {
                recs.action = ActionAdvice::SlowDown;
            }
        } else if ventral_flow > target * 1.2 {
            recs.speed = SpeedAdvice::ReduceSpeed;
        } else if ventral_flow < target * 0.5 && ventral_flow > 0.5 {
            recs.speed = SpeedAdvice::TooSlow;
        }

        if vertical_balance > 0.3 {
            recs.vertical = VerticalAdvice::GoDown;
        } else if vertical_balance < -0.3 {
            recs.vertical = VerticalAdvice::GoUp;
        }

        recs
    }

    fn empty_result(&self) -> BalanceResult {
        BalanceResult {
            lateral_balance: 0.0,
            ventral_flow: 0.0,
            dorsal_flow: 0.0,
            vertical_balance: 0.0,
            left_flow: 0.0,
            right_flow: 0.0,
            recommendations: Recommendations {
                lateral: LateralAdvice::Unknown,
                speed: SpeedAdvice::Unknown,
                vertical: VerticalAdvice::Unknown,
                action: ActionAdvice::Wait,
            },
        }
    }

    /// Convert a balance into a `(lateral, speed, vertical)` control
    /// vector, each component in [-1, 1].
    pub fn control_vector(&self, balance: &BalanceResult, gain: f64) -> (f64, f64, f64) {
        let lateral_cmd = (-balance.lateral_balance * gain).clamp(-1.0, 1.0);
        let speed_error =
            (balance.ventral_flow - self.config.speed_target) / self.config.speed_target;
        let speed_cmd = (-speed_error.clamp(-1.0, 1.0) * gain).clamp(-1.0, 1.0);
        let vertical_cmd = (-balance.vertical_balance * gain).clamp(-1.0, 1.0);
        (lateral_cmd, speed_cmd, vertical_cmd)
    }
}

impl Default for FlowBalancer {
    fn default() -> Self {
        Self::new(BalanceConfig::default())
    }
}

fn region_mean(
    map: &MagnitudeMap,
    cols: std::ops::Range<usize>,
    rows: std::ops::Range<usize>,
) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    for r in rows {
        for c in cols.clone() {
            sum += map.at(r, c) as f64;
            n += 1;
        }
    }
    if n > 0 {
        sum / n as f64
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn map_from_columns(cols: usize, rows: usize, f: impl Fn(usize) -> f32) -> MagnitudeMap {
        let mut data = Vec::with_capacity(cols * rows);
        for _r in 0..rows {
            for c in 0..cols {
                data.push(f(c));
            }
        }
        MagnitudeMap::new(rows, cols, data)
    }

    #[test]
    fn zero_flow_yields_zero_balance_and_nominal_advice() {
        let map = map_from_columns(12, 9, |_| 0.0);
        let b = FlowBalancer::default().compute_balance(&map);
        assert_eq!(b.lateral_balance, 0.0);
        assert_eq!(b.vertical_balance, 0.0);
        assert_eq!(b.recommendations.lateral, LateralAdvice::Centered);
        assert_eq!(b.recommendations.speed, SpeedAdvice::Ok);
        assert_eq!(b.recommendations.vertical, VerticalAdvice::Level);
        assert_eq!(b.recommendations.action, ActionAdvice::Continue);
    }

    #[test]
    fn left_heavy_flow_recommends_going_right() {
        let map = map_from_columns(12, 9, |c| if c < 4 { 6.0 } else { 0.5 });
        let b = FlowBalancer::default().compute_balance(&map);
        assert!(b.lateral_balance > 0.3, "balance = {}", b.lateral_balance);
        assert!(b.lateral_balance <= 1.0);
        assert_eq!(b.recommendations.lateral, LateralAdvice::GoRight);
        assert_eq!(b.recommendations.action, ActionAdvice::AdjustRight);
    }

    #[test]
    fn balance_formula_matches_region_means() {
        // Left third 2.0, right third 1.0 -> (2-1)/3.
        let map = map_from_columns(12, 9, |c| {
            if c < 4 {
                2.0
            } else if c >= 8 {
                1.0
            } else {
                0.0
            }
        });
        let b = FlowBalancer::default().compute_balance(&map);
        assert_relative_eq!(b.lateral_balance, 1.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(b.left_flow, 2.0, epsilon = 1e-9);
        assert_relative_eq!(b.right_flow, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn fast_ventral_flow_triggers_slow_down() {
        // Uniform strong flow: ventral mean well above the 5.0 target.
        let map = map_from_columns(12, 9, |_| 9.0);
        let b = FlowBalancer::default().compute_balance(&map);
        assert_eq!(b.recommendations.speed, SpeedAdvice::TooFast);
        assert_eq!(b.recommendations.action, ActionAdvice::SlowDown);
    }

    #[test]
    fn control_vector_is_clamped_and_signed() {
        let balancer = FlowBalancer::default();
        let map = map_from_columns(12, 9, |c| if c < 4 { 8.0 } else { 0.0 });
        let b = balancer.compute_balance(&map);
        let (lat, speed, vert) = balancer.control_vector(&b, 1.0);
        // Left-heavy flow: steer right (negative lateral command).
        assert!(lat < 0.0);
        assert!((-1.0..=1.0).contains(&lat));
        assert!((-1.0..=1.0).contains(&speed));
        assert!((-1.0..=1.0).contains(&vert));
    }

    #[test]
    fn empty_map_gives_wait_advice() {
        let map = MagnitudeMap::new(0, 0, vec![]);
        let b = FlowBalancer::default().compute_balance(&map);
        assert_eq!(b.recommendations.action, ActionAdvice::Wait);
        assert_eq!(b.recommendations.lateral, LateralAdvice::Unknown);
    }
}
