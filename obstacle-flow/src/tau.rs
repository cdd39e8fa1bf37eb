//! Lee-tau time-to-contact estimation.
//!
//! Tau is the ratio of an object's apparent size to its rate of size
//! change; it estimates time-to-contact without any distance measurement.
//! Per tracked region the estimator keeps a small ring of (size, time)
//! samples; idle regions are swept on a schedule rather than on every
//! insert.

use std::collections::HashMap;

use gnat_types::{TauConfig, TauDanger};

const HISTORY_CAP: usize = 10;
const SWEEP_INTERVAL: f64 = 1.0;
const MIN_DT: f64 = 1e-6;

/// One tau observation for a region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TauSample {
    /// Time-to-contact in seconds, always positive (approaching).
    pub tau: f64,
    /// Rate of change of tau, available from the third sample on.
    pub tau_dot: Option<f64>,
    /// Size growth in pixels per second.
    pub expansion_rate: f64,
}

#[derive(Debug, Clone)]
struct RegionHistory {
    // (size, time), oldest first; capped at HISTORY_CAP.
    samples: Vec<(f64, f64)>,
}

impl RegionHistory {
    fn push(&mut self, size: f64, time: f64) {
        self.samples.push((size, time));
        if self.samples.len() > HISTORY_CAP {
            let overflow = self.samples.len() - HISTORY_CAP;
            self.samples.drain(..overflow);
        }
    }

    fn last_time(&self) -> f64 {
        self.samples.last().map(|(_, t)| *t).unwrap_or(f64::MIN)
    }
}

pub struct TauEstimator {
    config: TauConfig,
    history: HashMap<u64, RegionHistory>,
    last_sweep: f64,
}

impl TauEstimator {
    pub fn new(config: TauConfig) -> Self {
        Self {
            config,
            history: HashMap::new(),
            last_sweep: f64::MIN,
        }
    }

    /// Record a (size, time) sample for `region_id` and compute tau when
    /// possible. Returns `None` for undersized regions, the first sample
    /// of a region, insignificant expansion, or receding objects.
    pub fn update(&mut self, region_id: u64, size: f64, time: f64) -> Option<TauSample> {
        if self.last_sweep == f64::MIN {
            self.last_sweep = time;
        } else if time - self.last_sweep >= SWEEP_INTERVAL {
            self.sweep(time);
        }

        if size < self.config.min_size {
            return None;
        }

        let history = match self.history.get_mut(&region_id) {
            Some(h) => h,
            None => {
                self.history.insert(
                    region_id,
                    RegionHistory {
                        samples: vec![(size, time)],
                    },
                );
                return None;
            }
        };
        history.push(size, time);

        let n = history.samples.len();
        debug_assert!(n >= 2);
        let (s_curr, t_curr) = history.samples[n - 1];
        let (s_prev, t_prev) = history.samples[n - 2];

        let dt = t_curr - t_prev;
        if dt < MIN_DT {
            return None;
        }
        let expansion_rate = (s_curr - s_prev) / dt;
        if expansion_rate.abs() < self.config.min_rate {
            return None;
        }

        let tau = s_curr / expansion_rate;
        if tau <= 0.0 {
            return None;
        }

        let tau_dot = if n >= 3 {
            let (s_pp, t_pp) = history.samples[n - 3];
            let prev_dt = t_prev - t_pp;
            if prev_dt >= MIN_DT {
                let prev_rate = (s_prev - s_pp) / prev_dt;
                if prev_rate.abs() >= self.config.min_rate {
                    let prev_tau = s_prev / prev_rate;
                    if prev_tau > 0.0 {
                        Some((tau - prev_tau) / dt)
                    } else {
                        None
                    }
                } else {
                    None
                }
            } else {
                None
            }
        } else {
            None
        };

        Some(TauSample {
            tau,
            tau_dot,
            expansion_rate,
        })
    }

    /// Single-shot tau from two sizes, without touching region history.
    pub fn compute_tau_simple(&self, prev_size: f64, curr_size: f64, dt: f64) -> Option<f64> {
        if prev_size < self.config.min_size || curr_size < self.config.min_size || dt < MIN_DT {
            return None;
        }
        let rate = (curr_size - prev_size) / dt;
        if rate.abs() < self.config.min_rate {
            return None;
        }
        let tau = curr_size / rate;
        (tau > 0.0).then_some(tau)
    }

    /// Drop regions whose most recent sample is older than the configured
    /// age limit.
    pub fn sweep(&mut self, now: f64) {
        let max_age = self.config.max_age;
        let before = self.history.len();
        self.history.retain(|_, h| now - h.last_time() <= max_age);
        let dropped = before - self.history.len();
        if dropped > 0 {
            tracing::trace!(dropped, "swept idle tau regions");
        }
        self.last_sweep = now;
    }

    pub fn tracked_regions(&self) -> usize {
        self.history.len()
    }
}

impl Default for TauEstimator {
    fn default() -> Self {
        Self::new(TauConfig::default())
    }
}

/// Classify a tau observation into a danger level with an urgency score.
///
/// An accelerating approach (tau shrinking) raises urgency; a decelerating
/// one lowers it.
pub fn classify_tau(tau: f64, tau_dot: Option<f64>) -> (TauDanger, f64) {
    if tau <= 0.0 {
        return (TauDanger::Safe, 0.0);
    }

    let (level, mut urgency) = if tau < 0.5 {
        (TauDanger::Danger, 1.0)
    } else if tau < 1.0 {
        (TauDanger::Warning, 0.7)
    } else if tau < 2.0 {
        (TauDanger::Caution, 0.4)
    } else {
        (TauDanger::Safe, (1.0 - tau / 10.0).max(0.0))
    };

    if let Some(td) = tau_dot {
        if td < -0.1 {
            urgency = (urgency * 1.5).min(1.0);
        } else if td > 0.1 {
            urgency = (urgency * 0.7).max(0.0);
        }
    }

    (level, urgency)
}

/// Bulk tau from a divergence field: `tau = 1/div` where the divergence
/// indicates expansion, scaled down when the mean flow magnitude over the
/// expanding cells is large. Non-expanding cells get infinity.
pub fn tau_map_from_divergence(divergence: &[f64], magnitude: &[f32]) -> Vec<f64> {
    debug_assert_eq!(divergence.len(), magnitude.len());
    let mut tau_map = vec![f64::INFINITY; divergence.len()];

    let mut mag_sum = 0.0f64;
    let mut n = 0usize;
    for (i, &div) in divergence.iter().enumerate() {
        if div > 0.01 {
            mag_sum += magnitude[i] as f64;
            n += 1;
        }
    }
    if n == 0 {
        return tau_map;
    }
    let avg_magnitude = mag_sum / n as f64;
    let scale = if avg_magnitude > 1.0 {
        10.0 / avg_magnitude
    } else {
        1.0
    };

    for (i, &div) in divergence.iter().enumerate() {
        if div > 0.01 {
            tau_map[i] = scale / (div + 1e-6);
        }
    }
    tau_map
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn single_sample_yields_nothing() {
        let mut est = TauEstimator::default();
        assert!(est.update(1, 20.0, 0.0).is_none());
        // Second sample at a distinct time produces an estimate.
        let s = est.update(1, 25.0, 0.1).expect("two samples suffice");
        assert!(s.tau > 0.0);
    }

    #[test]
    fn approaching_series_classifies_warning() {
        // Sizes [20, 22, 25, 29] at 0.1 s steps: final tau = 29 / 40 = 0.725.
        let mut est = TauEstimator::default();
        let sizes = [20.0, 22.0, 25.0, 29.0];
        let mut last = None;
        for (i, &s) in sizes.iter().enumerate() {
            last = est.update(7, s, i as f64 * 0.1);
        }
        let s = last.expect("final sample produces tau");
        assert_relative_eq!(s.tau, 0.725, epsilon = 1e-9);
        let (level, urgency) = classify_tau(s.tau, s.tau_dot);
        assert_eq!(level, TauDanger::Warning);
        assert!(urgency > 0.0);
    }

    #[test]
    fn undersized_region_is_ignored() {
        let mut est = TauEstimator::default();
        assert!(est.update(1, 5.0, 0.0).is_none());
        assert!(est.update(1, 5.0, 0.1).is_none());
        assert_eq!(est.tracked_regions(), 0);
    }

    #[test]
    fn receding_object_yields_nothing() {
        let mut est = TauEstimator::default();
        est.update(1, 30.0, 0.0);
        // Shrinking: negative tau, suppressed.
        assert!(est.update(1, 25.0, 0.1).is_none());
    }

    #[test]
    fn insignificant_rate_yields_nothing() {
        let mut est = TauEstimator::default();
        est.update(1, 20.0, 0.0);
        assert!(est.update(1, 20.005, 0.1).is_none());
    }

    #[test]
    fn history_is_bounded() {
        let mut est = TauEstimator::default();
        for i in 0..50 {
            est.update(1, 20.0 + i as f64, i as f64 * 0.01);
        }
        let h = est.history.get(&1).unwrap();
        assert!(h.samples.len() <= HISTORY_CAP);
    }

    #[test]
    fn idle_regions_are_swept() {
        let mut est = TauEstimator::default();
        est.update(1, 20.0, 0.0);
        est.update(2, 20.0, 2.5);
        est.sweep(3.0);
        // Region 1 last seen at t=0, older than the 2 s limit.
        assert_eq!(est.tracked_regions(), 1);
    }

    #[test]
    fn tau_dot_appears_at_third_sample() {
        let mut est = TauEstimator::default();
        est.update(1, 20.0, 0.0);
        let s2 = est.update(1, 24.0, 0.1).unwrap();
        assert!(s2.tau_dot.is_none());
        let s3 = est.update(1, 29.0, 0.2).unwrap();
        assert!(s3.tau_dot.is_some());
    }

    #[test]
    fn urgency_scales_with_tau_dot() {
        let (_, base) = classify_tau(1.5, None);
        let (_, accel) = classify_tau(1.5, Some(-0.5));
        let (_, decel) = classify_tau(1.5, Some(0.5));
        assert!(accel > base);
        assert!(decel < base);
    }

    #[test]
    fn simple_tau_respects_gates() {
        let est = TauEstimator::default();
        assert_eq!(est.compute_tau_simple(20.0, 24.0, 0.1), Some(24.0 / 40.0));
        assert!(est.compute_tau_simple(5.0, 24.0, 0.1).is_none());
        assert!(est.compute_tau_simple(24.0, 20.0, 0.1).is_none());
        assert!(est.compute_tau_simple(20.0, 24.0, 0.0).is_none());
    }

    #[test]
    fn bulk_tau_map_marks_non_expanding_cells_infinite() {
        let div = [0.0, 0.5, 2.0, -1.0];
        let mag = [0.0f32, 0.5, 0.5, 3.0];
        let tau = tau_map_from_divergence(&div, &mag);
        assert!(tau[0].is_infinite());
        assert!(tau[3].is_infinite());
        assert!(tau[1].is_finite() && tau[2].is_finite());
        assert!(tau[1] > tau[2]);
    }
}
