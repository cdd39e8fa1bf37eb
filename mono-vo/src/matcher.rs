//! Brute-force Hamming matching with the Lowe ratio test.

use crate::features::{FeatureSet, DESCRIPTOR_BYTES};

pub const LOWE_RATIO: f32 = 0.75;

/// A correspondence between a query (previous frame) and train (current
/// frame) feature.
#[derive(Debug, Clone, Copy)]
pub struct FeatureMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: u32,
}

#[inline]
fn hamming(a: &[u8; DESCRIPTOR_BYTES], b: &[u8; DESCRIPTOR_BYTES]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum()
}

/// k=2 nearest-neighbor matching from `query` into `train`, keeping a match
/// only when the best distance beats `LOWE_RATIO` times the second best.
pub fn match_features(query: &FeatureSet, train: &FeatureSet) -> Vec<FeatureMatch> {
    let mut out = Vec::new();
    if train.descriptors.len() < 2 {
        return out;
    }
    for (qi, qd) in query.descriptors.iter().enumerate() {
        let mut best = u32::MAX;
        let mut best_idx = 0usize;
        let mut second = u32::MAX;
        for (ti, td) in train.descriptors.iter().enumerate() {
            let d = hamming(qd, td);
            if d < best {
                second = best;
                best = d;
                best_idx = ti;
            } else if d < second {
                second = d;
            }
        }
        if (best as f32) < LOWE_RATIO * second as f32 {
            out.push(FeatureMatch {
                query_idx: qi,
                train_idx: best_idx,
                distance: best,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Keypoint;

    fn fs(descs: Vec<[u8; DESCRIPTOR_BYTES]>) -> FeatureSet {
        let keypoints = descs
            .iter()
            .enumerate()
            .map(|(i, _)| Keypoint {
                x: i as f32,
                y: 0.0,
                response: 1.0,
                octave: 0,
                angle: 0.0,
            })
            .collect();
        FeatureSet {
            keypoints,
            descriptors: descs,
            frame_index: 0,
        }
    }

    #[test]
    fn unambiguous_match_survives_ratio_test() {
        let d0 = [0u8; DESCRIPTOR_BYTES];
        let mut d1 = [0u8; DESCRIPTOR_BYTES];
        d1[0] = 0xff; // distance 8 from d0
        let mut far = [0xffu8; DESCRIPTOR_BYTES]; // far from both
        far[0] = 0;

        let query = fs(vec![d0]);
        let train = fs(vec![d1, far]);
        let m = match_features(&query, &train);
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].train_idx, 0);
        assert_eq!(m[0].distance, 8);
    }

    #[test]
    fn ambiguous_match_is_rejected() {
        let d = [0xaau8; DESCRIPTOR_BYTES];
        let query = fs(vec![d]);
        // Two identical train descriptors: best == second best.
        let train = fs(vec![d, d]);
        let m = match_features(&query, &train);
        assert!(m.is_empty());
    }

    #[test]
    fn tiny_train_set_matches_nothing() {
        let d = [1u8; DESCRIPTOR_BYTES];
        let query = fs(vec![d]);
        let train = fs(vec![d]);
        assert!(match_features(&query, &train).is_empty());
    }
}
