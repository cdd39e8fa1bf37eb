//! Oriented binary features over a scale pyramid.
//!
//! FAST segment-test corners on each of 8 levels (scale factor 1.2), an
//! intensity-centroid orientation, and a 256-bit rotation-steered binary
//! descriptor. The descriptor sampling pattern is generated once from a
//! fixed seed so two sessions over the same frames produce identical
//! descriptors.

use flowops::GrayMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::OnceLock;

pub const DESCRIPTOR_BYTES: usize = 32;
const PATTERN_SEED: u64 = 0x0b5e_55ed_0b5e_55ed;
const FAST_THRESHOLD: i16 = 20;
const FAST_ARC: usize = 9;
const PATCH_RADIUS: i32 = 15;

/// One detected keypoint in level-0 pixel coordinates.
#[derive(Debug, Clone, Copy)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub response: f32,
    pub octave: usize,
    /// Orientation in radians from the intensity centroid.
    pub angle: f32,
}

/// Keypoints plus their binary descriptors for one frame.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<[u8; DESCRIPTOR_BYTES]>,
    pub frame_index: u64,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Detector parameters.
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    pub max_features: usize,
    pub num_levels: usize,
    pub scale_factor: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            max_features: 1000,
            num_levels: 8,
            scale_factor: 1.2,
        }
    }
}

/// Detect keypoints and compute descriptors across the scale pyramid,
/// keeping the `max_features` strongest.
pub fn detect_and_compute(gray: &GrayMap, frame_index: u64, cfg: &DetectorConfig) -> FeatureSet {
    let pattern = brief_pattern();

    let mut levels = Vec::with_capacity(cfg.num_levels);
    levels.push(gray.clone());
    for i in 1..cfg.num_levels {
        let scale = cfg.scale_factor.powi(i as i32);
        let w = (gray.width() as f32 / scale) as u32;
        let h = (gray.height() as f32 / scale) as u32;
        if w < 32 || h < 32 {
            break;
        }
        levels.push(gray.resize(w, h));
    }

    let mut keypoints: Vec<(Keypoint, usize, f32, f32)> = Vec::new();
    for (octave, level) in levels.iter().enumerate() {
        let scale = cfg.scale_factor.powi(octave as i32);
        for (lx, ly, response) in fast_corners(level) {
            let angle = intensity_centroid_angle(level, lx, ly);
            keypoints.push((
                Keypoint {
                    x: lx as f32 * scale,
                    y: ly as f32 * scale,
                    response,
                    octave,
                    angle,
                },
                octave,
                lx as f32,
                ly as f32,
            ));
        }
    }

    keypoints.sort_by(|a, b| {
        b.0.response
            .partial_cmp(&a.0.response)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    keypoints.truncate(cfg.max_features);

    let mut out = FeatureSet {
        keypoints: Vec::with_capacity(keypoints.len()),
        descriptors: Vec::with_capacity(keypoints.len()),
        frame_index,
    };
    for (kp, octave, lx, ly) in keypoints {
        let level = &levels[octave];
        let desc = describe(level, lx, ly, kp.angle, pattern);
        out.keypoints.push(kp);
        out.descriptors.push(desc);
    }
    out
}

/// FAST-9 segment test with a 3x3 non-maximum suppression.
fn fast_corners(im: &GrayMap) -> Vec<(u32, u32, f32)> {
    const CIRCLE: [(i32, i32); 16] = [
        (0, -3),
        (1, -3),
        (2, -2),
        (3, -1),
        (3, 0),
        (3, 1),
        (2, 2),
        (1, 3),
        (0, 3),
        (-1, 3),
        (-2, 2),
        (-3, 1),
        (-3, 0),
        (-3, -1),
        (-2, -2),
        (-1, -3),
    ];

    let w = im.width();
    let h = im.height();
    if w < 8 || h < 8 {
        return Vec::new();
    }

    let mut scores = vec![0.0f32; (w * h) as usize];
    for y in 3..h - 3 {
        for x in 3..w - 3 {
            let p = im.get(x, y) as i16;
            let mut brighter = [false; 16];
            let mut darker = [false; 16];
            let mut diff_sum = 0.0f32;
            for (i, (dx, dy)) in CIRCLE.iter().enumerate() {
                let q = im.get((x as i32 + dx) as u32, (y as i32 + dy) as u32) as i16;
                let d = q - p;
                if d > FAST_THRESHOLD {
                    brighter[i] = true;
                    diff_sum += (d - FAST_THRESHOLD) as f32;
                } else if d < -FAST_THRESHOLD {
                    darker[i] = true;
                    diff_sum += (-d - FAST_THRESHOLD) as f32;
                }
            }
            if has_contiguous_arc(&brighter) || has_contiguous_arc(&darker) {
                scores[(y * w + x) as usize] = diff_sum;
            }
        }
    }

    let mut corners = Vec::new();
    for y in 3..h - 3 {
        for x in 3..w - 3 {
            let s = scores[(y * w + x) as usize];
            if s <= 0.0 {
                continue;
            }
            let mut is_max = true;
            'nbhd: for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let ni = ((y as i32 + dy) as u32 * w + (x as i32 + dx) as u32) as usize;
                    if scores[ni] > s {
                        is_max = false;
                        break 'nbhd;
                    }
                }
            }
            if is_max {
                corners.push((x, y, s));
            }
        }
    }
    corners
}

fn has_contiguous_arc(flags: &[bool; 16]) -> bool {
    let mut run = 0usize;
    // Walk twice around the circle to catch wrap-around arcs.
    for i in 0..32 {
        if flags[i % 16] {
            run += 1;
            if run >= FAST_ARC {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Orientation by intensity centroid over a circular patch.
fn intensity_centroid_angle(im: &GrayMap, x: u32, y: u32) -> f32 {
    let mut m10 = 0.0f32;
    let mut m01 = 0.0f32;
    let r2 = (PATCH_RADIUS * PATCH_RADIUS) as i32;
    for dy in -PATCH_RADIUS..=PATCH_RADIUS {
        for dx in -PATCH_RADIUS..=PATCH_RADIUS {
            if dx * dx + dy * dy > r2 {
                continue;
            }
            let v = im.get_clamped(x as i32 + dx, y as i32 + dy) as f32;
            m10 += dx as f32 * v;
            m01 += dy as f32 * v;
        }
    }
    m01.atan2(m10)
}

/// Rotation-steered 256-bit binary descriptor.
fn describe(
    im: &GrayMap,
    x: f32,
    y: f32,
    angle: f32,
    pattern: &[(i8, i8, i8, i8); 256],
) -> [u8; DESCRIPTOR_BYTES] {
    let (sin, cos) = angle.sin_cos();
    let mut desc = [0u8; DESCRIPTOR_BYTES];
    for (bit, (ax, ay, bx, by)) in pattern.iter().enumerate() {
        let rotate = |px: f32, py: f32| -> (f32, f32) {
            (px * cos - py * sin, px * sin + py * cos)
        };
        let (r1x, r1y) = rotate(*ax as f32, *ay as f32);
        let (r2x, r2y) = rotate(*bx as f32, *by as f32);
        let i1 = im.sample(x + r1x, y + r1y);
        let i2 = im.sample(x + r2x, y + r2y);
        if i1 < i2 {
            desc[bit / 8] |= 1 << (bit % 8);
        }
    }
    desc
}

/// The 256 comparison pairs of the descriptor, generated once per process
/// from a fixed seed.
fn brief_pattern() -> &'static [(i8, i8, i8, i8); 256] {
    static PATTERN: OnceLock<[(i8, i8, i8, i8); 256]> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut rng = ChaCha8Rng::seed_from_u64(PATTERN_SEED);
        let mut pattern = [(0i8, 0i8, 0i8, 0i8); 256];
        for p in pattern.iter_mut() {
            let r = PATCH_RADIUS as i8;
            *p = (
                rng.random_range(-r..=r),
                rng.random_range(-r..=r),
                rng.random_range(-r..=r),
                rng.random_range(-r..=r),
            );
        }
        pattern
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn textured_image(w: u32, h: u32, shift: u32) -> GrayMap {
        // Blocky pseudo-random texture, deterministic in (x, y).
        let mut data = vec![0u8; (w * h) as usize];
        for y in 0..h {
            for x in 0..w {
                let xs = x.wrapping_add(shift);
                let v = (xs.wrapping_mul(31).wrapping_add(y.wrapping_mul(57)) / 8) % 251;
                data[(y * w + x) as usize] = if (xs / 8 + y / 8) % 2 == 0 {
                    (v as u8).saturating_add(80)
                } else {
                    v as u8 / 3
                };
            }
        }
        GrayMap::new(w, h, data)
    }

    #[test]
    fn descriptor_count_matches_keypoint_count() {
        let im = textured_image(160, 120, 0);
        let fs = detect_and_compute(&im, 0, &DetectorConfig::default());
        assert_eq!(fs.keypoints.len(), fs.descriptors.len());
        assert!(!fs.is_empty(), "expected corners on a textured image");
    }

    #[test]
    fn detection_is_deterministic() {
        let im = textured_image(160, 120, 3);
        let a = detect_and_compute(&im, 0, &DetectorConfig::default());
        let b = detect_and_compute(&im, 1, &DetectorConfig::default());
        assert_eq!(a.len(), b.len());
        for (da, db) in a.descriptors.iter().zip(b.descriptors.iter()) {
            assert_eq!(da, db);
        }
    }

    #[test]
    fn respects_feature_cap() {
        let im = textured_image(320, 240, 0);
        let cfg = DetectorConfig {
            max_features: 50,
            ..DetectorConfig::default()
        };
        let fs = detect_and_compute(&im, 0, &cfg);
        assert!(fs.len() <= 50);
    }
}
