use machine_vision_formats::{pixel_format::Mono8, ImageStride};

use crate::{pyramid::GrayMap, FlowPoint};

/// Shi-Tomasi corner selection parameters.
#[derive(Debug, Clone, Copy)]
pub struct CornerConfig {
    pub max_corners: usize,
    /// Fraction of the strongest response below which candidates are
    /// rejected.
    pub quality_level: f32,
    /// Minimum pixel distance between accepted corners.
    pub min_distance: f32,
    /// Side of the window over which the structure tensor is summed.
    pub block_size: usize,
}

impl Default for CornerConfig {
    fn default() -> Self {
        Self {
            max_corners: 150,
            quality_level: 0.01,
            min_distance: 10.0,
            block_size: 7,
        }
    }
}

/// Select up to `max_corners` Shi-Tomasi corners, strongest first, with
/// greedy minimum-distance suppression.
pub fn good_features_to_track<IM: ImageStride<Mono8>>(
    im: &IM,
    cfg: &CornerConfig,
) -> Vec<FlowPoint> {
    let gray = GrayMap::copy_from(im);
    good_features_gray(&gray, cfg)
}

pub(crate) fn good_features_gray(gray: &GrayMap, cfg: &CornerConfig) -> Vec<FlowPoint> {
    let w = gray.width() as usize;
    let h = gray.height() as usize;
    if w < cfg.block_size + 2 || h < cfg.block_size + 2 {
        return Vec::new();
    }

    // Sobel gradient products.
    let mut ix2 = vec![0.0f32; w * h];
    let mut iy2 = vec![0.0f32; w * h];
    let mut ixy = vec![0.0f32; w * h];
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let gx = sobel_x(gray, x as i32, y as i32);
            let gy = sobel_y(gray, x as i32, y as i32);
            let i = y * w + x;
            ix2[i] = gx * gx;
            iy2[i] = gy * gy;
            ixy[i] = gx * gy;
        }
    }

    // Box-filter the tensor components, separably.
    let r = cfg.block_size / 2;
    let sxx = box_filter(&ix2, w, h, r);
    let syy = box_filter(&iy2, w, h, r);
    let sxy = box_filter(&ixy, w, h, r);

    // Minimum eigenvalue response.
    let mut response = vec![0.0f32; w * h];
    let mut max_response = 0.0f32;
    for i in 0..w * h {
        let a = sxx[i];
        let b = sxy[i];
        let c = syy[i];
        let tr = a + c;
        let det_part = ((a - c) * (a - c) + 4.0 * b * b).sqrt();
        let lambda_min = 0.5 * (tr - det_part);
        response[i] = lambda_min;
        if lambda_min > max_response {
            max_response = lambda_min;
        }
    }
    if max_response <= 0.0 {
        return Vec::new();
    }

    // 3x3 local maxima above the quality threshold.
    let threshold = cfg.quality_level * max_response;
    let mut candidates: Vec<(f32, usize, usize)> = Vec::new();
    let border = r.max(1);
    for y in border..h - border {
        for x in border..w - border {
            let v = response[y * w + x];
            if v < threshold {
                continue;
            }
            let mut is_max = true;
            'nbhd: for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let ni = (y as i32 + dy) as usize * w + (x as i32 + dx) as usize;
                    if response[ni] > v {
                        is_max = false;
                        break 'nbhd;
                    }
                }
            }
            if is_max {
                candidates.push((v, x, y));
            }
        }
    }

    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let min_d2 = cfg.min_distance * cfg.min_distance;
    let mut accepted: Vec<FlowPoint> = Vec::with_capacity(cfg.max_corners);
    for (_, x, y) in candidates {
        let p = FlowPoint::new(x as f32, y as f32);
        let far_enough = accepted.iter().all(|q| {
            let dx = p.x - q.x;
            let dy = p.y - q.y;
            dx * dx + dy * dy >= min_d2
        });
        if far_enough {
            accepted.push(p);
            if accepted.len() >= cfg.max_corners {
                break;
            }
        }
    }
    accepted
}

#[inline]
fn sobel_x(g: &GrayMap, x: i32, y: i32) -> f32 {
    let p = |dx: i32, dy: i32| g.get_clamped(x + dx, y + dy) as f32;
    (p(1, -1) + 2.0 * p(1, 0) + p(1, 1)) - (p(-1, -1) + 2.0 * p(-1, 0) + p(-1, 1))
}

#[inline]
fn sobel_y(g: &GrayMap, x: i32, y: i32) -> f32 {
    let p = |dx: i32, dy: i32| g.get_clamped(x + dx, y + dy) as f32;
    (p(-1, 1) + 2.0 * p(0, 1) + p(1, 1)) - (p(-1, -1) + 2.0 * p(0, -1) + p(1, -1))
}

/// Separable box sum with radius `r` (clamped at borders).
fn box_filter(src: &[f32], w: usize, h: usize, r: usize) -> Vec<f32> {
    let r = r as i32;
    let mut tmp = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for dx in -r..=r {
                let sx = (x as i32 + dx).clamp(0, w as i32 - 1) as usize;
                acc += src[y * w + sx];
            }
            tmp[y * w + x] = acc;
        }
    }
    let mut out = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for dy in -r..=r {
                let sy = (y as i32 + dy).clamp(0, h as i32 - 1) as usize;
                acc += tmp[sy * w + x];
            }
            out[y * w + x] = acc;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(w: u32, h: u32, sq: u32) -> GrayMap {
        let mut data = vec![0u8; (w * h) as usize];
        for y in 0..h {
            for x in 0..w {
                if ((x / sq) + (y / sq)) % 2 == 0 {
                    data[(y * w + x) as usize] = 255;
                }
            }
        }
        GrayMap::new(w, h, data)
    }

    #[test]
    fn finds_corners_on_checkerboard() {
        let g = checkerboard(96, 96, 16);
        let pts = good_features_gray(&g, &CornerConfig::default());
        assert!(pts.len() >= 10, "found {} corners", pts.len());
    }

    #[test]
    fn respects_min_distance() {
        let g = checkerboard(96, 96, 16);
        let cfg = CornerConfig {
            min_distance: 12.0,
            ..CornerConfig::default()
        };
        let pts = good_features_gray(&g, &cfg);
        for (i, a) in pts.iter().enumerate() {
            for b in pts.iter().skip(i + 1) {
                let d2 = (a.x - b.x).powi(2) + (a.y - b.y).powi(2);
                assert!(d2 >= 12.0 * 12.0 - 1e-3);
            }
        }
    }

    #[test]
    fn flat_image_yields_nothing() {
        let g = GrayMap::new(64, 64, vec![128; 64 * 64]);
        let pts = good_features_gray(&g, &CornerConfig::default());
        assert!(pts.is_empty());
    }
}
