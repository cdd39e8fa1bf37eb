use machine_vision_formats::{pixel_format::Mono8, ImageStride};

use crate::{
    pyramid::{GrayMap, Pyramid},
    FlowPoint,
};

/// Pyramidal Lucas-Kanade parameters.
#[derive(Debug, Clone, Copy)]
pub struct LkConfig {
    /// Side of the square correlation window, in pixels.
    pub window: usize,
    pub levels: usize,
    pub max_iterations: usize,
    /// Iteration stops when the update step is below this, in pixels.
    pub epsilon: f32,
}

impl Default for LkConfig {
    fn default() -> Self {
        Self {
            window: 15,
            levels: 2,
            max_iterations: 10,
            epsilon: 0.03,
        }
    }
}

/// Result of tracking one point.
#[derive(Debug, Clone, Copy)]
pub struct TrackedPoint {
    pub point: FlowPoint,
    /// True when the solver converged with an invertible gradient tensor
    /// and the point stayed inside the image.
    pub status: bool,
}

/// Track `points` from `prev` into `next`.
pub fn track_points<IM1, IM2>(
    prev: &IM1,
    next: &IM2,
    points: &[FlowPoint],
    cfg: &LkConfig,
) -> Vec<TrackedPoint>
where
    IM1: ImageStride<Mono8>,
    IM2: ImageStride<Mono8>,
{
    let prev_pyr = Pyramid::build(prev, cfg.levels);
    let next_pyr = Pyramid::build(next, cfg.levels);
    track_points_pyr(&prev_pyr, &next_pyr, points, cfg)
}

/// As [`track_points`] but with caller-provided pyramids.
pub fn track_points_pyr(
    prev: &Pyramid,
    next: &Pyramid,
    points: &[FlowPoint],
    cfg: &LkConfig,
) -> Vec<TrackedPoint> {
    points
        .iter()
        .map(|p| track_one(prev, next, *p, cfg))
        .collect()
}

fn track_one(prev: &Pyramid, next: &Pyramid, p: FlowPoint, cfg: &LkConfig) -> TrackedPoint {
    let nlevels = cfg.levels.min(prev.num_levels()).min(next.num_levels());
    let top = nlevels.saturating_sub(1);

    // Flow estimate carried down the pyramid.
    let mut vx = 0.0f32;
    let mut vy = 0.0f32;
    let mut ok = false;

    for level in (0..nlevels).rev() {
        let s = (1 << level) as f32;
        let px = p.x / s;
        let py = p.y / s;
        if level < top {
            vx *= 2.0;
            vy *= 2.0;
        }
        match solve_level(prev.level(level), next.level(level), px, py, vx, vy, cfg) {
            Some((nvx, nvy)) => {
                vx = nvx;
                vy = nvy;
                ok = true;
            }
            None => {
                // Keep the coarse estimate; one failed level is not fatal
                // unless it is the base level.
                if level == 0 {
                    ok = false;
                }
            }
        }
    }

    let tracked = FlowPoint::new(p.x + vx, p.y + vy);
    let base = next.level(0);
    let in_bounds = tracked.x >= 0.0
        && tracked.y >= 0.0
        && tracked.x < base.width() as f32
        && tracked.y < base.height() as f32;

    TrackedPoint {
        point: tracked,
        status: ok && in_bounds,
    }
}

/// One iterative LK solve at a single pyramid level. Returns the refined
/// flow or None when the spatial gradient tensor is degenerate.
#[allow(clippy::too_many_arguments)]
fn solve_level(
    prev: &GrayMap,
    next: &GrayMap,
    px: f32,
    py: f32,
    mut vx: f32,
    mut vy: f32,
    cfg: &LkConfig,
) -> Option<(f32, f32)> {
    let r = (cfg.window / 2) as i32;

    // Window gradients and the structure tensor from the previous image.
    let n = (2 * r + 1) * (2 * r + 1);
    let mut gx = Vec::with_capacity(n as usize);
    let mut gy = Vec::with_capacity(n as usize);
    let mut pv = Vec::with_capacity(n as usize);
    let mut sxx = 0.0f32;
    let mut sxy = 0.0f32;
    let mut syy = 0.0f32;
    for dy in -r..=r {
        for dx in -r..=r {
            let x = px + dx as f32;
            let y = py + dy as f32;
            let ix = (prev.sample(x + 1.0, y) - prev.sample(x - 1.0, y)) * 0.5;
            let iy = (prev.sample(x, y + 1.0) - prev.sample(x, y - 1.0)) * 0.5;
            gx.push(ix);
            gy.push(iy);
            pv.push(prev.sample(x, y));
            sxx += ix * ix;
            sxy += ix * iy;
            syy += iy * iy;
        }
    }

    let det = sxx * syy - sxy * sxy;
    if det.abs() < 1e-4 {
        return None;
    }
    let inv = 1.0 / det;

    for _ in 0..cfg.max_iterations {
        let mut bx = 0.0f32;
        let mut by = 0.0f32;
        let mut i = 0usize;
        for dy in -r..=r {
            for dx in -r..=r {
                let x = px + dx as f32;
                let y = py + dy as f32;
                let dt = pv[i] - next.sample(x + vx, y + vy);
                bx += dt * gx[i];
                by += dt * gy[i];
                i += 1;
            }
        }
        let dvx = inv * (syy * bx - sxy * by);
        let dvy = inv * (sxx * by - sxy * bx);
        vx += dvx;
        vy += dvy;
        if (dvx * dvx + dvy * dvy).sqrt() < cfg.epsilon {
            break;
        }
    }
    Some((vx, vy))
}
