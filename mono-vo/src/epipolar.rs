//! Essential-matrix estimation and pose recovery.
//!
//! Camera-normalized coordinates throughout: pixel points are mapped
//! through the inverse intrinsics before entering the solver. The RANSAC
//! loop is seeded with a fixed constant so a given match set always yields
//! the same estimate.

use nalgebra::{DMatrix, Matrix3, Point2, Vector3};
use rand::{seq::index::sample, SeedableRng};
use rand_chacha::ChaCha8Rng;

use gnat_types::CameraIntrinsics;

const RANSAC_SEED: u64 = 0xe55e_0001;
const MAX_ITERATIONS: usize = 500;
const CHIRALITY_SAMPLE: usize = 100;

/// Recovered relative camera motion.
#[derive(Debug, Clone)]
pub struct MotionEstimate {
    /// Rotation applied to the accumulated orientation on accept.
    pub rotation: Matrix3<f64>,
    /// Unit-norm camera translation direction.
    pub translation: Vector3<f64>,
    pub inliers: usize,
}

/// Essential-matrix RANSAC solver.
#[derive(Debug, Clone)]
pub struct EpipolarSolver {
    intrinsics: CameraIntrinsics,
    /// RANSAC reprojection threshold in pixels.
    threshold_px: f64,
    probability: f64,
}

impl EpipolarSolver {
    pub fn new(intrinsics: CameraIntrinsics) -> Self {
        Self {
            intrinsics,
            threshold_px: 1.0,
            probability: 0.999,
        }
    }

    /// Estimate relative motion from matched pixel coordinates
    /// (`prev[i]` corresponds to `cur[i]`). Returns `None` on degenerate
    /// geometry.
    pub fn solve(&self, prev: &[Point2<f64>], cur: &[Point2<f64>]) -> Option<MotionEstimate> {
        if prev.len() < 8 || prev.len() != cur.len() {
            return None;
        }

        // Without parallax the essential matrix is unobservable; the SVD
        // would hand back noise. Require a mean disparity above the
        // reprojection threshold.
        let mean_disparity = prev
            .iter()
            .zip(cur.iter())
            .map(|(a, b)| (b - a).norm())
            .sum::<f64>()
            / prev.len() as f64;
        if mean_disparity < self.threshold_px {
            return None;
        }

        let x1: Vec<Point2<f64>> = prev.iter().map(|p| self.normalize(p)).collect();
        let x2: Vec<Point2<f64>> = cur.iter().map(|p| self.normalize(p)).collect();
        let threshold = self.threshold_px / self.intrinsics.focal_length;

        let mut rng = ChaCha8Rng::seed_from_u64(RANSAC_SEED);
        let n = x1.len();
        let mut best_inliers: Vec<usize> = Vec::new();
        let mut iterations = MAX_ITERATIONS;
        let mut iter = 0usize;
        while iter < iterations {
            iter += 1;
            let idx = sample(&mut rng, n, 8);
            let s1: Vec<Point2<f64>> = idx.iter().map(|i| x1[i]).collect();
            let s2: Vec<Point2<f64>> = idx.iter().map(|i| x2[i]).collect();
            let e = match eight_point(&s1, &s2) {
                Some(e) => e,
                None => continue,
            };
            let inliers: Vec<usize> = (0..n)
                .filter(|&i| sampson_distance(&e, &x1[i], &x2[i]) < threshold)
                .collect();
            if inliers.len() > best_inliers.len() {
                best_inliers = inliers;
                // Adapt the iteration budget to the observed inlier ratio.
                let w = best_inliers.len() as f64 / n as f64;
                let denom = (1.0 - w.powi(8)).max(1e-12).ln();
                if denom < 0.0 {
                    let needed = ((1.0 - self.probability).ln() / denom).ceil() as usize;
                    iterations = needed.clamp(iter, MAX_ITERATIONS);
                }
            }
        }

        if best_inliers.len() < 8 {
            return None;
        }

        // Refit on the consensus set.
        let in1: Vec<Point2<f64>> = best_inliers.iter().map(|&i| x1[i]).collect();
        let in2: Vec<Point2<f64>> = best_inliers.iter().map(|&i| x2[i]).collect();
        let e = eight_point(&in1, &in2)?;

        let (rotation, translation) = decompose(&e, &in1, &in2)?;
        Some(MotionEstimate {
            rotation,
            translation,
            inliers: best_inliers.len(),
        })
    }

    fn normalize(&self, p: &Point2<f64>) -> Point2<f64> {
        let (cx, cy) = self.intrinsics.principal_point;
        let f = self.intrinsics.focal_length;
        Point2::new((p.x - cx) / f, (p.y - cy) / f)
    }
}

/// Normalized 8-point algorithm: solve `x2' E x1 = 0` in a least-squares
/// sense and project onto the essential manifold.
fn eight_point(x1: &[Point2<f64>], x2: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    let n = x1.len();
    let mut rows = Vec::with_capacity(n * 9);
    for i in 0..n {
        let (a1, b1) = (x1[i].x, x1[i].y);
        let (a2, b2) = (x2[i].x, x2[i].y);
        rows.extend_from_slice(&[
            a2 * a1,
            a2 * b1,
            a2,
            b2 * a1,
            b2 * b1,
            b2,
            a1,
            b1,
            1.0,
        ]);
    }
    let a = DMatrix::from_row_slice(n, 9, &rows);

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let last = v_t.row(v_t.nrows() - 1);
    let e = Matrix3::new(
        last[0], last[1], last[2], last[3], last[4], last[5], last[6], last[7], last[8],
    );

    // Enforce the two-equal-singular-values structure.
    let svd_e = e.svd(true, true);
    let u = svd_e.u?;
    let v_t = svd_e.v_t?;
    let s = nalgebra::Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, 0.0));
    Some(u * s * v_t)
}

fn sampson_distance(e: &Matrix3<f64>, x1: &Point2<f64>, x2: &Point2<f64>) -> f64 {
    let p1 = Vector3::new(x1.x, x1.y, 1.0);
    let p2 = Vector3::new(x2.x, x2.y, 1.0);
    let ex1 = e * p1;
    let etx2 = e.transpose() * p2;
    let num = p2.dot(&ex1);
    let denom = ex1.x * ex1.x + ex1.y * ex1.y + etx2.x * etx2.x + etx2.y * etx2.y;
    if denom <= 0.0 {
        return f64::INFINITY;
    }
    (num * num / denom).sqrt()
}

/// Decompose E into the four (R, t) candidates and pick the one that puts
/// the most triangulated points in front of both cameras. The returned
/// motion is the camera motion: `R_cam = R'`, `t_cam = -R' t` of the
/// point-transform solution.
fn decompose(
    e: &Matrix3<f64>,
    x1: &[Point2<f64>],
    x2: &[Point2<f64>],
) -> Option<(Matrix3<f64>, Vector3<f64>)> {
    let svd = e.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;

    let mut u = u;
    let mut v_t = v_t;
    if u.determinant() < 0.0 {
        u = -u;
    }
    if v_t.determinant() < 0.0 {
        v_t = -v_t;
    }

    let w = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
    let r1 = u * w * v_t;
    let r2 = u * w.transpose() * v_t;
    let t = u.column(2).into_owned();

    let candidates = [
        (r1, t),
        (r1, -t),
        (r2, t),
        (r2, -t),
    ];

    let step = (x1.len() / CHIRALITY_SAMPLE).max(1);
    let mut best: Option<(usize, Matrix3<f64>, Vector3<f64>)> = None;
    for (r, t) in candidates.iter() {
        let mut good = 0usize;
        for i in (0..x1.len()).step_by(step) {
            if let Some(x) = triangulate(r, t, &x1[i], &x2[i]) {
                let depth1 = x.z;
                let depth2 = (r * x + t).z;
                if depth1 > 0.0 && depth2 > 0.0 {
                    good += 1;
                }
            }
        }
        if best.as_ref().map(|(g, _, _)| good > *g).unwrap_or(true) {
            best = Some((good, *r, *t));
        }
    }

    let (good, r, t) = best?;
    if good == 0 {
        return None;
    }

    // Convert the point transform (x2 = R x1 + t) into camera motion in the
    // previous camera's frame.
    let r_cam = r.transpose();
    let t_cam = -(r.transpose() * t);
    let norm = t_cam.norm();
    if norm <= 0.0 {
        return None;
    }
    Some((r_cam, t_cam / norm))
}

/// Linear (DLT) two-view triangulation with P1 = [I|0], P2 = [R|t].
fn triangulate(
    r: &Matrix3<f64>,
    t: &Vector3<f64>,
    x1: &Point2<f64>,
    x2: &Point2<f64>,
) -> Option<Vector3<f64>> {
    // Rows x*P.row(2) - P.row(0) and y*P.row(2) - P.row(1) for each view,
    // with P1 = [I|0].
    let p2 = |row: usize| [r[(row, 0)], r[(row, 1)], r[(row, 2)], t[row]];
    let r0 = p2(0);
    let r1 = p2(1);
    let r2 = p2(2);
    let mut rows = vec![-1.0, 0.0, x1.x, 0.0, 0.0, -1.0, x1.y, 0.0];
    rows.extend((0..4).map(|c| x2.x * r2[c] - r0[c]));
    rows.extend((0..4).map(|c| x2.y * r2[c] - r1[c]));
    let a = DMatrix::from_row_slice(4, 4, &rows);

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let h = v_t.row(v_t.nrows() - 1);
    if h[3].abs() < 1e-12 {
        return None;
    }
    Some(Vector3::new(h[0] / h[3], h[1] / h[3], h[2] / h[3]))
}
