//! Projective transform estimation with RANSAC.

use nalgebra::{DMatrix, Matrix3, Vector3, SVD};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consts::{
    DEFAULT_RANSAC_CONFIDENCE, DEFAULT_RANSAC_ITERATIONS, DEFAULT_RANSAC_SEED, DEFAULT_RANSAC_THRESHOLD,
    MIN_HOMOGRAPHY_DETERMINANT, MIN_HOMOGRAPHY_POINTS,
};
use crate::error::RegistrationError;

/// Twice the triangle area below which three points count as collinear.
const COLLINEAR_EPSILON: f64 = 1e-6;

/// A 3x3 projective transform mapping candidate coordinates to reference
/// coordinates, normalized so the bottom-right entry is 1.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography(Matrix3<f64>);

impl Homography {
    pub fn identity() -> Self {
        Self(Matrix3::identity())
    }

    pub fn translation(dx: f64, dy: f64) -> Self {
        Self(Matrix3::new(1.0, 0.0, dx, 0.0, 1.0, dy, 0.0, 0.0, 1.0))
    }

    /// Wrap a matrix, normalizing its scale. `None` when `m[(2, 2)]` is zero.
    pub fn from_matrix(m: Matrix3<f64>) -> Option<Self> {
        let scale = m[(2, 2)];
        if scale.abs() < 1e-12 || !m.iter().all(|v| v.is_finite()) {
            return None;
        }
        Some(Self(m / scale))
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.0
    }

    /// Map `(x, y)`; `None` for points on the line at infinity.
    pub fn apply(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let p = self.0 * Vector3::new(x, y, 1.0);
        if p.z.abs() < 1e-12 {
            return None;
        }
        Some((p.x / p.z, p.y / p.z))
    }

    pub fn inverse(&self) -> Option<Self> {
        self.0.try_inverse().and_then(Self::from_matrix)
    }

    /// Determinant of the upper-left 2x2 block.
    pub fn linear_determinant(&self) -> f64 {
        self.0[(0, 0)] * self.0[(1, 1)] - self.0[(0, 1)] * self.0[(1, 0)]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    /// Maximum reprojection error of an inlier, in pixels.
    pub threshold: f64,
    pub max_iterations: usize,
    /// Confidence used to stop early once enough inliers are found.
    pub confidence: f64,
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_RANSAC_THRESHOLD,
            max_iterations: DEFAULT_RANSAC_ITERATIONS,
            confidence: DEFAULT_RANSAC_CONFIDENCE,
            seed: DEFAULT_RANSAC_SEED,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RansacFit {
    pub homography: Homography,
    /// Indices of the correspondences consistent with `homography`.
    pub inliers: Vec<usize>,
    pub iterations: usize,
}

/// Robustly estimate the homography taking `src` onto `dst`.
pub fn estimate_ransac(
    src: &[(f64, f64)],
    dst: &[(f64, f64)],
    params: &RansacParams,
) -> Result<RansacFit, RegistrationError> {
    let n = src.len().min(dst.len());
    if n < MIN_HOMOGRAPHY_POINTS {
        return Err(RegistrationError::InsufficientCorrespondences {
            found: n,
            required: MIN_HOMOGRAPHY_POINTS,
        });
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut sample = Vec::with_capacity(MIN_HOMOGRAPHY_POINTS);
    let mut best: Option<(Homography, Vec<usize>)> = None;
    let mut max_iterations = params.max_iterations.max(1);
    let mut iterations = 0;

    while iterations < max_iterations {
        iterations += 1;
        sample_indices(&mut rng, n, MIN_HOMOGRAPHY_POINTS, &mut sample);

        let s: Vec<(f64, f64)> = sample.iter().map(|&i| src[i]).collect();
        let d: Vec<(f64, f64)> = sample.iter().map(|&i| dst[i]).collect();
        if has_collinear_triple(&s) || has_collinear_triple(&d) {
            continue;
        }
        let Some(candidate) = estimate_dlt(&s, &d) else {
            continue;
        };

        let inliers = count_inliers(src, dst, &candidate, params.threshold);
        if best.as_ref().map_or(true, |(_, b)| inliers.len() > b.len()) {
            let ratio = inliers.len() as f64 / n as f64;
            max_iterations = max_iterations.min(adaptive_iterations(ratio, params.confidence).max(iterations));
            best = Some((candidate, inliers));
        }
    }

    let Some((model, inliers)) = best else {
        return Err(RegistrationError::Degenerate(
            "every sample was collinear or singular".into(),
        ));
    };
    if inliers.len() < MIN_HOMOGRAPHY_POINTS {
        return Err(RegistrationError::Degenerate(format!(
            "no consensus, best model has {} inliers",
            inliers.len()
        )));
    }

    let inlier_src: Vec<(f64, f64)> = inliers.iter().map(|&i| src[i]).collect();
    let inlier_dst: Vec<(f64, f64)> = inliers.iter().map(|&i| dst[i]).collect();
    let homography = estimate_dlt(&inlier_src, &inlier_dst).unwrap_or(model);
    let inliers = count_inliers(src, dst, &homography, params.threshold);

    let det = homography.linear_determinant();
    if det.abs() < MIN_HOMOGRAPHY_DETERMINANT {
        return Err(RegistrationError::Degenerate(format!("near-singular homography (det {det:e})")));
    }

    debug!(
        correspondences = n,
        inliers = inliers.len(),
        iterations,
        "Estimated homography"
    );
    Ok(RansacFit {
        homography,
        inliers,
        iterations,
    })
}

/// Normalized direct linear transform over four or more correspondences.
pub fn estimate_dlt(src: &[(f64, f64)], dst: &[(f64, f64)]) -> Option<Homography> {
    let n = src.len();
    if n < MIN_HOMOGRAPHY_POINTS || dst.len() != n {
        return None;
    }

    let (src_n, t_src) = normalize_points(src)?;
    let (dst_n, t_dst) = normalize_points(dst)?;

    let rows = (2 * n).max(9);
    let mut a = DMatrix::<f64>::zeros(rows, 9);
    for (i, (&(x, y), &(u, v))) in src_n.iter().zip(&dst_n).enumerate() {
        let r = 2 * i;
        a.row_mut(r).copy_from_slice(&[-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u]);
        a.row_mut(r + 1).copy_from_slice(&[0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v]);
    }

    let svd = SVD::new(a, false, true);
    let v_t = svd.v_t?;
    let smallest = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)?;
    let h = v_t.row(smallest);
    let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let t_dst_inv = t_dst.try_inverse()?;
    Homography::from_matrix(t_dst_inv * h_norm * t_src)
}

/// Translate to the centroid and scale to a mean distance of sqrt(2).
fn normalize_points(points: &[(f64, f64)]) -> Option<(Vec<(f64, f64)>, Matrix3<f64>)> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.1).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < 1e-10 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    let normalized = points.iter().map(|p| ((p.0 - cx) * s, (p.1 - cy) * s)).collect();
    let t = Matrix3::new(s, 0.0, -cx * s, 0.0, s, -cy * s, 0.0, 0.0, 1.0);
    Some((normalized, t))
}

fn count_inliers(src: &[(f64, f64)], dst: &[(f64, f64)], h: &Homography, threshold: f64) -> Vec<usize> {
    let limit = threshold * threshold;
    src.iter()
        .zip(dst)
        .enumerate()
        .filter_map(|(i, (&(x, y), &(u, v)))| {
            let (px, py) = h.apply(x, y)?;
            let err = (px - u).powi(2) + (py - v).powi(2);
            (err <= limit).then_some(i)
        })
        .collect()
}

fn has_collinear_triple(points: &[(f64, f64)]) -> bool {
    let n = points.len();
    for i in 0..n {
        for j in i + 1..n {
            for k in j + 1..n {
                let (a, b, c) = (points[i], points[j], points[k]);
                let cross = (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0);
                if cross.abs() < COLLINEAR_EPSILON {
                    return true;
                }
            }
        }
    }
    false
}

/// Iterations needed to draw one all-inlier sample with `confidence`.
fn adaptive_iterations(inlier_ratio: f64, confidence: f64) -> usize {
    if inlier_ratio >= 1.0 {
        return 1;
    }
    let all_inliers = inlier_ratio.powi(MIN_HOMOGRAPHY_POINTS as i32);
    if all_inliers <= 0.0 {
        return usize::MAX;
    }
    let denom = (1.0 - all_inliers).ln();
    if denom >= 0.0 {
        return usize::MAX;
    }
    ((1.0 - confidence).ln() / denom).ceil() as usize
}

/// Floyd's sampling of `k` distinct indices below `n`.
fn sample_indices(rng: &mut StdRng, n: usize, k: usize, out: &mut Vec<usize>) {
    out.clear();
    for j in n - k..n {
        let t = rng.gen_range(0..=j);
        if out.contains(&t) {
            out.push(j);
        } else {
            out.push(t);
        }
    }
}
