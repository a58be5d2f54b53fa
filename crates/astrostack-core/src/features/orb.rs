//! Oriented FAST and rotated BRIEF.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{fast, to_f32, Descriptors, DistanceMetric, FeatureDetector, FeatureSet, Keypoint};
use crate::filters::{gaussian_blur, resize};

/// Bytes in a 256-bit BRIEF descriptor.
pub const DESCRIPTOR_BYTES: usize = 32;

const PATTERN_SEED: u64 = 0x0b1f_5eed;
/// Test points lie within this radius, so a rotated pattern stays inside
/// the edge margin.
const PATTERN_RADIUS: i32 = 13;
const HARRIS_BLOCK: isize = 3;
const HARRIS_K: f32 = 0.04;
const DESCRIPTOR_BLUR_SIGMA: f32 = 2.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbParams {
    /// Maximum number of features kept over all levels.
    pub max_features: usize,
    /// Downscale ratio between pyramid levels.
    pub scale_factor: f32,
    pub levels: usize,
    /// FAST intensity threshold on the 0..255 scale.
    pub fast_threshold: f32,
    /// Margin without features; also the orientation patch diameter.
    pub edge_threshold: usize,
}

impl Default for OrbParams {
    fn default() -> Self {
        Self {
            max_features: 500,
            scale_factor: 1.2,
            levels: 8,
            fast_threshold: 20.0,
            edge_threshold: 31,
        }
    }
}

pub struct OrbDetector {
    params: OrbParams,
    pattern: Vec<[(i32, i32); 2]>,
}

impl OrbDetector {
    pub fn new(params: OrbParams) -> Self {
        Self {
            params,
            pattern: brief_pattern(),
        }
    }

    /// Feature budget per level, geometric in the scale factor.
    fn level_budgets(&self, levels: usize) -> Vec<usize> {
        let inv = 1.0 / self.params.scale_factor;
        let first = self.params.max_features as f32 * (1.0 - inv) / (1.0 - inv.powi(levels as i32));
        let mut budgets: Vec<usize> = (0..levels).map(|l| (first * inv.powi(l as i32)).round() as usize).collect();
        let assigned: usize = budgets.iter().take(levels.saturating_sub(1)).sum();
        if let Some(last) = budgets.last_mut() {
            *last = self.params.max_features.saturating_sub(assigned);
        }
        budgets
    }

    fn detect_level(&self, level: usize, image: &Array2<f32>, budget: usize) -> Vec<(Keypoint, [u8; DESCRIPTOR_BYTES])> {
        let scale = self.params.scale_factor.powi(level as i32);
        let border = self.params.edge_threshold;
        let half_patch = (self.params.edge_threshold / 2) as isize;

        let mut corners: Vec<(fast::Corner, f32)> = fast::detect(image, self.params.fast_threshold, border)
            .into_iter()
            .map(|c| (c, harris_response(image, c.x, c.y)))
            .collect();
        corners.sort_by(|a, b| b.1.total_cmp(&a.1));
        corners.truncate(budget);

        let smoothed = gaussian_blur(image, DESCRIPTOR_BLUR_SIGMA);
        corners
            .into_iter()
            .map(|(c, response)| {
                let angle = intensity_centroid_angle(image, c.x, c.y, half_patch);
                let descriptor = self.describe(&smoothed, c.x, c.y, angle);
                let keypoint = Keypoint {
                    x: c.x as f32 * scale,
                    y: c.y as f32 * scale,
                    response,
                    angle,
                    octave: level,
                    size: self.params.edge_threshold as f32 * scale,
                };
                (keypoint, descriptor)
            })
            .collect()
    }

    fn describe(&self, smoothed: &Array2<f32>, x: usize, y: usize, angle: f32) -> [u8; DESCRIPTOR_BYTES] {
        let (sin, cos) = angle.sin_cos();
        let (h, w) = smoothed.dim();
        let at = |px: i32, py: i32| -> f32 {
            let rx = (px as f32 * cos - py as f32 * sin).round() as isize;
            let ry = (px as f32 * sin + py as f32 * cos).round() as isize;
            let sx = (x as isize + rx).clamp(0, w as isize - 1) as usize;
            let sy = (y as isize + ry).clamp(0, h as isize - 1) as usize;
            smoothed[[sy, sx]]
        };

        let mut descriptor = [0u8; DESCRIPTOR_BYTES];
        for (bit, [a, b]) in self.pattern.iter().enumerate() {
            if at(a.0, a.1) < at(b.0, b.1) {
                descriptor[bit / 8] |= 1 << (bit % 8);
            }
        }
        descriptor
    }
}

impl FeatureDetector for OrbDetector {
    fn detect(&self, image: &Array2<u8>) -> FeatureSet {
        let base = to_f32(image);
        let (h, w) = base.dim();
        let min_size = 2 * self.params.edge_threshold + 1;

        let mut pyramid = vec![base];
        for level in 1..self.params.levels {
            let scale = self.params.scale_factor.powi(level as i32);
            let lh = (h as f32 / scale).round() as usize;
            let lw = (w as f32 / scale).round() as usize;
            if lh < min_size || lw < min_size {
                break;
            }
            pyramid.push(resize(&pyramid[0], lh, lw));
        }

        let budgets = self.level_budgets(pyramid.len());
        let found: Vec<(Keypoint, [u8; DESCRIPTOR_BYTES])> = pyramid
            .par_iter()
            .enumerate()
            .flat_map_iter(|(level, img)| self.detect_level(level, img, budgets[level]))
            .collect();

        let (keypoints, rows): (Vec<Keypoint>, Vec<[u8; DESCRIPTOR_BYTES]>) = found.into_iter().unzip();
        FeatureSet::new(keypoints, Descriptors::from_binary_rows(&rows)).unwrap_or_else(|_| FeatureSet::empty(DistanceMetric::Hamming))
    }

    fn metric(&self) -> DistanceMetric {
        DistanceMetric::Hamming
    }
}

/// Fixed-seed sampling pattern of 256 point pairs.
fn brief_pattern() -> Vec<[(i32, i32); 2]> {
    let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
    let mut point = || {
        loop {
            let p = (
                rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS),
                rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS),
            );
            if p.0 * p.0 + p.1 * p.1 <= PATTERN_RADIUS * PATTERN_RADIUS {
                return p;
            }
        }
    };
    (0..DESCRIPTOR_BYTES * 8).map(|_| [point(), point()]).collect()
}

/// Harris corner measure over a small window of central-difference gradients.
fn harris_response(image: &Array2<f32>, x: usize, y: usize) -> f32 {
    let (h, w) = image.dim();
    let (mut sxx, mut syy, mut sxy) = (0.0f32, 0.0f32, 0.0f32);
    for dy in -HARRIS_BLOCK..=HARRIS_BLOCK {
        for dx in -HARRIS_BLOCK..=HARRIS_BLOCK {
            let cy = (y as isize + dy).clamp(1, h as isize - 2) as usize;
            let cx = (x as isize + dx).clamp(1, w as isize - 2) as usize;
            let gx = (image[[cy, cx + 1]] - image[[cy, cx - 1]]) * 0.5;
            let gy = (image[[cy + 1, cx]] - image[[cy - 1, cx]]) * 0.5;
            sxx += gx * gx;
            syy += gy * gy;
            sxy += gx * gy;
        }
    }
    let trace = sxx + syy;
    sxx * syy - sxy * sxy - HARRIS_K * trace * trace
}

/// Orientation from the intensity centroid of a circular patch.
fn intensity_centroid_angle(image: &Array2<f32>, x: usize, y: usize, radius: isize) -> f32 {
    let (h, w) = image.dim();
    let (mut m01, mut m10) = (0.0f32, 0.0f32);
    for dy in -radius..=radius {
        let span = ((radius * radius - dy * dy) as f32).sqrt() as isize;
        for dx in -span..=span {
            let py = y as isize + dy;
            let px = x as isize + dx;
            if py < 0 || px < 0 || py >= h as isize || px >= w as isize {
                continue;
            }
            let v = image[[py as usize, px as usize]];
            m10 += dx as f32 * v;
            m01 += dy as f32 * v;
        }
    }
    m01.atan2(m10)
}
