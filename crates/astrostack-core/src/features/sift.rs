//! Scale-invariant feature transform.
//!
//! Difference-of-Gaussian extrema in a Gaussian scale space, refined to
//! sub-pixel position by a quadratic fit, oriented by a gradient histogram and
//! described by 4x4 spatial cells of 8 orientation bins.

use std::f32::consts::{PI, SQRT_2};

use nalgebra::{Matrix3, Vector3};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{to_f32, Descriptors, DistanceMetric, FeatureDetector, FeatureSet, Keypoint};
use crate::filters::gaussian_blur;
use crate::filters::sampling::decimate;

/// Length of a SIFT descriptor.
pub const DESCRIPTOR_LEN: usize = DESCRIPTOR_WIDTH * DESCRIPTOR_WIDTH * DESCRIPTOR_BINS;

const DESCRIPTOR_WIDTH: usize = 4;
const DESCRIPTOR_BINS: usize = 8;
const DESCRIPTOR_SCALE: f32 = 3.0;
const DESCRIPTOR_CLAMP: f32 = 0.2;
/// Blur assumed to be present in the input image.
const INITIAL_SIGMA: f32 = 0.5;
const IMAGE_BORDER: usize = 5;
const MAX_REFINE_STEPS: usize = 5;
const ORIENTATION_BINS: usize = 36;
const ORIENTATION_PEAK_RATIO: f32 = 0.8;
const ORIENTATION_SIGMA: f32 = 1.5;
const ORIENTATION_RADIUS: f32 = 3.0 * ORIENTATION_SIGMA;
const MIN_OCTAVE_SIZE: usize = 16;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftParams {
    /// Strongest features kept; 0 keeps all.
    pub max_features: usize,
    pub octaves: usize,
    /// Sampled scales per octave.
    pub intervals: usize,
    /// Blur of the first scale of each octave.
    pub sigma: f32,
    /// Minimum |DoG| response on a 0..1 intensity scale.
    pub contrast_threshold: f32,
    /// Maximum principal curvature ratio.
    pub edge_threshold: f32,
}

impl Default for SiftParams {
    fn default() -> Self {
        Self {
            max_features: 1000,
            octaves: 4,
            intervals: 3,
            sigma: 1.6,
            contrast_threshold: 0.04,
            edge_threshold: 10.0,
        }
    }
}

pub struct SiftDetector {
    params: SiftParams,
}

struct Octave {
    gaussians: Vec<Array2<f32>>,
    dogs: Vec<Array2<f32>>,
}

/// An extremum located in a specific octave and layer.
#[derive(Clone, Copy, Debug)]
struct Candidate {
    keypoint: Keypoint,
    layer: usize,
    row: usize,
    col: usize,
    /// Blur of the keypoint relative to its octave.
    octave_sigma: f32,
}

impl SiftDetector {
    pub fn new(params: SiftParams) -> Self {
        Self { params }
    }

    fn build_scale_space(&self, image: &Array2<f32>) -> Vec<Octave> {
        let n = self.params.intervals.max(1);
        let k = 2f32.powf(1.0 / n as f32);
        let increments: Vec<f32> = (0..n + 3)
            .map(|i| {
                if i == 0 {
                    return 0.0;
                }
                let prev = self.params.sigma * k.powi(i as i32 - 1);
                let total = prev * k;
                (total * total - prev * prev).sqrt()
            })
            .collect();

        let init = (self.params.sigma.powi(2) - INITIAL_SIGMA.powi(2)).max(0.01).sqrt();
        let mut base = gaussian_blur(image, init);
        let mut octaves = Vec::with_capacity(self.params.octaves);

        for _ in 0..self.params.octaves {
            let (h, w) = base.dim();
            if h < MIN_OCTAVE_SIZE || w < MIN_OCTAVE_SIZE {
                break;
            }
            let mut gaussians = Vec::with_capacity(n + 3);
            gaussians.push(base);
            for &sigma in &increments[1..] {
                let next = gaussian_blur(&gaussians[gaussians.len() - 1], sigma);
                gaussians.push(next);
            }
            let dogs = gaussians.windows(2).map(|pair| &pair[1] - &pair[0]).collect();
            base = decimate(&gaussians[n]);
            octaves.push(Octave { gaussians, dogs });
        }
        octaves
    }

    fn find_extrema(&self, octaves: &[Octave], octave: usize, layer: usize) -> Vec<Candidate> {
        let dogs = &octaves[octave].dogs;
        let (h, w) = dogs[layer].dim();
        if h <= 2 * IMAGE_BORDER || w <= 2 * IMAGE_BORDER {
            return Vec::new();
        }
        let prefilter = 0.5 * self.params.contrast_threshold / self.params.intervals as f32;

        let mut found = Vec::new();
        for r in IMAGE_BORDER..h - IMAGE_BORDER {
            for c in IMAGE_BORDER..w - IMAGE_BORDER {
                let v = dogs[layer][[r, c]];
                if v.abs() <= prefilter || !is_extremum(dogs, layer, r, c) {
                    continue;
                }
                if let Some(candidate) = self.refine(dogs, octave, layer, r, c) {
                    found.push(candidate);
                }
            }
        }
        found
    }

    /// Quadratic sub-pixel refinement with contrast and edge rejection.
    fn refine(&self, dogs: &[Array2<f32>], octave: usize, layer: usize, row: usize, col: usize) -> Option<Candidate> {
        let n = self.params.intervals;
        let (h, w) = dogs[layer].dim();
        let (mut layer, mut row, mut col) = (layer, row, col);
        let mut offset = Vector3::zeros();
        let mut converged = false;

        for _ in 0..MAX_REFINE_STEPS {
            let (gradient, hessian) = derivatives_3d(dogs, layer, row, col);
            offset = -hessian.lu().solve(&gradient)?;
            if offset.iter().all(|v: &f32| v.abs() < 0.5) {
                converged = true;
                break;
            }
            let next_col = col as isize + offset.x.round() as isize;
            let next_row = row as isize + offset.y.round() as isize;
            let next_layer = layer as isize + offset.z.round() as isize;
            if next_layer < 1
                || next_layer > n as isize
                || next_col < IMAGE_BORDER as isize
                || next_col >= (w - IMAGE_BORDER) as isize
                || next_row < IMAGE_BORDER as isize
                || next_row >= (h - IMAGE_BORDER) as isize
            {
                return None;
            }
            (layer, row, col) = (next_layer as usize, next_row as usize, next_col as usize);
        }
        if !converged {
            return None;
        }

        let (gradient, hessian) = derivatives_3d(dogs, layer, row, col);
        let contrast = dogs[layer][[row, col]] + 0.5 * gradient.dot(&offset);
        if contrast.abs() * (n as f32) < self.params.contrast_threshold {
            return None;
        }

        let (dxx, dyy, dxy) = (hessian[(0, 0)], hessian[(1, 1)], hessian[(0, 1)]);
        let trace = dxx + dyy;
        let det = dxx * dyy - dxy * dxy;
        let r = self.params.edge_threshold;
        if det <= 0.0 || trace * trace * r >= (r + 1.0) * (r + 1.0) * det {
            return None;
        }

        let octave_scale = (1usize << octave) as f32;
        let octave_sigma = self.params.sigma * 2f32.powf((layer as f32 + offset.z) / n as f32);
        Some(Candidate {
            keypoint: Keypoint {
                x: (col as f32 + offset.x) * octave_scale,
                y: (row as f32 + offset.y) * octave_scale,
                response: contrast.abs(),
                angle: 0.0,
                octave,
                size: octave_sigma * octave_scale * 2.0,
            },
            layer,
            row,
            col,
            octave_sigma,
        })
    }

    /// One oriented copy of the candidate per dominant histogram peak.
    fn orient(&self, octaves: &[Octave], candidate: &Candidate) -> Vec<Candidate> {
        let image = &octaves[candidate.keypoint.octave].gaussians[candidate.layer];
        let sigma = ORIENTATION_SIGMA * candidate.octave_sigma;
        let radius = (ORIENTATION_RADIUS * candidate.octave_sigma).round() as isize;
        let hist = orientation_histogram(image, candidate.row, candidate.col, radius, sigma);

        let max = hist.iter().copied().fold(0.0f32, f32::max);
        if max <= 0.0 {
            return Vec::new();
        }
        let bins = ORIENTATION_BINS;
        (0..bins)
            .filter_map(|j| {
                let left = hist[(j + bins - 1) % bins];
                let right = hist[(j + 1) % bins];
                let v = hist[j];
                if v < ORIENTATION_PEAK_RATIO * max || v <= left || v <= right {
                    return None;
                }
                let shift = 0.5 * (left - right) / (left - 2.0 * v + right);
                let bin = (j as f32 + shift).rem_euclid(bins as f32);
                let mut oriented = *candidate;
                oriented.keypoint.angle = bin * 2.0 * PI / bins as f32;
                Some(oriented)
            })
            .collect()
    }

    fn describe(&self, octaves: &[Octave], candidate: &Candidate) -> Vec<f32> {
        let image = &octaves[candidate.keypoint.octave].gaussians[candidate.layer];
        let (h, w) = image.dim();
        let d = DESCRIPTOR_WIDTH as f32;
        let hist_width = DESCRIPTOR_SCALE * candidate.octave_sigma;
        let radius = ((hist_width * SQRT_2 * (d + 1.0) * 0.5).round() as isize)
            .min(((h * h + w * w) as f32).sqrt() as isize);
        let angle = candidate.keypoint.angle;
        let (sin, cos) = angle.sin_cos();
        let (sin, cos) = (sin / hist_width, cos / hist_width);
        let bins_per_rad = DESCRIPTOR_BINS as f32 / (2.0 * PI);
        let weight_scale = -1.0 / (0.5 * d * d);

        let mut hist = vec![0.0f32; DESCRIPTOR_LEN];
        for i in -radius..=radius {
            for j in -radius..=radius {
                let c_rot = j as f32 * cos - i as f32 * sin;
                let r_rot = j as f32 * sin + i as f32 * cos;
                let rbin = r_rot + d / 2.0 - 0.5;
                let cbin = c_rot + d / 2.0 - 0.5;
                if rbin <= -1.0 || rbin >= d || cbin <= -1.0 || cbin >= d {
                    continue;
                }
                let r = candidate.row as isize + i;
                let c = candidate.col as isize + j;
                if r < 1 || c < 1 || r >= h as isize - 1 || c >= w as isize - 1 {
                    continue;
                }
                let (r, c) = (r as usize, c as usize);
                let dx = image[[r, c + 1]] - image[[r, c - 1]];
                let dy = image[[r + 1, c]] - image[[r - 1, c]];
                let magnitude = (dx * dx + dy * dy).sqrt();
                let obin = (dy.atan2(dx) - angle).rem_euclid(2.0 * PI) * bins_per_rad;
                let weight = ((c_rot * c_rot + r_rot * r_rot) * weight_scale).exp();
                accumulate_trilinear(&mut hist, rbin, cbin, obin, magnitude * weight);
            }
        }

        normalize(&mut hist);
        for v in &mut hist {
            *v = v.min(DESCRIPTOR_CLAMP);
        }
        normalize(&mut hist);
        hist
    }
}

impl FeatureDetector for SiftDetector {
    fn detect(&self, image: &Array2<u8>) -> FeatureSet {
        let normalized = to_f32(image).mapv(|v| v / 255.0);
        let octaves = self.build_scale_space(&normalized);

        let layers: Vec<(usize, usize)> = (0..octaves.len())
            .flat_map(|o| (1..=self.params.intervals).map(move |l| (o, l)))
            .collect();
        let candidates: Vec<Candidate> = layers
            .par_iter()
            .flat_map_iter(|&(o, l)| self.find_extrema(&octaves, o, l))
            .collect();

        let mut oriented: Vec<Candidate> = candidates
            .par_iter()
            .flat_map_iter(|c| self.orient(&octaves, c))
            .collect();
        oriented.sort_by(|a, b| b.keypoint.response.total_cmp(&a.keypoint.response));
        if self.params.max_features > 0 {
            oriented.truncate(self.params.max_features);
        }

        let rows: Vec<Vec<f32>> = oriented.par_iter().map(|c| self.describe(&octaves, c)).collect();
        let keypoints = oriented.into_iter().map(|c| c.keypoint).collect();
        FeatureSet::new(keypoints, Descriptors::from_float_rows(&rows, DESCRIPTOR_LEN))
            .unwrap_or_else(|_| FeatureSet::empty(DistanceMetric::L2))
    }

    fn metric(&self) -> DistanceMetric {
        DistanceMetric::L2
    }
}

fn is_extremum(dogs: &[Array2<f32>], layer: usize, r: usize, c: usize) -> bool {
    let v = dogs[layer][[r, c]];
    for dl in [layer - 1, layer, layer + 1] {
        for rr in r - 1..=r + 1 {
            for cc in c - 1..=c + 1 {
                if dl == layer && rr == r && cc == c {
                    continue;
                }
                let other = dogs[dl][[rr, cc]];
                if (v > 0.0 && other > v) || (v < 0.0 && other < v) {
                    return false;
                }
            }
        }
    }
    true
}

/// Gradient and Hessian of the DoG stack in `(x, y, scale)`.
fn derivatives_3d(dogs: &[Array2<f32>], l: usize, r: usize, c: usize) -> (Vector3<f32>, Matrix3<f32>) {
    let at = |dl: isize, dr: isize, dc: isize| -> f32 {
        dogs[(l as isize + dl) as usize][[(r as isize + dr) as usize, (c as isize + dc) as usize]]
    };
    let v = at(0, 0, 0);
    let dx = (at(0, 0, 1) - at(0, 0, -1)) * 0.5;
    let dy = (at(0, 1, 0) - at(0, -1, 0)) * 0.5;
    let ds = (at(1, 0, 0) - at(-1, 0, 0)) * 0.5;

    let dxx = at(0, 0, 1) + at(0, 0, -1) - 2.0 * v;
    let dyy = at(0, 1, 0) + at(0, -1, 0) - 2.0 * v;
    let dss = at(1, 0, 0) + at(-1, 0, 0) - 2.0 * v;
    let dxy = (at(0, 1, 1) - at(0, 1, -1) - at(0, -1, 1) + at(0, -1, -1)) * 0.25;
    let dxs = (at(1, 0, 1) - at(1, 0, -1) - at(-1, 0, 1) + at(-1, 0, -1)) * 0.25;
    let dys = (at(1, 1, 0) - at(1, -1, 0) - at(-1, 1, 0) + at(-1, -1, 0)) * 0.25;

    (
        Vector3::new(dx, dy, ds),
        Matrix3::new(dxx, dxy, dxs, dxy, dyy, dys, dxs, dys, dss),
    )
}

fn orientation_histogram(image: &Array2<f32>, row: usize, col: usize, radius: isize, sigma: f32) -> Vec<f32> {
    let (h, w) = image.dim();
    let bins = ORIENTATION_BINS;
    let mut raw = vec![0.0f32; bins];
    let denom = -1.0 / (2.0 * sigma * sigma);

    for i in -radius..=radius {
        let r = row as isize + i;
        if r < 1 || r >= h as isize - 1 {
            continue;
        }
        for j in -radius..=radius {
            let c = col as isize + j;
            if c < 1 || c >= w as isize - 1 {
                continue;
            }
            let (r, c) = (r as usize, c as usize);
            let dx = image[[r, c + 1]] - image[[r, c - 1]];
            let dy = image[[r + 1, c]] - image[[r - 1, c]];
            let weight = (((i * i + j * j) as f32) * denom).exp();
            let angle = dy.atan2(dx).rem_euclid(2.0 * PI);
            let bin = ((angle * bins as f32 / (2.0 * PI)).round() as usize) % bins;
            raw[bin] += weight * (dx * dx + dy * dy).sqrt();
        }
    }

    // [1 4 6 4 1] circular smoothing
    (0..bins)
        .map(|j| {
            let at = |o: isize| raw[(j as isize + o).rem_euclid(bins as isize) as usize];
            (at(-2) + at(2)) / 16.0 + (at(-1) + at(1)) * 4.0 / 16.0 + at(0) * 6.0 / 16.0
        })
        .collect()
}

fn accumulate_trilinear(hist: &mut [f32], rbin: f32, cbin: f32, obin: f32, value: f32) {
    let (r0, c0, o0) = (rbin.floor(), cbin.floor(), obin.floor());
    let (dr, dc, dobin) = (rbin - r0, cbin - c0, obin - o0);
    let d = DESCRIPTOR_WIDTH as isize;

    for (ri, wr) in [(0, 1.0 - dr), (1, dr)] {
        let r = r0 as isize + ri;
        if r < 0 || r >= d {
            continue;
        }
        for (ci, wc) in [(0, 1.0 - dc), (1, dc)] {
            let c = c0 as isize + ci;
            if c < 0 || c >= d {
                continue;
            }
            for (oi, wo) in [(0, 1.0 - dobin), (1, dobin)] {
                let o = (o0 as usize + oi) % DESCRIPTOR_BINS;
                let idx = (r as usize * DESCRIPTOR_WIDTH + c as usize) * DESCRIPTOR_BINS + o;
                hist[idx] += value * wr * wc * wo;
            }
        }
    }
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
