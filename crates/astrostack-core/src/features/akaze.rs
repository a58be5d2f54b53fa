//! Accelerated KAZE features.
//!
//! The scale space comes from nonlinear (Perona-Malik) diffusion, which keeps
//! star edges sharp while smoothing noise. Keypoints are scale-normalized
//! Hessian-determinant maxima, described by a modified local difference
//! binary (M-LDB) string.

use std::f32::consts::PI;

use nalgebra::{Matrix2, Vector2};
use ndarray::{Array2, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{to_f32, Descriptors, DistanceMetric, FeatureDetector, FeatureSet, Keypoint};
use crate::filters::derivatives::scharr;
use crate::filters::gaussian_blur;
use crate::filters::sampling::{bilinear_sample_clamped, decimate};

/// Bytes in a 486-bit M-LDB descriptor.
pub const DESCRIPTOR_BYTES: usize = 61;

/// Grid sizes sampled by M-LDB.
const GRIDS: [usize; 3] = [2, 3, 4];
/// Half side of the described patch, in keypoint scale units.
const PATTERN_SIZE: f32 = 10.0;
/// Largest stable explicit diffusion step.
const MAX_TAU: f32 = 0.25;
const CONDUCTIVITY_SIGMA: f32 = 1.0;
const OCTAVE_CONTRAST_DECAY: f32 = 0.75;
const MIN_CONTRAST_FACTOR: f32 = 0.03;
const BORDER: usize = 5;
const MIN_LEVEL_SIZE: usize = 2 * BORDER + 6;
const ORIENTATION_RADIUS: isize = 6;
const ORIENTATION_SIGMA: f32 = 2.5;
const ORIENTATION_STEP: f32 = 0.15;
const ORIENTATION_WINDOW: f32 = PI / 3.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AkazeParams {
    /// Strongest features kept; 0 keeps all.
    pub max_features: usize,
    pub octaves: usize,
    pub sublevels: usize,
    /// Minimum Hessian response on a 0..1 intensity scale.
    pub threshold: f32,
    pub base_sigma: f32,
    /// Gradient percentile that sets the diffusion contrast factor.
    pub contrast_percentile: f32,
}

impl Default for AkazeParams {
    fn default() -> Self {
        Self {
            max_features: 1000,
            octaves: 4,
            sublevels: 4,
            threshold: 0.001,
            base_sigma: 1.6,
            contrast_percentile: 0.7,
        }
    }
}

pub struct AkazeDetector {
    params: AkazeParams,
}

/// One evolution step of the nonlinear scale space.
struct Level {
    image: Array2<f32>,
    lx: Array2<f32>,
    ly: Array2<f32>,
    det: Array2<f32>,
    octave: usize,
    sigma: f32,
    /// Sigma in the level's own pixel units.
    octave_sigma: f32,
}

impl AkazeDetector {
    pub fn new(params: AkazeParams) -> Self {
        Self { params }
    }

    fn build_scale_space(&self, image: &Array2<f32>) -> Vec<Level> {
        let sublevels = self.params.sublevels.max(1);
        let mut contrast = contrast_factor(&gaussian_blur(image, CONDUCTIVITY_SIGMA), self.params.contrast_percentile);
        let mut current = gaussian_blur(image, self.params.base_sigma);
        let mut previous_time = 0.5 * self.params.base_sigma * self.params.base_sigma;
        let mut evolved = Vec::new();

        'octaves: for octave in 0..self.params.octaves {
            for sublevel in 0..sublevels {
                let sigma = self.params.base_sigma * 2f32.powf(octave as f32 + sublevel as f32 / sublevels as f32);
                let time = 0.5 * sigma * sigma;

                if octave > 0 && sublevel == 0 {
                    current = decimate(&gaussian_blur(&current, 1.0));
                    contrast *= OCTAVE_CONTRAST_DECAY;
                }
                let (h, w) = current.dim();
                if h < MIN_LEVEL_SIZE || w < MIN_LEVEL_SIZE {
                    break 'octaves;
                }

                if time > previous_time {
                    let scale = (1usize << octave) as f32;
                    // Diffusion time in the level's pixel units.
                    let dt = (time - previous_time) / (scale * scale);
                    current = diffuse(&current, contrast, dt);
                }
                previous_time = time;

                evolved.push((current.clone(), octave, sigma));
            }
        }

        evolved
            .into_par_iter()
            .map(|(image, octave, sigma)| {
                let octave_sigma = sigma / (1usize << octave) as f32;
                let (lx, ly) = scharr(&image);
                let (lx, ly) = (lx * octave_sigma, ly * octave_sigma);
                let (lxx, lxy) = scharr(&lx);
                let (_, lyy) = scharr(&ly);
                let norm = octave_sigma * octave_sigma;
                let mut det = Array2::<f32>::zeros(image.dim());
                Zip::from(&mut det)
                    .and(&lxx)
                    .and(&lyy)
                    .and(&lxy)
                    .for_each(|d, &xx, &yy, &xy| *d = (xx * yy - xy * xy) * norm);
                Level {
                    image,
                    lx,
                    ly,
                    det,
                    octave,
                    sigma,
                    octave_sigma,
                }
            })
            .collect()
    }

    fn find_extrema(&self, levels: &[Level], index: usize) -> Vec<Keypoint> {
        let level = &levels[index];
        let det = &level.det;
        let (h, w) = det.dim();
        let neighbours: Vec<&Array2<f32>> = [index.checked_sub(1), Some(index + 1)]
            .into_iter()
            .flatten()
            .filter_map(|i| levels.get(i))
            .filter(|other| other.octave == level.octave)
            .map(|other| &other.det)
            .collect();
        let scale = (1usize << level.octave) as f32;

        let mut found = Vec::new();
        for r in BORDER..h - BORDER {
            for c in BORDER..w - BORDER {
                let v = det[[r, c]];
                if v <= self.params.threshold || !is_local_max(det, r, c) {
                    continue;
                }
                if neighbours.iter().any(|n| !is_local_max_against(n, v, r, c)) {
                    continue;
                }
                let (ox, oy) = subpixel_offset(det, r, c);
                found.push(Keypoint {
                    x: (c as f32 + ox) * scale,
                    y: (r as f32 + oy) * scale,
                    response: v,
                    angle: 0.0,
                    octave: level.octave,
                    size: 2.0 * level.sigma,
                });
            }
        }
        found
    }

    fn describe(&self, level: &Level, keypoint: &Keypoint) -> [u8; DESCRIPTOR_BYTES] {
        let scale = (1usize << level.octave) as f32;
        let (cx, cy) = (keypoint.x / scale, keypoint.y / scale);
        let unit = level.octave_sigma.max(1.0);
        let (sin, cos) = keypoint.angle.sin_cos();

        let mut bits = Vec::with_capacity(DESCRIPTOR_BYTES * 8);
        for grid in GRIDS {
            let cell = 2.0 * PATTERN_SIZE / grid as f32;
            let samples = cell.ceil().max(1.0) as usize;
            let cells: Vec<[f32; 3]> = (0..grid * grid)
                .map(|idx| {
                    let (gy, gx) = (idx / grid, idx % grid);
                    let mut sum = [0.0f32; 3];
                    for sy in 0..samples {
                        for sx in 0..samples {
                            let u = -PATTERN_SIZE + (gx as f32 + (sx as f32 + 0.5) / samples as f32) * cell;
                            let v = -PATTERN_SIZE + (gy as f32 + (sy as f32 + 0.5) / samples as f32) * cell;
                            let x = cx + unit * (u * cos - v * sin);
                            let y = cy + unit * (u * sin + v * cos);
                            let dx = bilinear_sample_clamped(&level.lx, y, x);
                            let dy = bilinear_sample_clamped(&level.ly, y, x);
                            sum[0] += bilinear_sample_clamped(&level.image, y, x);
                            sum[1] += dx * cos + dy * sin;
                            sum[2] += -dx * sin + dy * cos;
                        }
                    }
                    let n = (samples * samples) as f32;
                    [sum[0] / n, sum[1] / n, sum[2] / n]
                })
                .collect();

            for i in 0..cells.len() {
                for j in i + 1..cells.len() {
                    for ch in 0..3 {
                        bits.push(cells[i][ch] > cells[j][ch]);
                    }
                }
            }
        }

        let mut descriptor = [0u8; DESCRIPTOR_BYTES];
        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                descriptor[i / 8] |= 1 << (i % 8);
            }
        }
        descriptor
    }
}

impl FeatureDetector for AkazeDetector {
    fn detect(&self, image: &Array2<u8>) -> FeatureSet {
        let normalized = to_f32(image).mapv(|v| v / 255.0);
        let levels = self.build_scale_space(&normalized);

        let mut keypoints: Vec<(usize, Keypoint)> = (0..levels.len())
            .into_par_iter()
            .flat_map_iter(|i| {
                self.find_extrema(&levels, i)
                    .into_iter()
                    .map(move |k| (i, k))
            })
            .collect();
        keypoints.sort_by(|a, b| b.1.response.total_cmp(&a.1.response));
        if self.params.max_features > 0 {
            keypoints.truncate(self.params.max_features);
        }

        let described: Vec<(Keypoint, [u8; DESCRIPTOR_BYTES])> = keypoints
            .par_iter()
            .map(|&(i, mut k)| {
                k.angle = dominant_orientation(&levels[i], &k);
                (k, self.describe(&levels[i], &k))
            })
            .collect();

        let (keypoints, rows): (Vec<Keypoint>, Vec<[u8; DESCRIPTOR_BYTES]>) = described.into_iter().unzip();
        FeatureSet::new(keypoints, Descriptors::from_binary_rows(&rows))
            .unwrap_or_else(|_| FeatureSet::empty(DistanceMetric::Hamming))
    }

    fn metric(&self) -> DistanceMetric {
        DistanceMetric::Hamming
    }
}

/// Percentile of the non-zero gradient magnitudes.
fn contrast_factor(smoothed: &Array2<f32>, percentile: f32) -> f32 {
    let (gx, gy) = scharr(smoothed);
    let mut magnitudes: Vec<f32> = Zip::from(&gx)
        .and(&gy)
        .map_collect(|&x, &y| (x * x + y * y).sqrt())
        .into_iter()
        .filter(|&m| m > 0.0)
        .collect();
    if magnitudes.is_empty() {
        return MIN_CONTRAST_FACTOR;
    }
    let idx = ((magnitudes.len() - 1) as f32 * percentile.clamp(0.0, 1.0)) as usize;
    let (_, k, _) = magnitudes.select_nth_unstable_by(idx, f32::total_cmp);
    (*k).max(MIN_CONTRAST_FACTOR)
}

/// Perona-Malik (g2) diffusion for time `dt` with explicit steps.
fn diffuse(image: &Array2<f32>, contrast: f32, dt: f32) -> Array2<f32> {
    let (gx, gy) = scharr(&gaussian_blur(image, CONDUCTIVITY_SIGMA));
    let k2 = contrast * contrast;
    let conductivity = Zip::from(&gx)
        .and(&gy)
        .map_collect(|&x, &y| 1.0 / (1.0 + (x * x + y * y) / k2));

    let steps = (dt / MAX_TAU).ceil().max(1.0) as usize;
    let tau = dt / steps as f32;
    let mut current = image.clone();
    for _ in 0..steps {
        current = diffusion_step(&current, &conductivity, tau);
    }
    current
}

fn diffusion_step(image: &Array2<f32>, g: &Array2<f32>, tau: f32) -> Array2<f32> {
    let (h, w) = image.dim();
    Array2::from_shape_fn((h, w), |(r, c)| {
        let v = image[[r, c]];
        let gc = g[[r, c]];
        let neighbours = [
            (r.saturating_sub(1), c),
            ((r + 1).min(h - 1), c),
            (r, c.saturating_sub(1)),
            (r, (c + 1).min(w - 1)),
        ];
        let flux: f32 = neighbours
            .iter()
            .map(|&(nr, nc)| 0.5 * (gc + g[[nr, nc]]) * (image[[nr, nc]] - v))
            .sum();
        v + tau * flux
    })
}

fn is_local_max(det: &Array2<f32>, r: usize, c: usize) -> bool {
    let v = det[[r, c]];
    for rr in r - 1..=r + 1 {
        for cc in c - 1..=c + 1 {
            if rr == r && cc == c {
                continue;
            }
            if det[[rr, cc]] >= v {
                return false;
            }
        }
    }
    true
}

fn is_local_max_against(other: &Array2<f32>, v: f32, r: usize, c: usize) -> bool {
    (r - 1..=r + 1).all(|rr| (c - 1..=c + 1).all(|cc| other[[rr, cc]] < v))
}

/// Quadratic peak offset, or zero when the fit is unstable.
fn subpixel_offset(det: &Array2<f32>, r: usize, c: usize) -> (f32, f32) {
    let v = det[[r, c]];
    let dx = (det[[r, c + 1]] - det[[r, c - 1]]) * 0.5;
    let dy = (det[[r + 1, c]] - det[[r - 1, c]]) * 0.5;
    let dxx = det[[r, c + 1]] + det[[r, c - 1]] - 2.0 * v;
    let dyy = det[[r + 1, c]] + det[[r - 1, c]] - 2.0 * v;
    let dxy = (det[[r + 1, c + 1]] - det[[r + 1, c - 1]] - det[[r - 1, c + 1]] + det[[r - 1, c - 1]]) * 0.25;

    let hessian = Matrix2::new(dxx, dxy, dxy, dyy);
    match hessian.lu().solve(&Vector2::new(-dx, -dy)) {
        Some(o) if o.x.abs() <= 1.0 && o.y.abs() <= 1.0 => (o.x, o.y),
        _ => (0.0, 0.0),
    }
}

/// Angle of the largest summed gradient inside a sliding 60 degree window.
fn dominant_orientation(level: &Level, keypoint: &Keypoint) -> f32 {
    let scale = (1usize << level.octave) as f32;
    let (cx, cy) = (keypoint.x / scale, keypoint.y / scale);
    let unit = level.octave_sigma.max(1.0);
    let (h, w) = level.image.dim();

    let mut responses = Vec::new();
    for i in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
        for j in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
            if i * i + j * j >= ORIENTATION_RADIUS * ORIENTATION_RADIUS {
                continue;
            }
            let r = (cy + i as f32 * unit).round();
            let c = (cx + j as f32 * unit).round();
            if r < 0.0 || c < 0.0 || r >= h as f32 || c >= w as f32 {
                continue;
            }
            let (r, c) = (r as usize, c as usize);
            let weight = (-((i * i + j * j) as f32) / (2.0 * ORIENTATION_SIGMA * ORIENTATION_SIGMA)).exp();
            let rx = weight * level.lx[[r, c]];
            let ry = weight * level.ly[[r, c]];
            responses.push((ry.atan2(rx).rem_euclid(2.0 * PI), rx, ry));
        }
    }

    let mut best = (0.0f32, 0.0f32, 0.0f32);
    let mut start = 0.0f32;
    while start < 2.0 * PI {
        let end = start + ORIENTATION_WINDOW;
        let (sx, sy) = responses
            .iter()
            .filter(|(a, _, _)| {
                let a = if *a < start { a + 2.0 * PI } else { *a };
                a < end
            })
            .fold((0.0, 0.0), |(sx, sy), &(_, rx, ry)| (sx + rx, sy + ry));
        let magnitude = sx * sx + sy * sy;
        if magnitude > best.0 {
            best = (magnitude, sx, sy);
        }
        start += ORIENTATION_STEP;
    }
    best.2.atan2(best.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn descriptor_length_matches_pair_count() {
        let pairs: usize = GRIDS.iter().map(|g| (g * g) * (g * g - 1) / 2).sum();
        assert_eq!(pairs * 3, 486);
        assert!(DESCRIPTOR_BYTES * 8 >= 486);
    }

    #[test]
    fn diffusion_preserves_mean() {
        let image = Array2::from_shape_fn((16, 16), |(r, c)| ((r * 7 + c * 3) % 11) as f32 / 10.0);
        let diffused = diffuse(&image, 0.05, 1.0);
        assert_abs_diff_eq!(image.mean().unwrap(), diffused.mean().unwrap(), epsilon = 1e-4);
    }

    #[test]
    fn spots_produce_keypoints() {
        let spots = [(20.0f32, 24.0f32), (44.0, 40.0), (30.0, 52.0)];
        let image = Array2::from_shape_fn((72, 72), |(r, c)| {
            let v: f32 = spots
                .iter()
                .map(|&(y, x)| {
                    let d2 = (r as f32 - y).powi(2) + (c as f32 - x).powi(2);
                    220.0 * (-d2 / 8.0).exp()
                })
                .sum();
            v.min(255.0) as u8
        });
        let features = AkazeDetector::new(AkazeParams::default()).detect(&image);
        assert!(!features.is_empty());
    }
}
