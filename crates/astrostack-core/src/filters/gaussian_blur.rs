use ndarray::{Array2, Axis, Zip};

use crate::consts::PARALLEL_PIXEL_THRESHOLD;

/// Separable Gaussian blur with clamped borders.
pub fn gaussian_blur(data: &Array2<f32>, sigma: f32) -> Array2<f32> {
    if sigma <= 0.0 || data.is_empty() {
        return data.clone();
    }
    let kernel = gaussian_kernel(sigma);
    let horizontal = convolve_axis(data, &kernel, Axis(1));
    convolve_axis(&horizontal, &kernel, Axis(0))
}

/// Normalized 1-D kernel of radius `ceil(3 sigma)`.
pub(crate) fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (sigma * 3.0).ceil().max(1.0) as usize;
    let s2 = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..=2 * radius)
        .map(|i| {
            let x = i as f32 - radius as f32;
            (-x * x / s2).exp()
        })
        .collect();

    let sum: f32 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// Convolve every lane along `axis` with `kernel`, replicating edge samples.
pub(crate) fn convolve_axis(data: &Array2<f32>, kernel: &[f32], axis: Axis) -> Array2<f32> {
    let (h, w) = data.dim();
    let len = data.len_of(axis);
    let radius = kernel.len() / 2;
    let mut out = Array2::<f32>::zeros((h, w));

    let convolve_lane = |mut dst: ndarray::ArrayViewMut1<f32>, src: ndarray::ArrayView1<f32>| {
        for (i, d) in dst.iter_mut().enumerate() {
            let mut sum = 0.0f32;
            for (k, &kv) in kernel.iter().enumerate() {
                let j = (i as isize + k as isize - radius as isize).clamp(0, len as isize - 1);
                sum += src[j as usize] * kv;
            }
            *d = sum;
        }
    };

    let lanes = Zip::from(out.lanes_mut(axis)).and(data.lanes(axis));
    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        lanes.par_for_each(convolve_lane);
    } else {
        lanes.for_each(convolve_lane);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn kernel_sums_to_one() {
        let k = gaussian_kernel(1.6);
        assert_abs_diff_eq!(k.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        assert_eq!(k.len(), 11);
    }

    #[test]
    fn empty_image_passes_through() {
        let data = Array2::<f32>::zeros((0, 5));
        assert_eq!(gaussian_blur(&data, 1.6).dim(), (0, 5));
    }

    #[test]
    fn constant_image_is_unchanged() {
        let data = Array2::from_elem((9, 7), 42.0f32);
        let blurred = gaussian_blur(&data, 2.0);
        for &v in blurred.iter() {
            assert_abs_diff_eq!(v, 42.0, epsilon = 1e-3);
        }
    }
}
