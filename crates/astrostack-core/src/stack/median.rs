use ndarray::Array3;
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{Result, StackError};
use crate::frame::RawFrame;
use crate::manifest::FrameClass;

use super::check_shapes;

/// Elementwise median of same-shaped frames.
///
/// Uses `select_nth_unstable` for O(n) median without full sort.
/// Parallelizes at the row level for images >= 256x256.
pub fn median_combine(frames: &[RawFrame], class: FrameClass) -> Result<Array3<f32>> {
    if frames.is_empty() {
        return Err(StackError::EmptySequence);
    }

    let (h, w, c) = check_shapes(frames, class)?;
    let n = frames.len();

    let median_row = |row: usize, pixel_values: &mut [f32], out: &mut [f32]| {
        for col in 0..w {
            for ch in 0..c {
                for (i, frame) in frames.iter().enumerate() {
                    pixel_values[i] = frame.data[[row, col, ch]];
                }
                out[col * c + ch] = compute_median(pixel_values);
            }
        }
    };

    let mut result = vec![0.0f32; h * w * c];
    if h * w >= PARALLEL_PIXEL_THRESHOLD && n > 1 {
        // Row-parallel: each row allocates its own pixel_values
        result
            .par_chunks_mut(w * c)
            .enumerate()
            .for_each(|(row, out)| {
                let mut pixel_values = vec![0.0f32; n];
                median_row(row, &mut pixel_values, out);
            });
    } else {
        let mut pixel_values = vec![0.0f32; n];
        for (row, out) in result.chunks_mut(w * c).enumerate() {
            median_row(row, &mut pixel_values, out);
        }
    }

    Ok(Array3::from_shape_vec((h, w, c), result).expect("buffer size matches dimensions"))
}

/// Median of a scratch slice; even counts average the two middle values.
pub(crate) fn compute_median(pixel_values: &mut [f32]) -> f32 {
    let n = pixel_values.len();
    if n == 1 {
        pixel_values[0]
    } else if n % 2 == 1 {
        let mid = n / 2;
        *pixel_values
            .select_nth_unstable_by(mid, |a, b| a.total_cmp(b))
            .1
    } else {
        let mid = n / 2;
        pixel_values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
        pixel_values[..mid].select_nth_unstable_by(mid - 1, |a, b| a.total_cmp(b));
        (pixel_values[mid - 1] + pixel_values[mid]) / 2.0
    }
}
