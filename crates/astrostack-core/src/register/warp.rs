use ndarray::{Array2, Array3, Axis, Zip};

use super::homography::Homography;
use crate::consts::{PARALLEL_PIXEL_THRESHOLD, WORKING_MAX};
use crate::error::RegistrationError;
use crate::filters::bilinear_sample;

/// Warp `data` into the reference grid through `homography`.
///
/// Each output pixel is mapped back through the inverse transform and sampled
/// bilinearly; pixels whose source lies outside the frame are zero. Output
/// keeps the input shape.
pub fn warp_perspective(data: &Array3<u16>, homography: &Homography) -> Result<Array3<u16>, RegistrationError> {
    let inverse = homography
        .inverse()
        .ok_or_else(|| RegistrationError::Degenerate("homography is not invertible".into()))?;

    let planes: Vec<Array2<f32>> = data
        .axis_iter(Axis(2))
        .map(|plane| plane.mapv(f32::from))
        .collect();
    let (h, w, _) = data.dim();

    let mut out = Array3::<u16>::zeros(data.dim());
    let sample = |(row, col, ch): (usize, usize, usize), px: &mut u16| {
        if let Some((sx, sy)) = inverse.apply(col as f64, row as f64) {
            let v = bilinear_sample(&planes[ch], sy, sx);
            *px = v.round().clamp(0.0, WORKING_MAX as f32) as u16;
        }
    };

    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        Zip::indexed(&mut out).par_for_each(sample);
    } else {
        Zip::indexed(&mut out).for_each(sample);
    }
    Ok(out)
}

/// Cyclically shift columns by `dx` and rows by `dy`. Pixels leaving one edge
/// re-enter at the opposite edge.
pub fn roll(data: &Array3<u16>, dx: i64, dy: i64) -> Array3<u16> {
    let (h, w, _) = data.dim();
    if h == 0 || w == 0 {
        return data.clone();
    }
    Array3::from_shape_fn(data.dim(), |(row, col, ch)| {
        let src_row = (row as i64 - dy).rem_euclid(h as i64) as usize;
        let src_col = (col as i64 - dx).rem_euclid(w as i64) as usize;
        data[[src_row, src_col, ch]]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(h: usize, w: usize) -> Array3<u16> {
        Array3::from_shape_fn((h, w, 1), |(r, c, _)| (r * w + c) as u16)
    }

    #[test]
    fn identity_warp_is_exact() {
        let data = ramp(6, 9);
        assert_eq!(warp_perspective(&data, &Homography::identity()).unwrap(), data);
    }

    #[test]
    fn translation_warp_zero_fills() {
        let data = ramp(5, 5);
        let warped = warp_perspective(&data, &Homography::translation(2.0, 0.0)).unwrap();
        assert_eq!(warped[[0, 0, 0]], 0);
        assert_eq!(warped[[0, 2, 0]], data[[0, 0, 0]]);
        assert_eq!(warped[[3, 4, 0]], data[[3, 2, 0]]);
    }

    #[test]
    fn roll_wraps_around() {
        let data = ramp(3, 4);
        let rolled = roll(&data, 1, -1);
        assert_eq!(rolled[[0, 1, 0]], data[[1, 0, 0]]);
        assert_eq!(rolled[[2, 0, 0]], data[[0, 3, 0]]);
        assert_eq!(roll(&rolled, -1, 1), data);
    }
}
