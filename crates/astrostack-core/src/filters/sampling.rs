use ndarray::Array2;

/// Bilinear sample at `(y, x)`. Samples outside the image read as zero.
pub fn bilinear_sample(data: &Array2<f32>, y: f64, x: f64) -> f32 {
    let (h, w) = data.dim();
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;

    let at = |r: i64, c: i64| -> f32 {
        if r >= 0 && r < h as i64 && c >= 0 && c < w as i64 {
            data[[r as usize, c as usize]]
        } else {
            0.0
        }
    };

    at(y0, x0) * (1.0 - fx) * (1.0 - fy)
        + at(y0, x0 + 1) * fx * (1.0 - fy)
        + at(y0 + 1, x0) * (1.0 - fx) * fy
        + at(y0 + 1, x0 + 1) * fx * fy
}

/// Bilinear sample with coordinates clamped into the image.
pub fn bilinear_sample_clamped(data: &Array2<f32>, y: f32, x: f32) -> f32 {
    let (h, w) = data.dim();
    let y = y.clamp(0.0, (h - 1) as f32);
    let x = x.clamp(0.0, (w - 1) as f32);
    let y0 = y.floor() as usize;
    let x0 = x.floor() as usize;
    let y1 = (y0 + 1).min(h - 1);
    let x1 = (x0 + 1).min(w - 1);
    let fy = y - y0 as f32;
    let fx = x - x0 as f32;

    data[[y0, x0]] * (1.0 - fx) * (1.0 - fy)
        + data[[y0, x1]] * fx * (1.0 - fy)
        + data[[y1, x0]] * (1.0 - fx) * fy
        + data[[y1, x1]] * fx * fy
}

/// Resample to `(height, width)` by bilinear interpolation.
pub fn resize(data: &Array2<f32>, height: usize, width: usize) -> Array2<f32> {
    let (h, w) = data.dim();
    let sy = h as f32 / height as f32;
    let sx = w as f32 / width as f32;
    Array2::from_shape_fn((height, width), |(r, c)| {
        let y = (r as f32 + 0.5) * sy - 0.5;
        let x = (c as f32 + 0.5) * sx - 0.5;
        bilinear_sample_clamped(data, y, x)
    })
}

/// Keep every other row and column.
pub fn decimate(data: &Array2<f32>) -> Array2<f32> {
    let (h, w) = data.dim();
    Array2::from_shape_fn((h.div_ceil(2), w.div_ceil(2)), |(r, c)| data[[r * 2, c * 2]])
}
