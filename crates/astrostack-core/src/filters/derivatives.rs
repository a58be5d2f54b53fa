use ndarray::Array2;

/// Horizontal and vertical Scharr derivatives, normalized so a unit ramp
/// gives a unit response. Borders replicate.
pub fn scharr(data: &Array2<f32>) -> (Array2<f32>, Array2<f32>) {
    let (h, w) = data.dim();
    let at = |r: isize, c: isize| -> f32 {
        data[[r.clamp(0, h as isize - 1) as usize, c.clamp(0, w as isize - 1) as usize]]
    };

    let dx = Array2::from_shape_fn((h, w), |(r, c)| {
        let (r, c) = (r as isize, c as isize);
        (3.0 * (at(r - 1, c + 1) - at(r - 1, c - 1))
            + 10.0 * (at(r, c + 1) - at(r, c - 1))
            + 3.0 * (at(r + 1, c + 1) - at(r + 1, c - 1)))
            / 32.0
    });
    let dy = Array2::from_shape_fn((h, w), |(r, c)| {
        let (r, c) = (r as isize, c as isize);
        (3.0 * (at(r + 1, c - 1) - at(r - 1, c - 1))
            + 10.0 * (at(r + 1, c) - at(r - 1, c))
            + 3.0 * (at(r + 1, c + 1) - at(r - 1, c + 1)))
            / 32.0
    });
    (dx, dy)
}
