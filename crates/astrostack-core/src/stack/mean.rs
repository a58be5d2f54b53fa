use ndarray::Array3;

use crate::error::{Result, StackError};
use crate::frame::RawFrame;
use crate::manifest::FrameClass;

use super::check_shapes;

/// Elementwise mean of same-shaped frames.
///
/// Sums in f64 so integer-valued sensor data produces the same result for any
/// ordering of `frames`.
pub fn mean_combine(frames: &[RawFrame], class: FrameClass) -> Result<Array3<f32>> {
    if frames.is_empty() {
        return Err(StackError::EmptySequence);
    }
    let shape = check_shapes(frames, class)?;
    let n = frames.len() as f64;

    let mut sum = Array3::<f64>::zeros(shape);
    for frame in frames {
        sum.zip_mut_with(&frame.data, |s, &v| *s += v as f64);
    }

    Ok(sum.mapv(|s| (s / n) as f32))
}
