pub mod accumulator;
pub mod mean;
pub mod median;

pub use accumulator::{Accumulator, CombineMode, StackedImage};

use crate::error::{Result, StackError};
use crate::frame::{RawFrame, Shape};
use crate::manifest::FrameClass;

/// Shape shared by every frame, or `DimensionMismatch` for the first outlier.
pub(crate) fn check_shapes(frames: &[RawFrame], class: FrameClass) -> Result<Shape> {
    let first = frames.first().ok_or(StackError::EmptySequence)?;
    let expected = first.shape();
    if expected.0 == 0 || expected.1 == 0 || expected.2 == 0 {
        return Err(StackError::decode(&first.path, "empty frame"));
    }
    for frame in &frames[1..] {
        if frame.shape() != expected {
            return Err(StackError::DimensionMismatch {
                class,
                expected,
                found: frame.shape(),
            });
        }
    }
    Ok(expected)
}
