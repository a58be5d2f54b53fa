use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StackError};
use crate::frame::Shape;
use crate::manifest::FrameClass;

/// How the accumulated sum is finalized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombineMode {
    /// Raw per-pixel sum of every registered frame.
    #[default]
    Sum,
    /// Sum divided by the number of frames.
    Mean,
}

impl std::fmt::Display for CombineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sum => write!(f, "Sum"),
            Self::Mean => write!(f, "Mean"),
        }
    }
}

/// Running per-pixel sum of registered light frames.
///
/// Sums are kept in f64: adding 16-bit integer samples is exact there, so
/// partial accumulators can be merged in any order with identical results.
#[derive(Clone, Debug)]
pub struct Accumulator {
    sum: Array3<f64>,
    frame_count: usize,
}

impl Accumulator {
    pub fn new(shape: Shape) -> Self {
        Self {
            sum: Array3::zeros(shape),
            frame_count: 0,
        }
    }

    /// Start an accumulator from the reference frame.
    pub fn seeded(reference: &Array3<u16>) -> Self {
        Self {
            sum: reference.mapv(f64::from),
            frame_count: 1,
        }
    }

    pub fn shape(&self) -> Shape {
        self.sum.dim()
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Add one registered frame.
    pub fn add(&mut self, frame: &Array3<u16>) -> Result<()> {
        if frame.dim() != self.shape() {
            return Err(StackError::DimensionMismatch {
                class: FrameClass::Light,
                expected: self.shape(),
                found: frame.dim(),
            });
        }
        self.sum.zip_mut_with(frame, |s, &v| *s += f64::from(v));
        self.frame_count += 1;
        Ok(())
    }

    /// Fold another partial accumulator into this one.
    pub fn merge(mut self, other: Accumulator) -> Result<Accumulator> {
        if other.shape() != self.shape() {
            return Err(StackError::DimensionMismatch {
                class: FrameClass::Light,
                expected: self.shape(),
                found: other.shape(),
            });
        }
        self.sum += &other.sum;
        self.frame_count += other.frame_count;
        Ok(self)
    }

    pub fn finish(self, mode: CombineMode) -> Result<StackedImage> {
        if self.frame_count == 0 {
            return Err(StackError::EmptySequence);
        }
        let data = match mode {
            CombineMode::Sum => self.sum,
            CombineMode::Mean => self.sum / self.frame_count as f64,
        };
        Ok(StackedImage {
            data,
            frame_count: self.frame_count,
        })
    }
}

/// The finished composite.
#[derive(Clone, Debug)]
pub struct StackedImage {
    /// Pixel data, shape = (height, width, channels)
    pub data: Array3<f64>,
    pub frame_count: usize,
}

impl StackedImage {
    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    pub fn channels(&self) -> usize {
        self.data.dim().2
    }

    /// Minimum and maximum pixel value.
    pub fn range(&self) -> (f64, f64) {
        if self.data.is_empty() {
            return (0.0, 0.0);
        }
        self.data
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }
}
