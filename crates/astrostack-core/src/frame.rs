use ndarray::{Array2, Array3, Axis, Zip};
use std::path::{Path, PathBuf};

use crate::consts::{COLOR_CHANNEL_COUNT, DOWNSAMPLE_SCALE, LUMINANCE_B, LUMINANCE_G, LUMINANCE_R};
use crate::manifest::FrameClass;

/// Buffer shape as `(height, width, channels)`.
pub type Shape = (usize, usize, usize);

/// A decoded exposure, as handed over by a [`FrameDecoder`](crate::io::FrameDecoder).
///
/// Pixel values are in the sensor's native ADU scale (not normalized), stored
/// as f32 so integer and floating-point sources share one representation.
#[derive(Clone, Debug)]
pub struct RawFrame {
    /// Pixel data, shape = (height, width, channels)
    pub data: Array3<f32>,
    /// Bit depth of the source samples (8, 16, 32, ...)
    pub bit_depth: u8,
    /// File the frame was decoded from
    pub path: PathBuf,
}

impl RawFrame {
    pub fn new(data: Array3<f32>, bit_depth: u8, path: impl Into<PathBuf>) -> Self {
        Self {
            data,
            bit_depth,
            path: path.into(),
        }
    }

    /// Wrap a single-channel plane.
    pub fn mono(plane: Array2<f32>, bit_depth: u8, path: impl Into<PathBuf>) -> Self {
        Self::new(plane.insert_axis(Axis(2)), bit_depth, path)
    }

    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    pub fn channels(&self) -> usize {
        self.data.dim().2
    }

    pub fn shape(&self) -> Shape {
        self.data.dim()
    }
}

/// Per-pixel reduction of one calibration class.
#[derive(Clone, Debug)]
pub struct MasterFrame {
    pub class: FrameClass,
    pub data: Array3<f32>,
    /// Number of source frames that went into the reduction.
    pub frame_count: usize,
}

impl MasterFrame {
    pub fn shape(&self) -> Shape {
        self.data.dim()
    }

    /// Subtract another master in place (bias or dark-flat correction).
    pub fn subtract(&mut self, other: &MasterFrame) {
        Zip::from(&mut self.data)
            .and(&other.data)
            .for_each(|v, &o| *v -= o);
    }
}

/// A light frame after dark subtraction and flat division, at 16-bit depth.
#[derive(Clone, Debug)]
pub struct CalibratedFrame {
    /// Pixel data, shape = (height, width, channels)
    pub data: Array3<u16>,
    /// Bit depth of the frame this was calibrated from
    pub source_bit_depth: u8,
    pub path: PathBuf,
}

impl CalibratedFrame {
    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    pub fn channels(&self) -> usize {
        self.data.dim().2
    }

    pub fn shape(&self) -> Shape {
        self.data.dim()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Single-plane view used for feature detection.
    ///
    /// Mono frames return their only channel, RGB frames use BT.601 weights,
    /// anything else is the channel mean.
    pub fn luminance(&self) -> Array2<u16> {
        let channels = self.channels();
        if channels == 1 {
            return self.data.index_axis(Axis(2), 0).to_owned();
        }
        let (h, w, _) = self.shape();
        let mut plane = Array2::<u16>::zeros((h, w));
        Zip::indexed(&mut plane).for_each(|(row, col), out| {
            let px = self.data.slice(ndarray::s![row, col, ..]);
            let value = if channels == COLOR_CHANNEL_COUNT {
                LUMINANCE_R * px[0] as f32 + LUMINANCE_G * px[1] as f32 + LUMINANCE_B * px[2] as f32
            } else {
                px.iter().map(|&v| v as f32).sum::<f32>() / channels as f32
            };
            *out = value.round().clamp(0.0, u16::MAX as f32) as u16;
        });
        plane
    }
}

/// Scale a 16-bit plane down to 8 bits by integer division (truncating).
pub fn downsample(plane: &Array2<u16>) -> Array2<u8> {
    plane.mapv(|v| (v / DOWNSAMPLE_SCALE) as u8)
}
