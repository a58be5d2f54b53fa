use std::path::PathBuf;

use thiserror::Error;

use crate::manifest::FrameClass;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("Dimension mismatch in {class} frames: expected {expected:?}, found {found:?}")]
    DimensionMismatch {
        class: FrameClass,
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("No light frames in manifest")]
    EmptyManifest,

    #[error("None of the {attempted} light frames could be processed")]
    NoUsableFrames { attempted: usize },

    #[error("Image format error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Feature set has {keypoints} keypoints but {descriptors} descriptors")]
    FeatureMismatch { keypoints: usize, descriptors: usize },

    #[error("Empty frame sequence")]
    EmptySequence,
}

impl StackError {
    pub(crate) fn decode(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Why a homography could not be estimated from a set of correspondences.
///
/// The registration engine recovers from every variant with a translation
/// fallback, so these never reach the caller of a stacking run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistrationError {
    #[error("{found} correspondences, at least {required} required")]
    InsufficientCorrespondences { found: usize, required: usize },

    #[error("Degenerate geometry: {0}")]
    Degenerate(String),
}

pub type Result<T> = std::result::Result<T, StackError>;
