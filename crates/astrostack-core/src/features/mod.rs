//! Keypoint detection and descriptor matching.
//!
//! Three conventional strategies ship behind [`FeatureDetector`]: ORB and
//! AKAZE produce binary descriptors compared by Hamming distance, SIFT
//! produces float descriptors compared by L2 distance. All of them run on
//! the 8-bit downsample of a calibrated frame's luminance.

pub mod akaze;
pub mod fast;
pub mod matcher;
pub mod orb;
pub mod sift;

use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calibration::HotPixelIsolator;
use crate::error::{Result, StackError};
use crate::frame::{downsample, CalibratedFrame};

pub use akaze::{AkazeDetector, AkazeParams};
pub use matcher::{match_features, MatchParams};
pub use orb::{OrbDetector, OrbParams};
pub use sift::{SiftDetector, SiftParams};

/// Feature detector selected for a run.
///
/// Parsed case-insensitively; any other name is an
/// [`StackError::InvalidConfiguration`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DetectorKind {
    #[default]
    Orb,
    Sift,
    Akaze,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 3] = [Self::Orb, Self::Sift, Self::Akaze];

    pub fn metric(self) -> DistanceMetric {
        match self {
            Self::Orb | Self::Akaze => DistanceMetric::Hamming,
            Self::Sift => DistanceMetric::L2,
        }
    }

    /// Instantiate the strategy for this kind.
    pub fn detector(self, params: &DetectorParams) -> Box<dyn FeatureDetector> {
        match self {
            Self::Orb => Box::new(OrbDetector::new(params.orb.clone())),
            Self::Sift => Box::new(SiftDetector::new(params.sift.clone())),
            Self::Akaze => Box::new(AkazeDetector::new(params.akaze.clone())),
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Orb => write!(f, "ORB"),
            Self::Sift => write!(f, "SIFT"),
            Self::Akaze => write!(f, "AKAZE"),
        }
    }
}

impl FromStr for DetectorKind {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "orb" => Ok(Self::Orb),
            "sift" => Ok(Self::Sift),
            "akaze" => Ok(Self::Akaze),
            other => Err(StackError::InvalidConfiguration(format!(
                "unknown detector '{other}', expected one of ORB, SIFT, AKAZE"
            ))),
        }
    }
}

impl TryFrom<String> for DetectorKind {
    type Error = StackError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DetectorKind> for String {
    fn from(kind: DetectorKind) -> Self {
        kind.to_string().to_ascii_lowercase()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistanceMetric {
    Hamming,
    L2,
}

/// A detected point in full-resolution frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Detector response; larger is stronger.
    pub response: f32,
    /// Orientation in radians.
    pub angle: f32,
    /// Pyramid level or octave the point was found in.
    pub octave: usize,
    /// Diameter of the described neighbourhood in pixels.
    pub size: f32,
}

/// Descriptor table, one row per keypoint.
#[derive(Clone, Debug, PartialEq)]
pub enum Descriptors {
    Binary(Array2<u8>),
    Float(Array2<f32>),
}

impl Descriptors {
    pub fn len(&self) -> usize {
        match self {
            Self::Binary(d) => d.nrows(),
            Self::Float(d) => d.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metric(&self) -> DistanceMetric {
        match self {
            Self::Binary(_) => DistanceMetric::Hamming,
            Self::Float(_) => DistanceMetric::L2,
        }
    }

    /// Build a binary table from fixed-width rows.
    pub fn from_binary_rows<const N: usize>(rows: &[[u8; N]]) -> Self {
        Self::Binary(Array2::from_shape_fn((rows.len(), N), |(r, c)| rows[r][c]))
    }

    /// Build a float table from rows of equal width `dim`.
    pub fn from_float_rows(rows: &[Vec<f32>], dim: usize) -> Self {
        Self::Float(Array2::from_shape_fn((rows.len(), dim), |(r, c)| rows[r][c]))
    }
}

/// Keypoints with their descriptors, index-aligned.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureSet {
    keypoints: Vec<Keypoint>,
    descriptors: Descriptors,
}

impl FeatureSet {
    pub fn new(keypoints: Vec<Keypoint>, descriptors: Descriptors) -> Result<Self> {
        if keypoints.len() != descriptors.len() {
            return Err(StackError::FeatureMismatch {
                keypoints: keypoints.len(),
                descriptors: descriptors.len(),
            });
        }
        Ok(Self {
            keypoints,
            descriptors,
        })
    }

    pub fn empty(metric: DistanceMetric) -> Self {
        let descriptors = match metric {
            DistanceMetric::Hamming => Descriptors::Binary(Array2::zeros((0, 0))),
            DistanceMetric::L2 => Descriptors::Float(Array2::zeros((0, 0))),
        };
        Self {
            keypoints: Vec::new(),
            descriptors,
        }
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    pub fn descriptors(&self) -> &Descriptors {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Correspondence between a query keypoint and a train keypoint.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Match {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: f32,
}

/// Retained matches, ordered by ascending distance.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatchSet {
    matches: Vec<Match>,
}

impl MatchSet {
    /// Sorts by distance; ties keep query order.
    pub fn new(mut matches: Vec<Match>) -> Self {
        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Self { matches }
    }

    pub fn as_slice(&self) -> &[Match] {
        &self.matches
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Match> {
        self.matches.iter()
    }

    /// Lowest-distance match.
    pub fn best(&self) -> Option<&Match> {
        self.matches.first()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Keep the best `floor(len * fraction)` matches.
    pub fn retain_fraction(&mut self, fraction: f32) {
        let keep = (self.matches.len() as f32 * fraction).floor() as usize;
        self.matches.truncate(keep);
    }
}

/// Detection strategy over an 8-bit plane.
pub trait FeatureDetector: Send + Sync {
    fn detect(&self, image: &Array2<u8>) -> FeatureSet;

    fn metric(&self) -> DistanceMetric;
}

/// Per-detector tuning, as stored in the run configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    pub orb: OrbParams,
    pub sift: SiftParams,
    pub akaze: AkazeParams,
}

/// Detect features on a calibrated frame.
///
/// Works on a scratch luminance plane: saturated peaks are isolated, the plane
/// is downsampled to 8 bits, the detector runs, and the isolated pixels are
/// restored. The calibrated frame itself is never modified.
pub fn extract_features(
    frame: &CalibratedFrame,
    detector: &dyn FeatureDetector,
    isolator: &HotPixelIsolator,
) -> FeatureSet {
    let mut plane = frame.luminance();
    let features = isolator.with_isolated(&mut plane, |isolated| detector.detect(&downsample(isolated)));
    debug!(
        path = %frame.path().display(),
        keypoints = features.len(),
        "Extracted features"
    );
    features
}

/// Convert an 8-bit plane to f32 in the 0..255 range.
pub(crate) fn to_f32(image: &Array2<u8>) -> Array2<f32> {
    image.mapv(f32::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_detector_kind_case_insensitive() {
        assert_eq!("orb".parse::<DetectorKind>().unwrap(), DetectorKind::Orb);
        assert_eq!("SIFT".parse::<DetectorKind>().unwrap(), DetectorKind::Sift);
        assert_eq!(" Akaze ".parse::<DetectorKind>().unwrap(), DetectorKind::Akaze);
        assert!(matches!(
            "surf".parse::<DetectorKind>(),
            Err(StackError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn feature_set_rejects_length_mismatch() {
        let kp = Keypoint {
            x: 1.0,
            y: 2.0,
            response: 1.0,
            angle: 0.0,
            octave: 0,
            size: 31.0,
        };
        let descriptors = Descriptors::Binary(Array2::zeros((2, 32)));
        assert!(matches!(
            FeatureSet::new(vec![kp], descriptors),
            Err(StackError::FeatureMismatch { keypoints: 1, descriptors: 2 })
        ));
    }

    #[test]
    fn retain_fraction_floors() {
        let matches = (0..5)
            .map(|i| Match {
                query_idx: i,
                train_idx: i,
                distance: (5 - i) as f32,
            })
            .collect();
        let mut set = MatchSet::new(matches);
        assert_eq!(set.best().unwrap().query_idx, 4);
        set.retain_fraction(0.5);
        assert_eq!(set.len(), 2);
    }
}
