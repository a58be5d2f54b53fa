//! Alignment of a calibrated frame onto the reference frame.
//!
//! Matches are turned into point correspondences and fed to RANSAC. A
//! homography warps the frame; when estimation fails the frame is rolled by
//! the integer offset between its best-matching keypoint and the reference's.

pub mod homography;
pub mod warp;

use std::fmt;

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::features::{match_features, DetectorKind, FeatureSet, MatchParams, MatchSet};
use crate::frame::CalibratedFrame;

pub use homography::{estimate_ransac, Homography, RansacFit, RansacParams};
pub use warp::{roll, warp_perspective};

/// How a frame was brought into the reference grid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Transform {
    /// The frame is the reference itself.
    Reference,
    Homography(Homography),
    /// Cyclic integer shift used when no homography could be estimated.
    Translation { dx: i64, dy: i64 },
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference => write!(f, "reference"),
            Self::Homography(_) => write!(f, "homography"),
            Self::Translation { dx, dy } => write!(f, "translation ({dx}, {dy})"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationParams {
    pub matching: MatchParams,
    pub ransac: RansacParams,
}

/// A calibrated frame resampled into the reference grid.
#[derive(Clone, Debug)]
pub struct AlignedFrame {
    pub data: Array3<u16>,
    pub transform: Transform,
    /// Matches retained after filtering.
    pub matches: usize,
}

/// Align `frame` (with its `features`) onto the reference described by `base`.
///
/// Never fails: estimation problems fall back to an integer translation.
pub fn register(
    frame: &CalibratedFrame,
    features: &FeatureSet,
    base: &FeatureSet,
    kind: DetectorKind,
    params: &RegistrationParams,
) -> AlignedFrame {
    let matches = match_features(features, base, kind, &params.matching);
    let (src, dst) = correspondences(features, base, &matches);

    let fitted = estimate_ransac(&src, &dst, &params.ransac)
        .and_then(|fit| warp_perspective(&frame.data, &fit.homography).map(|data| (data, fit.homography)));

    match fitted {
        Ok((data, homography)) => AlignedFrame {
            data,
            transform: Transform::Homography(homography),
            matches: matches.len(),
        },
        Err(e) => {
            let (dx, dy) = fallback_translation(features, base, &matches);
            debug!(
                path = %frame.path().display(),
                reason = %e,
                dx,
                dy,
                "Homography unavailable, rolling frame"
            );
            AlignedFrame {
                data: roll(&frame.data, dx, dy),
                transform: Transform::Translation { dx, dy },
                matches: matches.len(),
            }
        }
    }
}

/// Candidate and reference coordinates of every retained match.
pub fn correspondences(
    features: &FeatureSet,
    base: &FeatureSet,
    matches: &MatchSet,
) -> (Vec<(f64, f64)>, Vec<(f64, f64)>) {
    matches
        .iter()
        .filter_map(|m| {
            let q = features.keypoints().get(m.query_idx)?;
            let t = base.keypoints().get(m.train_idx)?;
            Some(((q.x as f64, q.y as f64), (t.x as f64, t.y as f64)))
        })
        .unzip()
}

/// Offset from the best match, else from the first keypoint of each set,
/// else zero. Truncated toward zero.
pub fn fallback_translation(features: &FeatureSet, base: &FeatureSet, matches: &MatchSet) -> (i64, i64) {
    let pair = matches
        .best()
        .and_then(|m| Some((features.keypoints().get(m.query_idx)?, base.keypoints().get(m.train_idx)?)))
        .or_else(|| Some((features.keypoints().first()?, base.keypoints().first()?)));

    match pair {
        Some((from, to)) => ((to.x - from.x).trunc() as i64, (to.y - from.y).trunc() as i64),
        None => (0, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{Descriptors, Keypoint, Match};
    use ndarray::Array2;

    fn keypoint(x: f32, y: f32) -> Keypoint {
        Keypoint {
            x,
            y,
            response: 1.0,
            angle: 0.0,
            octave: 0,
            size: 7.0,
        }
    }

    fn set(points: &[(f32, f32)]) -> FeatureSet {
        let kps = points.iter().map(|&(x, y)| keypoint(x, y)).collect();
        FeatureSet::new(kps, Descriptors::Binary(Array2::zeros((points.len(), 32)))).unwrap()
    }

    #[test]
    fn fallback_prefers_best_match() {
        let features = set(&[(1.0, 1.0), (10.7, 3.2)]);
        let base = set(&[(4.0, 9.0), (13.0, 1.0)]);
        let matches = MatchSet::new(vec![
            Match {
                query_idx: 0,
                train_idx: 0,
                distance: 9.0,
            },
            Match {
                query_idx: 1,
                train_idx: 1,
                distance: 2.0,
            },
        ]);
        assert_eq!(fallback_translation(&features, &base, &matches), (2, -2));
    }

    #[test]
    fn fallback_uses_first_keypoints_without_matches() {
        let features = set(&[(5.5, 2.0)]);
        let base = set(&[(1.0, 7.9)]);
        assert_eq!(fallback_translation(&features, &base, &MatchSet::default()), (-4, 5));
    }

    #[test]
    fn fallback_is_zero_for_empty_sets() {
        let features = set(&[(5.0, 2.0)]);
        let base = set(&[]);
        assert_eq!(fallback_translation(&features, &base, &MatchSet::default()), (0, 0));
    }
}
