//! Brute-force descriptor matching and per-detector filtering.

use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Descriptors, DetectorKind, FeatureSet, Match, MatchSet};
use crate::consts::{DEFAULT_MATCH_FRACTION, SIFT_RATIO_TEST};

/// Below this many query descriptors matching runs on the calling thread.
const PARALLEL_QUERY_THRESHOLD: usize = 64;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchParams {
    /// Share of sorted cross-checked matches kept for binary descriptors.
    pub fraction: f32,
    /// Nearest/second-nearest ratio for float descriptors.
    pub ratio: f32,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            fraction: DEFAULT_MATCH_FRACTION,
            ratio: SIFT_RATIO_TEST,
        }
    }
}

/// Match `query` (the candidate frame) against `train` (the reference).
///
/// SIFT keeps matches passing the nearest-neighbour ratio test. ORB and AKAZE
/// keep the best `floor(len * fraction)` cross-checked matches. The result is
/// sorted by ascending distance. Descriptor kinds that do not fit the
/// detector produce no matches.
pub fn match_features(query: &FeatureSet, train: &FeatureSet, kind: DetectorKind, params: &MatchParams) -> MatchSet {
    let matches = match (kind, query.descriptors(), train.descriptors()) {
        (DetectorKind::Sift, Descriptors::Float(q), Descriptors::Float(t)) => ratio_test(q, t, params.ratio),
        (DetectorKind::Orb | DetectorKind::Akaze, Descriptors::Binary(q), Descriptors::Binary(t)) => {
            let mut set = cross_check(q, t);
            set.retain_fraction(params.fraction);
            set
        }
        _ => MatchSet::default(),
    };
    debug!(
        detector = %kind,
        query = query.len(),
        train = train.len(),
        retained = matches.len(),
        "Matched descriptors"
    );
    matches
}

pub fn hamming(a: ArrayView1<u8>, b: ArrayView1<u8>) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

pub fn l2(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}

/// Nearest train row for every query row, by Hamming distance.
fn nearest_binary(query: &Array2<u8>, train: &Array2<u8>) -> Vec<Option<(usize, u32)>> {
    let nearest = |q: ArrayView1<u8>| -> Option<(usize, u32)> {
        train
            .rows()
            .into_iter()
            .enumerate()
            .map(|(i, t)| (i, hamming(q, t)))
            .min_by_key(|&(i, d)| (d, i))
    };
    if query.nrows() >= PARALLEL_QUERY_THRESHOLD {
        query.outer_iter().into_par_iter().map(nearest).collect()
    } else {
        query.outer_iter().map(nearest).collect()
    }
}

/// Mutual nearest neighbours between two binary descriptor tables.
pub fn cross_check(query: &Array2<u8>, train: &Array2<u8>) -> MatchSet {
    if query.nrows() == 0 || train.nrows() == 0 {
        return MatchSet::default();
    }
    let forward = nearest_binary(query, train);
    let backward = nearest_binary(train, query);

    let matches = forward
        .into_iter()
        .enumerate()
        .filter_map(|(q, best)| {
            let (t, distance) = best?;
            match backward[t] {
                Some((back, _)) if back == q => Some(Match {
                    query_idx: q,
                    train_idx: t,
                    distance: distance as f32,
                }),
                _ => None,
            }
        })
        .collect();
    MatchSet::new(matches)
}

/// Lowe's ratio test over the two nearest train rows.
pub fn ratio_test(query: &Array2<f32>, train: &Array2<f32>, ratio: f32) -> MatchSet {
    if train.nrows() < 2 {
        return MatchSet::default();
    }
    let two_nearest = |(q_idx, q): (usize, ArrayView1<f32>)| -> Option<Match> {
        let mut best = (usize::MAX, f32::INFINITY);
        let mut second = f32::INFINITY;
        for (i, t) in train.outer_iter().enumerate() {
            let d = l2(q, t);
            if d < best.1 {
                second = best.1;
                best = (i, d);
            } else if d < second {
                second = d;
            }
        }
        (best.1 < ratio * second).then_some(Match {
            query_idx: q_idx,
            train_idx: best.0,
            distance: best.1,
        })
    };

    let matches: Vec<Match> = if query.nrows() >= PARALLEL_QUERY_THRESHOLD {
        query.outer_iter().into_par_iter().enumerate().filter_map(two_nearest).collect()
    } else {
        query.outer_iter().enumerate().filter_map(two_nearest).collect()
    };
    MatchSet::new(matches)
}
