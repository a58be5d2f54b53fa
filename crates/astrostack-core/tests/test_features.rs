mod common;

use ndarray::{Array2, Axis};

use astrostack_core::calibration::HotPixelIsolator;
use astrostack_core::error::StackError;
use astrostack_core::features::{
    extract_features, match_features, Descriptors, DetectorKind, DetectorParams, DistanceMetric, FeatureSet, Keypoint,
    MatchParams,
};
use astrostack_core::frame::{downsample, CalibratedFrame};

use common::{random_stars, render_stars, shift_plane};

const SIZE: usize = 160;

fn calibrated(plane: &Array2<f32>) -> CalibratedFrame {
    CalibratedFrame {
        data: plane.mapv(|v| v as u16).insert_axis(Axis(2)),
        source_bit_depth: 16,
        path: "synthetic.fits".into(),
    }
}

fn star_field(seed: u64) -> Array2<f32> {
    render_stars(SIZE, SIZE, &random_stars(seed, 70, SIZE, SIZE, 12), 1_500.0)
}

fn detect(kind: DetectorKind, plane: &Array2<f32>) -> FeatureSet {
    let detector = kind.detector(&DetectorParams::default());
    extract_features(&calibrated(plane), detector.as_ref(), &HotPixelIsolator::default())
}

// ---------------------------------------------------------------------------
// DetectorKind
// ---------------------------------------------------------------------------

#[test]
fn test_detector_kind_display_and_parse() {
    for kind in DetectorKind::ALL {
        assert_eq!(kind.to_string().parse::<DetectorKind>().unwrap(), kind);
    }
    assert_eq!(DetectorKind::default(), DetectorKind::Orb);
}

#[test]
fn test_unknown_detector_is_invalid_configuration() {
    let err = "BRISK".parse::<DetectorKind>().unwrap_err();
    assert!(matches!(err, StackError::InvalidConfiguration(_)));
}

#[test]
fn test_metric_per_detector() {
    assert_eq!(DetectorKind::Orb.metric(), DistanceMetric::Hamming);
    assert_eq!(DetectorKind::Akaze.metric(), DistanceMetric::Hamming);
    assert_eq!(DetectorKind::Sift.metric(), DistanceMetric::L2);
}

// ---------------------------------------------------------------------------
// FeatureSet
// ---------------------------------------------------------------------------

#[test]
fn test_feature_set_rejects_length_mismatch() {
    let keypoints = vec![Keypoint {
        x: 1.0,
        y: 2.0,
        response: 1.0,
        angle: 0.0,
        octave: 0,
        size: 7.0,
    }];
    let err = FeatureSet::new(keypoints, Descriptors::Binary(Array2::zeros((2, 32)))).unwrap_err();
    assert!(matches!(err, StackError::FeatureMismatch { keypoints: 1, descriptors: 2 }));
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

#[test]
fn test_downsample_truncates() {
    let plane = Array2::from_shape_vec((1, 4), vec![0u16, 256, 257, 65_535]).unwrap();
    assert_eq!(downsample(&plane).iter().copied().collect::<Vec<u8>>(), vec![0, 0, 1, 255]);
}

#[test]
fn test_blank_frame_has_no_features() {
    let blank = Array2::<f32>::zeros((100, 100));
    for kind in DetectorKind::ALL {
        assert!(detect(kind, &blank).is_empty(), "{kind} found features on a blank frame");
    }
}

#[test]
fn test_every_detector_finds_stars() {
    let field = star_field(7);
    for kind in DetectorKind::ALL {
        let features = detect(kind, &field);
        assert!(features.len() >= 10, "{kind} found only {} keypoints", features.len());
        assert_eq!(features.descriptors().metric(), kind.metric());
        for kp in features.keypoints() {
            assert!(kp.x >= 0.0 && kp.x < SIZE as f32 && kp.y >= 0.0 && kp.y < SIZE as f32);
        }
    }
}

#[test]
fn test_detection_is_deterministic() {
    let field = star_field(11);
    for kind in DetectorKind::ALL {
        assert_eq!(detect(kind, &field), detect(kind, &field));
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

#[test]
fn test_shifted_field_matches_consistently() {
    let field = star_field(3);
    let shifted = shift_plane(&field, 6, -4, 1_500.0);

    for kind in DetectorKind::ALL {
        let base = detect(kind, &field);
        let moved = detect(kind, &shifted);
        let matches = match_features(&moved, &base, kind, &MatchParams::default());
        assert!(!matches.is_empty(), "{kind} produced no matches");

        let consistent = matches
            .iter()
            .filter(|m| {
                let q = &moved.keypoints()[m.query_idx];
                let t = &base.keypoints()[m.train_idx];
                ((q.x - t.x) - 6.0).abs() < 1.5 && ((q.y - t.y) + 4.0).abs() < 1.5
            })
            .count();
        assert!(consistent >= 4, "{kind}: {consistent} of {} matches agree with the shift", matches.len());

        let distances: Vec<f32> = matches.iter().map(|m| m.distance).collect();
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    }
}

#[test]
fn test_binary_matches_keep_fraction() {
    let field = star_field(5);
    let features = detect(DetectorKind::Orb, &field);
    let all = match_features(&features, &features, DetectorKind::Orb, &MatchParams { fraction: 1.0, ratio: 0.6 });
    let most = match_features(&features, &features, DetectorKind::Orb, &MatchParams { fraction: 0.5, ratio: 0.6 });
    assert_eq!(most.len(), (all.len() as f32 * 0.5).floor() as usize);
}

#[test]
fn test_mismatched_descriptor_kinds_do_not_match() {
    let field = star_field(9);
    let orb = detect(DetectorKind::Orb, &field);
    let sift = detect(DetectorKind::Sift, &field);
    assert!(match_features(&orb, &sift, DetectorKind::Orb, &MatchParams::default()).is_empty());
}
