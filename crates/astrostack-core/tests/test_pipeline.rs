mod common;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ndarray::Array2;

use astrostack_core::error::StackError;
use astrostack_core::frame::RawFrame;
use astrostack_core::manifest::FileManifest;
use astrostack_core::pipeline::{run_stack, run_stack_reported, ProgressReporter, RunStage, StackConfig};
use astrostack_core::register::Transform;
use astrostack_core::stack::CombineMode;

use common::{random_stars, render_stars, shift_plane, uniform_frame, MockDecoder, RecordingSink, UnreachableDecoder};

fn lights(paths: &[&str]) -> FileManifest {
    FileManifest {
        light: paths.iter().map(|p| PathBuf::from(*p)).collect(),
        ..Default::default()
    }
}

#[derive(Default)]
struct StageLog {
    stages: Mutex<Vec<RunStage>>,
    advanced: AtomicUsize,
}

impl ProgressReporter for StageLog {
    fn begin_stage(&self, stage: RunStage, _total_items: Option<usize>) {
        self.stages.lock().unwrap().push(stage);
    }

    fn advance(&self, _items_done: usize) {
        self.advanced.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[test]
fn test_empty_manifest_fails() {
    let err = run_stack(&FileManifest::default(), &StackConfig::default(), &UnreachableDecoder, &RecordingSink::default())
        .unwrap_err();
    assert!(matches!(err, StackError::EmptyManifest));
}

#[test]
fn test_invalid_detector_fails_before_io() {
    let mut config = StackConfig::default();
    assert!(config.set_detector("FREAK").is_err());

    let err = StackConfig::from_toml_str("detector = \"freak\"").unwrap_err();
    assert!(matches!(err, StackError::Config(_)));
}

#[test]
fn test_invalid_match_fraction_fails_before_io() {
    let config = StackConfig {
        match_fraction: 1.5,
        ..Default::default()
    };
    let err = run_stack(&lights(&["a.fits"]), &config, &UnreachableDecoder, &RecordingSink::default()).unwrap_err();
    assert!(matches!(err, StackError::InvalidConfiguration(_)));
}

#[test]
fn test_failed_run_reports_failed_stage() {
    let log = Arc::new(StageLog::default());
    let result = run_stack_reported(
        &FileManifest::default(),
        &StackConfig::default(),
        &UnreachableDecoder,
        &RecordingSink::default(),
        log.clone(),
    );
    assert!(result.is_err());
    assert_eq!(*log.stages.lock().unwrap(), vec![RunStage::Init, RunStage::Failed]);
}

// ---------------------------------------------------------------------------
// Stacking
// ---------------------------------------------------------------------------

#[test]
fn test_all_zero_frames_stack_to_zero() {
    let decoder = MockDecoder::new()
        .with(uniform_frame(100, 100, 0.0, "l1.fits"))
        .with(uniform_frame(100, 100, 0.0, "l2.fits"))
        .with(uniform_frame(100, 100, 0.0, "l3.fits"));
    let sink = RecordingSink::default();

    let report = run_stack(&lights(&["l1.fits", "l2.fits", "l3.fits"]), &StackConfig::default(), &decoder, &sink)
        .unwrap();
    assert_eq!(report.image.data.dim(), (100, 100, 1));
    assert!(report.image.data.iter().all(|&v| v == 0.0));
    assert_eq!(report.stacked_count(), 3);
    assert_eq!(report.reference, PathBuf::from("l1.fits"));
    assert_eq!(report.registrations[0].transform, Transform::Reference);
    assert_eq!(report.registrations[1].transform, Transform::Translation { dx: 0, dy: 0 });
    assert_eq!(sink.presented.lock().unwrap().len(), 1);
}

#[test]
fn test_single_frame_round_trip() {
    let plane = Array2::from_shape_fn((32, 48), |(r, c)| ((r * 48 + c) * 17 % 4000) as f32);
    let decoder = MockDecoder::new().with(RawFrame::mono(plane.clone(), 16, "only.fits"));

    let report = run_stack(&lights(&["only.fits"]), &StackConfig::default(), &decoder, &RecordingSink::default())
        .unwrap();
    for ((r, c), &v) in plane.indexed_iter() {
        assert_eq!(report.image.data[[r, c, 0]], v as f64);
    }
}

#[test]
fn test_sum_is_not_averaged() {
    let decoder = MockDecoder::new()
        .with(uniform_frame(40, 40, 100.0, "a.fits"))
        .with(uniform_frame(40, 40, 300.0, "b.fits"));
    let manifest = lights(&["a.fits", "b.fits"]);

    let sum = run_stack(&manifest, &StackConfig::default(), &decoder, &RecordingSink::default()).unwrap();
    assert!(sum.image.data.iter().all(|&v| v == 400.0));

    let config = StackConfig {
        combine: CombineMode::Mean,
        ..Default::default()
    };
    let mean = run_stack(&manifest, &config, &decoder, &RecordingSink::default()).unwrap();
    assert!(mean.image.data.iter().all(|&v| v == 200.0));
}

#[test]
fn test_undecodable_lights_are_skipped() {
    let decoder = MockDecoder::new()
        .with(uniform_frame(20, 20, 10.0, "good1.fits"))
        .with(uniform_frame(20, 20, 10.0, "good2.fits"));
    let manifest = lights(&["bad.fits", "good1.fits", "missing.fits", "good2.fits"]);

    let report = run_stack(&manifest, &StackConfig::default(), &decoder, &RecordingSink::default()).unwrap();
    assert_eq!(report.stacked_count(), 2);
    assert_eq!(report.skipped_count(), 2);
    assert_eq!(report.skipped[0].path, PathBuf::from("bad.fits"));
    assert_eq!(report.skipped[1].path, PathBuf::from("missing.fits"));
    assert_eq!(report.reference, PathBuf::from("good1.fits"));
}

#[test]
fn test_empty_light_frame_is_skipped() {
    let decoder = MockDecoder::new()
        .with(uniform_frame(0, 0, 0.0, "empty.fits"))
        .with(uniform_frame(12, 12, 10.0, "good.fits"));
    let report = run_stack(&lights(&["empty.fits", "good.fits"]), &StackConfig::default(), &decoder, &RecordingSink::default())
        .unwrap();
    assert_eq!(report.stacked_count(), 1);
    assert_eq!(report.skipped_count(), 1);
    assert_eq!(report.skipped[0].path, PathBuf::from("empty.fits"));
    assert!(report.skipped[0].reason.contains("empty frame"), "{}", report.skipped[0].reason);
}

#[test]
fn test_mismatched_light_is_skipped() {
    let decoder = MockDecoder::new()
        .with(uniform_frame(20, 20, 10.0, "a.fits"))
        .with(uniform_frame(20, 24, 10.0, "b.fits"));
    let report = run_stack(&lights(&["a.fits", "b.fits"]), &StackConfig::default(), &decoder, &RecordingSink::default())
        .unwrap();
    assert_eq!(report.stacked_count(), 1);
    assert_eq!(report.skipped_count(), 1);
}

#[test]
fn test_no_usable_frames() {
    let err = run_stack(
        &lights(&["x.fits", "y.fits"]),
        &StackConfig::default(),
        &MockDecoder::new(),
        &RecordingSink::default(),
    )
    .unwrap_err();
    assert!(matches!(err, StackError::NoUsableFrames { attempted: 2 }));
}

#[test]
fn test_dark_subtracted_before_stacking() {
    let decoder = MockDecoder::new()
        .with(uniform_frame(16, 16, 500.0, "light.fits"))
        .with(uniform_frame(16, 16, 120.0, "dark1.fits"))
        .with(uniform_frame(16, 16, 80.0, "dark2.fits"))
        .with(uniform_frame(16, 16, 100.0, "dark3.fits"));
    let mut manifest = lights(&["light.fits"]);
    manifest.dark = vec!["dark1.fits".into(), "dark2.fits".into(), "dark3.fits".into()];

    let report = run_stack(&manifest, &StackConfig::default(), &decoder, &RecordingSink::default()).unwrap();
    assert!(report.image.data.iter().all(|&v| v == 400.0));
    assert!(report.masters.iter().any(|m| m.combined == 3));
}

#[test]
fn test_star_field_stack_registers_every_frame() {
    let size = 160;
    let field = render_stars(size, size, &random_stars(99, 70, size, size, 20), 1_000.0);
    let mut decoder = MockDecoder::new().with(RawFrame::mono(field.clone(), 16, "l0.fits"));
    let offsets = [(3, -2), (-4, 5), (6, 1)];
    for (i, &(dx, dy)) in offsets.iter().enumerate() {
        let plane = shift_plane(&field, dx, dy, 1_000.0);
        decoder = decoder.with(RawFrame::mono(plane, 16, format!("l{}.fits", i + 1)));
    }
    let manifest = lights(&["l0.fits", "l1.fits", "l2.fits", "l3.fits"]);
    let mut config = StackConfig {
        combine: CombineMode::Mean,
        ..Default::default()
    };
    // Full-resolution keypoints only, so correspondences are exact.
    config.detectors.orb.levels = 1;

    let report = run_stack(&manifest, &config, &decoder, &RecordingSink::default()).unwrap();
    assert_eq!(report.stacked_count(), 4);
    assert_eq!(report.registrations.len(), 4);
    assert_eq!(report.registrations[0].transform, Transform::Reference);

    for (registration, &(dx, dy)) in report.registrations[1..].iter().zip(offsets.iter()) {
        let Transform::Homography(h) = &registration.transform else {
            panic!("{} fell back to {}", registration.path.display(), registration.transform);
        };
        let (x, y) = h.apply(80.0, 80.0).unwrap();
        assert!(
            (x - (80.0 - dx as f64)).abs() < 0.5 && (y - (80.0 - dy as f64)).abs() < 0.5,
            "{}: (80, 80) -> ({x:.2}, {y:.2}), expected shift ({dx}, {dy})",
            registration.path.display()
        );
    }

    // Mean of aligned copies keeps star peaks close to the reference.
    let centre = report.image.data[[80, 80, 0]];
    let expected = field[[80, 80]] as f64;
    assert!((centre - expected).abs() < 0.1 * expected.max(1_000.0));
}

#[test]
fn test_quiet_suppresses_present_and_progress() {
    let decoder = MockDecoder::new().with(uniform_frame(8, 8, 1.0, "a.fits"));
    let sink = RecordingSink::default();
    let log = Arc::new(StageLog::default());
    let config = StackConfig {
        quiet: true,
        ..Default::default()
    };

    run_stack_reported(&lights(&["a.fits"]), &config, &decoder, &sink, log.clone()).unwrap();
    assert!(sink.presented.lock().unwrap().is_empty());
    assert!(log.stages.lock().unwrap().is_empty());
}

#[test]
fn test_auto_save_writes_output() {
    let decoder = MockDecoder::new().with(uniform_frame(8, 8, 1.0, "a.fits"));
    let sink = RecordingSink::default();
    let config = StackConfig {
        output: Some("stack.tiff".into()),
        auto_save: true,
        ..Default::default()
    };

    run_stack(&lights(&["a.fits"]), &config, &decoder, &sink).unwrap();
    assert_eq!(*sink.saved.lock().unwrap(), vec![PathBuf::from("stack.tiff")]);
}

#[test]
fn test_stage_order() {
    let decoder = MockDecoder::new().with(uniform_frame(8, 8, 1.0, "a.fits"));
    let log = Arc::new(StageLog::default());
    run_stack_reported(&lights(&["a.fits"]), &StackConfig::default(), &decoder, &RecordingSink::default(), log.clone())
        .unwrap();
    assert_eq!(
        *log.stages.lock().unwrap(),
        vec![
            RunStage::Init,
            RunStage::BuildingMasters,
            RunStage::ProcessingLights,
            RunStage::Accumulating,
            RunStage::Done
        ]
    );
    assert!(log.advanced.load(Ordering::SeqCst) >= 1);
}
