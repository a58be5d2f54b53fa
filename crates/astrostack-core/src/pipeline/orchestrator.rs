use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::calibration::{build_masters, calibrate, HotPixelIsolator, MasterFrames};
use crate::error::{Result, StackError};
use crate::features::{extract_features, FeatureDetector, FeatureSet};
use crate::frame::{CalibratedFrame, Shape};
use crate::io::{decode_frame, FrameDecoder, OutputSink};
use crate::manifest::{FileManifest, FrameClass};
use crate::register::{register, RegistrationParams, Transform};
use crate::stack::Accumulator;

use super::config::StackConfig;
use super::types::{FrameRegistration, NoOpReporter, ProgressReporter, RunStage, SkippedFrame, StackReport};

/// Stack the manifest's light frames.
pub fn run_stack(
    manifest: &FileManifest,
    config: &StackConfig,
    decoder: &dyn FrameDecoder,
    sink: &dyn OutputSink,
) -> Result<StackReport> {
    run_stack_reported(manifest, config, decoder, sink, Arc::new(NoOpReporter))
}

/// Stack the manifest's light frames with a thread-safe progress reporter.
///
/// Options and manifest are validated before any file is read. Single light
/// frames that fail to decode, calibrate or match shapes are skipped and
/// listed in the report; the run only fails when nothing could be stacked.
pub fn run_stack_reported(
    manifest: &FileManifest,
    config: &StackConfig,
    decoder: &dyn FrameDecoder,
    sink: &dyn OutputSink,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<StackReport> {
    let reporter: Arc<dyn ProgressReporter> = if config.quiet {
        Arc::new(NoOpReporter)
    } else {
        reporter
    };

    let mut run = Run {
        stage: RunStage::Init,
        reporter: reporter.as_ref(),
    };
    let result = run.execute(manifest, config, decoder, sink);
    if let Err(e) = &result {
        error!(stage = %run.stage, error = %e, "Stacking run failed");
        run.enter(RunStage::Failed, None);
    }
    result
}

/// Per-run state machine.
struct Run<'a> {
    stage: RunStage,
    reporter: &'a dyn ProgressReporter,
}

/// Frames merged on one worker.
struct Partial {
    accumulator: Accumulator,
    registrations: Vec<(usize, FrameRegistration)>,
    skipped: Vec<(usize, SkippedFrame)>,
}

impl Partial {
    fn new(shape: Shape) -> Self {
        Self {
            accumulator: Accumulator::new(shape),
            registrations: Vec::new(),
            skipped: Vec::new(),
        }
    }

    fn merge(mut self, other: Partial) -> Result<Partial> {
        self.accumulator = self.accumulator.merge(other.accumulator)?;
        self.registrations.extend(other.registrations);
        self.skipped.extend(other.skipped);
        Ok(self)
    }
}

/// Reference frame chosen during the sequential scan.
struct Reference {
    index: usize,
    frame: CalibratedFrame,
    features: FeatureSet,
}

/// Everything the per-frame work needs, shared read-only across workers.
struct LightContext<'a> {
    decoder: &'a dyn FrameDecoder,
    masters: &'a MasterFrames,
    detector: Box<dyn FeatureDetector>,
    isolator: HotPixelIsolator,
}

impl LightContext<'_> {
    /// Decode, calibrate and detect one light frame.
    fn process(&self, path: &Path) -> Result<(CalibratedFrame, FeatureSet)> {
        let raw = decode_frame(self.decoder, path)?;
        let (dark, flat) = self.masters.calibration_pair();
        let frame = calibrate(&raw, dark, flat)?;
        let features = extract_features(&frame, self.detector.as_ref(), &self.isolator);
        Ok((frame, features))
    }
}

impl Run<'_> {
    fn enter(&mut self, stage: RunStage, total: Option<usize>) {
        self.stage = stage;
        info!(stage = %stage, "Entering stage");
        self.reporter.begin_stage(stage, total);
    }

    fn execute(
        &mut self,
        manifest: &FileManifest,
        config: &StackConfig,
        decoder: &dyn FrameDecoder,
        sink: &dyn OutputSink,
    ) -> Result<StackReport> {
        self.enter(RunStage::Init, None);
        config.validate()?;
        manifest.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build()
            .map_err(|e| StackError::InvalidConfiguration(format!("thread pool: {e}")))?;
        self.reporter.finish_stage();

        pool.install(|| self.stack(manifest, config, decoder, sink))
    }

    fn stack(
        &mut self,
        manifest: &FileManifest,
        config: &StackConfig,
        decoder: &dyn FrameDecoder,
        sink: &dyn OutputSink,
    ) -> Result<StackReport> {
        let calibration_count: usize = FrameClass::ALL
            .iter()
            .filter(|&&c| c != FrameClass::Light)
            .map(|&c| manifest.count(c))
            .sum();
        self.enter(RunStage::BuildingMasters, Some(calibration_count));
        let masters = build_masters(manifest, decoder);
        self.reporter.finish_stage();

        let lights = &manifest.light;
        self.enter(RunStage::ProcessingLights, Some(lights.len()));
        let context = LightContext {
            decoder,
            masters: &masters,
            detector: config.detector.detector(&config.detectors),
            isolator: HotPixelIsolator::default(),
        };
        let params = config.registration_params();

        let scan = self.find_reference(lights, &context);
        let done = AtomicUsize::new(scan.next);

        let (reference_path, mut partial) = match scan.reference {
            Some(reference) => {
                let shape = reference.frame.shape();
                let mut partial = Partial::new(shape);
                partial.accumulator = Accumulator::seeded(&reference.frame.data);
                partial.registrations.push((
                    reference.index,
                    FrameRegistration {
                        path: lights[reference.index].clone(),
                        transform: Transform::Reference,
                        matches: 0,
                    },
                ));
                fold_featureless(&mut partial, scan.featureless, &lights[reference.index]);

                let reporter = self.reporter;
                let first = scan.next;
                let rest = lights[first..]
                    .par_iter()
                    .enumerate()
                    .fold(
                        || Partial::new(shape),
                        |mut p, (offset, path)| {
                            register_light(&mut p, first + offset, path, &context, &reference, config, &params);
                            reporter.advance(done.fetch_add(1, Ordering::Relaxed) + 1);
                            p
                        },
                    )
                    .map(Ok)
                    .try_reduce(|| Partial::new(shape), Partial::merge)?;

                (lights[reference.index].clone(), partial.merge(rest)?)
            }
            None => {
                // No frame produced features: the first processed frame is the
                // reference and every other one enters with zero offset.
                let Some(first) = scan.featureless.first_index() else {
                    return Err(StackError::NoUsableFrames {
                        attempted: lights.len(),
                    });
                };
                let mut partial = Partial::new(scan.featureless.shape());
                fold_featureless(&mut partial, scan.featureless, &lights[first]);
                if let Some((_, registration)) = partial.registrations.iter_mut().find(|(i, _)| *i == first) {
                    registration.transform = Transform::Reference;
                }
                (lights[first].clone(), partial)
            }
        };
        partial.skipped.extend(scan.skipped);
        self.reporter.finish_stage();

        self.enter(RunStage::Accumulating, None);
        partial.registrations.sort_by_key(|(i, _)| *i);
        partial.skipped.sort_by_key(|(i, _)| *i);
        let image = partial.accumulator.finish(config.combine)?;
        self.reporter.finish_stage();

        self.enter(RunStage::Done, None);
        let (min, max) = image.range();
        info!(
            stacked = image.frame_count,
            skipped = partial.skipped.len(),
            reference = %reference_path.display(),
            min,
            max,
            "Stacking complete"
        );
        if !config.quiet {
            sink.present(&image, &format!("{} frames ({})", image.frame_count, config.combine));
        }
        if let Some(path) = config.save_path() {
            sink.save(&image, path)?;
        }
        self.reporter.finish_stage();

        Ok(StackReport {
            image,
            reference: reference_path,
            registrations: partial.registrations.into_iter().map(|(_, r)| r).collect(),
            skipped: partial.skipped.into_iter().map(|(_, s)| s).collect(),
            masters: masters.reports,
        })
    }

    /// Process lights in order until one yields features.
    fn find_reference(&self, lights: &[PathBuf], context: &LightContext<'_>) -> Scan {
        let mut scan = Scan {
            reference: None,
            featureless: Featureless::default(),
            skipped: Vec::new(),
            next: lights.len(),
        };

        for (index, path) in lights.iter().enumerate() {
            match context.process(path) {
                Ok((frame, features)) if !features.is_empty() => {
                    info!(path = %path.display(), keypoints = features.len(), "Selected reference frame");
                    scan.reference = Some(Reference {
                        index,
                        frame,
                        features,
                    });
                    scan.next = index + 1;
                    self.reporter.advance(index + 1);
                    break;
                }
                Ok((frame, _)) => {
                    warn!(path = %path.display(), "No features detected");
                    if let Err(e) = scan.featureless.add(index, path, &frame) {
                        scan.skipped.push(skip(index, path, &e));
                    }
                }
                Err(e) => scan.skipped.push(skip(index, path, &e)),
            }
            self.reporter.advance(index + 1);
        }
        scan
    }
}

/// Result of the sequential reference scan.
struct Scan {
    reference: Option<Reference>,
    /// Frames before the reference that decoded but produced no features.
    featureless: Featureless,
    skipped: Vec<(usize, SkippedFrame)>,
    /// First light index not yet processed.
    next: usize,
}

/// Featureless frames register with a zero offset, so they are summed as
/// they arrive instead of being kept in memory.
#[derive(Default)]
struct Featureless {
    accumulator: Option<Accumulator>,
    frames: Vec<(usize, PathBuf)>,
}

impl Featureless {
    fn add(&mut self, index: usize, path: &Path, frame: &CalibratedFrame) -> Result<()> {
        match &mut self.accumulator {
            Some(acc) => acc.add(&frame.data)?,
            None => self.accumulator = Some(Accumulator::seeded(&frame.data)),
        }
        self.frames.push((index, path.to_path_buf()));
        Ok(())
    }

    fn first_index(&self) -> Option<usize> {
        self.frames.first().map(|(i, _)| *i)
    }

    fn shape(&self) -> Shape {
        self.accumulator.as_ref().map_or((0, 0, 0), Accumulator::shape)
    }
}

/// Merge the featureless frames into `partial`, or skip them when their shape
/// differs from the reference.
fn fold_featureless(partial: &mut Partial, featureless: Featureless, reference: &Path) {
    let Some(acc) = featureless.accumulator else {
        return;
    };
    let shape = acc.shape();
    if partial.accumulator.frame_count() == 0 {
        partial.accumulator = acc;
    } else if shape != partial.accumulator.shape() {
        warn!(
            reference = %reference.display(),
            found = ?shape,
            count = featureless.frames.len(),
            "Featureless frames differ in shape from the reference"
        );
        let reason = format!("dimensions {shape:?} differ from the reference");
        partial.skipped.extend(featureless.frames.into_iter().map(|(index, path)| {
            (
                index,
                SkippedFrame {
                    path,
                    reason: reason.clone(),
                },
            )
        }));
        return;
    } else {
        let seeded = std::mem::replace(&mut partial.accumulator, Accumulator::new(shape));
        match seeded.merge(acc) {
            Ok(merged) => partial.accumulator = merged,
            Err(e) => {
                warn!(error = %e, "Could not merge featureless frames");
                return;
            }
        }
    }

    partial
        .registrations
        .extend(featureless.frames.into_iter().map(|(index, path)| {
            (
                index,
                FrameRegistration {
                    path,
                    transform: Transform::Translation { dx: 0, dy: 0 },
                    matches: 0,
                },
            )
        }));
}

fn register_light(
    partial: &mut Partial,
    index: usize,
    path: &Path,
    context: &LightContext<'_>,
    reference: &Reference,
    config: &StackConfig,
    params: &RegistrationParams,
) {
    let (frame, features) = match context.process(path) {
        Ok(processed) => processed,
        Err(e) => {
            partial.skipped.push(skip(index, path, &e));
            return;
        }
    };

    let aligned = register(&frame, &features, &reference.features, config.detector, params);
    if let Err(e) = partial.accumulator.add(&aligned.data) {
        partial.skipped.push(skip(index, path, &e));
        return;
    }
    partial.registrations.push((
        index,
        FrameRegistration {
            path: path.to_path_buf(),
            transform: aligned.transform,
            matches: aligned.matches,
        },
    ));
}

fn skip(index: usize, path: &Path, e: &StackError) -> (usize, SkippedFrame) {
    warn!(path = %path.display(), error = %e, "Skipping light frame");
    let reason = match e {
        StackError::Decode { reason, .. } => reason.clone(),
        other => other.to_string(),
    };
    (
        index,
        SkippedFrame {
            path: path.to_path_buf(),
            reason,
        },
    )
}
