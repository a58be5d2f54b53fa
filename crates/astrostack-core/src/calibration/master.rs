use std::path::PathBuf;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::consts::PARALLEL_FRAME_THRESHOLD;
use crate::error::{Result, StackError};
use crate::frame::{MasterFrame, RawFrame};
use crate::io::{decode_frame, FrameDecoder};
use crate::manifest::{FileManifest, FrameClass};
use crate::stack::mean::mean_combine;
use crate::stack::median::median_combine;

/// Per-pixel reduction used for a calibration class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reduction {
    Mean,
    Median,
}

impl Reduction {
    /// Bias frames are averaged; every other class uses the median to reject
    /// cosmic-ray hits and other single-frame outliers.
    pub fn for_class(class: FrameClass) -> Self {
        match class {
            FrameClass::Bias => Self::Mean,
            _ => Self::Median,
        }
    }
}

/// Outcome of reducing one calibration class.
#[derive(Clone, Debug)]
pub struct ClassReport {
    pub class: FrameClass,
    pub requested: usize,
    pub combined: usize,
    /// Files that failed to decode, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
    /// Set when the class was dropped as a whole (e.g. mixed dimensions).
    pub failure: Option<String>,
}

/// Every master frame a run can produce.
///
/// `bias` and `dark_flat` are already folded into `flat`; they are kept for
/// reporting.
#[derive(Clone, Debug, Default)]
pub struct MasterFrames {
    pub bias: Option<MasterFrame>,
    pub dark: Option<MasterFrame>,
    pub dark_flat: Option<MasterFrame>,
    pub flat: Option<MasterFrame>,
    pub reports: Vec<ClassReport>,
}

impl MasterFrames {
    /// The two masters light-frame calibration consumes.
    pub fn calibration_pair(&self) -> (Option<&MasterFrame>, Option<&MasterFrame>) {
        (self.dark.as_ref(), self.flat.as_ref())
    }

    pub fn report(&self, class: FrameClass) -> Option<&ClassReport> {
        self.reports.iter().find(|r| r.class == class)
    }
}

/// Build master dark and master flat from the manifest's calibration frames.
pub fn master_calibration(
    manifest: &FileManifest,
    decoder: &dyn FrameDecoder,
) -> (Option<MasterFrame>, Option<MasterFrame>) {
    let masters = build_masters(manifest, decoder);
    (masters.dark, masters.flat)
}

/// Build every master frame.
///
/// - bias: mean of `Bias`
/// - dark: median of `Dark`
/// - dark flat: median of `DarkFlat`, minus bias
/// - flat: median of `Flat`, minus bias, minus dark flat
///
/// A class with no frames, no decodable frames, or mixed dimensions yields no
/// master; the run continues without it.
pub fn build_masters(manifest: &FileManifest, decoder: &dyn FrameDecoder) -> MasterFrames {
    let mut reports = Vec::new();

    let (bias, report) = build_class(FrameClass::Bias, manifest, decoder);
    reports.push(report);

    let ((dark, dark_report), (mut dark_flat, dark_flat_report)) = rayon::join(
        || build_class(FrameClass::Dark, manifest, decoder),
        || build_class(FrameClass::DarkFlat, manifest, decoder),
    );
    reports.push(dark_report);
    reports.push(dark_flat_report);

    if let (Some(df), Some(b)) = (dark_flat.as_mut(), bias.as_ref()) {
        apply_correction(df, b);
    }

    let (mut flat, flat_report) = build_class(FrameClass::Flat, manifest, decoder);
    reports.push(flat_report);

    if let Some(f) = flat.as_mut() {
        if let Some(b) = bias.as_ref() {
            apply_correction(f, b);
        }
        if let Some(df) = dark_flat.as_ref() {
            apply_correction(f, df);
        }
    }

    info!(
        bias = bias.is_some(),
        dark = dark.is_some(),
        dark_flat = dark_flat.is_some(),
        flat = flat.is_some(),
        "Master calibration frames created"
    );

    MasterFrames {
        bias,
        dark,
        dark_flat,
        flat,
        reports,
    }
}

/// Subtract `correction` from `target` when their shapes agree.
fn apply_correction(target: &mut MasterFrame, correction: &MasterFrame) {
    if target.shape() != correction.shape() {
        warn!(
            target = %target.class,
            correction = %correction.class,
            target_shape = ?target.shape(),
            correction_shape = ?correction.shape(),
            "Skipping master correction with mismatched dimensions"
        );
        return;
    }
    target.subtract(correction);
}

fn build_class(
    class: FrameClass,
    manifest: &FileManifest,
    decoder: &dyn FrameDecoder,
) -> (Option<MasterFrame>, ClassReport) {
    let paths = manifest.paths(class);
    let (frames, skipped) = load_class(class, paths, decoder);

    let mut report = ClassReport {
        class,
        requested: paths.len(),
        combined: 0,
        skipped,
        failure: None,
    };

    if frames.is_empty() {
        if !paths.is_empty() {
            warn!(class = %class, "No frame could be decoded, master omitted");
            report.failure = Some("no decodable frames".into());
        }
        return (None, report);
    }

    match reduce_class(class, &frames) {
        Ok(master) => {
            info!(
                class = %class,
                combined = master.frame_count,
                skipped = report.skipped.len(),
                reduction = ?Reduction::for_class(class),
                "Built master frame"
            );
            report.combined = master.frame_count;
            (Some(master), report)
        }
        Err(e) => {
            warn!(class = %class, error = %e, "Master frame omitted");
            report.failure = Some(e.to_string());
            (None, report)
        }
    }
}

/// Reduce decoded frames of one class with that class's rule.
pub fn reduce_class(class: FrameClass, frames: &[RawFrame]) -> Result<MasterFrame> {
    let data = match Reduction::for_class(class) {
        Reduction::Mean => mean_combine(frames, class)?,
        Reduction::Median => median_combine(frames, class)?,
    };
    Ok(MasterFrame {
        class,
        data,
        frame_count: frames.len(),
    })
}

/// Decode a class's files, in parallel for larger sets. Failures are logged
/// and returned alongside the frames that decoded, order preserved.
fn load_class(
    class: FrameClass,
    paths: &[PathBuf],
    decoder: &dyn FrameDecoder,
) -> (Vec<RawFrame>, Vec<(PathBuf, String)>) {
    let decode = |path: &PathBuf| -> Result<RawFrame> { decode_frame(decoder, path) };

    let results: Vec<Result<RawFrame>> = if paths.len() >= PARALLEL_FRAME_THRESHOLD {
        paths.par_iter().map(decode).collect()
    } else {
        paths.iter().map(decode).collect()
    };

    let mut frames = Vec::with_capacity(paths.len());
    let mut skipped = Vec::new();
    for (path, result) in paths.iter().zip(results) {
        match result {
            Ok(frame) => frames.push(frame),
            Err(e) => {
                warn!(class = %class, path = %path.display(), error = %e, "Skipping unreadable frame");
                let reason = match e {
                    StackError::Decode { reason, .. } => reason,
                    other => other.to_string(),
                };
                skipped.push((path.clone(), reason));
            }
        }
    }
    (frames, skipped)
}
