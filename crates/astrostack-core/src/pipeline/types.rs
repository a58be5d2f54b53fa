use std::path::PathBuf;

use crate::calibration::ClassReport;
use crate::register::Transform;
use crate::stack::StackedImage;

/// Stage of a stacking run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStage {
    Init,
    BuildingMasters,
    ProcessingLights,
    Accumulating,
    Done,
    Failed,
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "Validating inputs"),
            Self::BuildingMasters => write!(f, "Building master frames"),
            Self::ProcessingLights => write!(f, "Registering light frames"),
            Self::Accumulating => write!(f, "Accumulating"),
            Self::Done => write!(f, "Done"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Thread-safe progress reporting for a stacking run.
///
/// Implementors can use this to drive progress bars, logging, or any other
/// UI feedback. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A new stage has started. `total_items` is the number of work items in
    /// this stage (e.g., frame count), if known.
    fn begin_stage(&self, _stage: RunStage, _total_items: Option<usize>) {}

    /// `items_done` work items of the current stage have completed.
    fn advance(&self, _items_done: usize) {}

    /// The current stage is finished.
    fn finish_stage(&self) {}
}

/// Reporter that ignores every event.
pub struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}

/// A light frame left out of the stack.
#[derive(Clone, Debug, PartialEq)]
pub struct SkippedFrame {
    pub path: PathBuf,
    pub reason: String,
}

/// How one light frame entered the stack.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameRegistration {
    pub path: PathBuf,
    pub transform: Transform,
    /// Matches retained against the reference.
    pub matches: usize,
}

/// Everything a finished run produces.
#[derive(Clone, Debug)]
pub struct StackReport {
    pub image: StackedImage,
    /// Frame every other frame was registered onto.
    pub reference: PathBuf,
    /// Registered frames in manifest order, reference included.
    pub registrations: Vec<FrameRegistration>,
    /// Light frames that failed, in manifest order.
    pub skipped: Vec<SkippedFrame>,
    /// Per-class outcome of master frame construction.
    pub masters: Vec<ClassReport>,
}

impl StackReport {
    pub fn stacked_count(&self) -> usize {
        self.image.frame_count
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}
