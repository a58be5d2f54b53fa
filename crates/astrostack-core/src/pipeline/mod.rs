pub mod config;
mod orchestrator;
mod types;

pub use config::StackConfig;
pub use orchestrator::{run_stack, run_stack_reported};
pub use types::{FrameRegistration, NoOpReporter, ProgressReporter, RunStage, SkippedFrame, StackReport};
