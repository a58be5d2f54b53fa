use anyhow::Result;
use astrostack_core::pipeline::{ProgressReporter, RunStage};
use indicatif::{ProgressBar, ProgressStyle};

/// Terminal progress bar driven by the stacking run.
pub struct BarReporter {
    bar: ProgressBar,
    counted: ProgressStyle,
    spinner: ProgressStyle,
}

impl BarReporter {
    pub fn new() -> Result<Self> {
        let counted = ProgressStyle::default_bar()
            .template("{msg:26} [{bar:40}] {pos}/{len}")?
            .progress_chars("=> ");
        let spinner = ProgressStyle::default_spinner().template("{spinner} {msg}")?;
        Ok(Self {
            bar: ProgressBar::hidden(),
            counted,
            spinner,
        })
    }
}

impl ProgressReporter for BarReporter {
    fn begin_stage(&self, stage: RunStage, total_items: Option<usize>) {
        match stage {
            RunStage::Done | RunStage::Failed => {
                self.bar.finish_and_clear();
                return;
            }
            _ => {}
        }
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        match total_items {
            Some(total) => {
                self.bar.set_style(self.counted.clone());
                self.bar.set_length(total as u64);
            }
            None => self.bar.set_style(self.spinner.clone()),
        }
        self.bar.set_position(0);
        self.bar.set_message(stage.to_string());
    }

    fn advance(&self, items_done: usize) {
        self.bar.set_position(items_done as u64);
    }

    fn finish_stage(&self) {
        self.bar.tick();
    }
}
