use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_MATCH_FRACTION, SIFT_RATIO_TEST};
use crate::error::{Result, StackError};
use crate::features::{DetectorKind, DetectorParams, MatchParams};
use crate::register::{RansacParams, RegistrationParams};
use crate::stack::CombineMode;

/// Options for one stacking run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub detector: DetectorKind,
    /// Share of sorted binary-descriptor matches kept, in (0, 1].
    pub match_fraction: f32,
    /// Suppress progress reporting and the final `present` call.
    pub quiet: bool,
    pub output: Option<PathBuf>,
    /// Write the stack to `output` when the run finishes.
    pub auto_save: bool,
    pub combine: CombineMode,
    /// Worker threads; 0 uses every available core.
    pub threads: usize,
    pub ransac: RansacParams,
    pub detectors: DetectorParams,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            detector: DetectorKind::default(),
            match_fraction: DEFAULT_MATCH_FRACTION,
            quiet: false,
            output: None,
            auto_save: false,
            combine: CombineMode::default(),
            threads: 0,
            ransac: RansacParams::default(),
            detectors: DetectorParams::default(),
        }
    }
}

impl StackConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| StackError::InvalidConfiguration(e.to_string()))
    }

    /// Check every option that can be checked without touching the inputs.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(StackError::InvalidConfiguration(msg));

        if !(self.match_fraction > 0.0 && self.match_fraction <= 1.0) {
            return invalid(format!("match fraction must be in (0, 1], got {}", self.match_fraction));
        }
        if self.auto_save && self.output.is_none() {
            return invalid("auto-save needs an output path".into());
        }
        if !(self.ransac.threshold > 0.0) {
            return invalid(format!("RANSAC threshold must be positive, got {}", self.ransac.threshold));
        }
        if self.ransac.max_iterations == 0 {
            return invalid("RANSAC needs at least one iteration".into());
        }
        if !(self.ransac.confidence > 0.0 && self.ransac.confidence < 1.0) {
            return invalid(format!("RANSAC confidence must be in (0, 1), got {}", self.ransac.confidence));
        }

        let orb = &self.detectors.orb;
        if orb.levels == 0 || !(orb.scale_factor > 1.0) {
            return invalid("ORB needs at least one level and a scale factor above 1".into());
        }
        let sift = &self.detectors.sift;
        if sift.octaves == 0 || sift.intervals == 0 || !(sift.sigma > 0.0) {
            return invalid("SIFT needs positive octaves, intervals and sigma".into());
        }
        let akaze = &self.detectors.akaze;
        if akaze.octaves == 0 || akaze.sublevels == 0 || !(akaze.base_sigma > 0.0) {
            return invalid("AKAZE needs positive octaves, sublevels and base sigma".into());
        }
        if !(0.0..=1.0).contains(&akaze.contrast_percentile) {
            return invalid(format!(
                "AKAZE contrast percentile must be in [0, 1], got {}",
                akaze.contrast_percentile
            ));
        }
        Ok(())
    }

    /// Select the detector by name, as given on a command line.
    pub fn set_detector(&mut self, name: &str) -> Result<()> {
        self.detector = name.parse()?;
        Ok(())
    }

    pub fn registration_params(&self) -> RegistrationParams {
        RegistrationParams {
            matching: MatchParams {
                fraction: self.match_fraction,
                ratio: SIFT_RATIO_TEST,
            },
            ransac: self.ransac.clone(),
        }
    }

    /// Path the stack is written to at the end of the run, if any.
    pub fn save_path(&self) -> Option<&Path> {
        if self.auto_save {
            self.output.as_deref()
        } else {
            None
        }
    }
}
