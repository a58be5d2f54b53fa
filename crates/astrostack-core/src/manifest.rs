use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, StackError};

/// Role an exposure plays in a stacking run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameClass {
    Light,
    Bias,
    Dark,
    Flat,
    #[serde(alias = "Dark Flat")]
    DarkFlat,
}

impl FrameClass {
    pub const ALL: [FrameClass; 5] = [
        FrameClass::Light,
        FrameClass::Bias,
        FrameClass::Dark,
        FrameClass::Flat,
        FrameClass::DarkFlat,
    ];

    /// Sub-directory names accepted for this class in a manifest tree.
    fn directory_names(self) -> &'static [&'static str] {
        match self {
            Self::Light => &["Light", "light", "Lights", "lights"],
            Self::Bias => &["Bias", "bias"],
            Self::Dark => &["Dark", "dark", "Darks", "darks"],
            Self::Flat => &["Flat", "flat", "Flats", "flats"],
            Self::DarkFlat => &["DarkFlat", "Dark Flat", "darkflat", "dark_flat"],
        }
    }
}

impl std::fmt::Display for FrameClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Light => write!(f, "light"),
            Self::Bias => write!(f, "bias"),
            Self::Dark => write!(f, "dark"),
            Self::Flat => write!(f, "flat"),
            Self::DarkFlat => write!(f, "dark flat"),
        }
    }
}

/// Ordered file lists for each frame class.
///
/// Only `light` has to be non-empty for a run; an empty calibration list means
/// the corresponding master frame is absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileManifest {
    pub light: Vec<PathBuf>,
    pub bias: Vec<PathBuf>,
    pub dark: Vec<PathBuf>,
    pub flat: Vec<PathBuf>,
    pub dark_flat: Vec<PathBuf>,
}

impl FileManifest {
    pub fn paths(&self, class: FrameClass) -> &[PathBuf] {
        match class {
            FrameClass::Light => &self.light,
            FrameClass::Bias => &self.bias,
            FrameClass::Dark => &self.dark,
            FrameClass::Flat => &self.flat,
            FrameClass::DarkFlat => &self.dark_flat,
        }
    }

    pub fn paths_mut(&mut self, class: FrameClass) -> &mut Vec<PathBuf> {
        match class {
            FrameClass::Light => &mut self.light,
            FrameClass::Bias => &mut self.bias,
            FrameClass::Dark => &mut self.dark,
            FrameClass::Flat => &mut self.flat,
            FrameClass::DarkFlat => &mut self.dark_flat,
        }
    }

    pub fn count(&self, class: FrameClass) -> usize {
        self.paths(class).len()
    }

    /// Fails with [`StackError::EmptyManifest`] when there is nothing to stack.
    pub fn validate(&self) -> Result<()> {
        if self.light.is_empty() {
            return Err(StackError::EmptyManifest);
        }
        Ok(())
    }

    /// Build a manifest from a directory holding one sub-directory per class
    /// (`Light/`, `Bias/`, `Dark/`, `Flat/`, `DarkFlat/`). Missing
    /// sub-directories leave their class empty. Files are sorted by name.
    pub fn from_directory(root: &Path) -> Result<Self> {
        let mut manifest = Self::default();
        for class in FrameClass::ALL {
            let Some(dir) = class
                .directory_names()
                .iter()
                .map(|name| root.join(name))
                .find(|p| p.is_dir())
            else {
                continue;
            };
            let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            files.sort();
            debug!(class = %class, count = files.len(), dir = %dir.display(), "Collected frames");
            *manifest.paths_mut(class) = files;
        }
        Ok(manifest)
    }

    /// Load a manifest from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}
