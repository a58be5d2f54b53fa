use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use astrostack_core::io::{FileDecoder, ImageFileSink, OutputSink};
use astrostack_core::manifest::{FileManifest, FrameClass};
use astrostack_core::pipeline::{run_stack_reported, ProgressReporter, StackConfig};
use astrostack_core::stack::{CombineMode, StackedImage};
use clap::{Args, ValueEnum};

use crate::progress::BarReporter;
use crate::summary::{print_image_summary, print_run_summary, print_stack_report};

#[derive(Clone, Copy, ValueEnum)]
pub enum CombineArg {
    Sum,
    Mean,
}

impl From<CombineArg> for CombineMode {
    fn from(arg: CombineArg) -> Self {
        match arg {
            CombineArg::Sum => CombineMode::Sum,
            CombineArg::Mean => CombineMode::Mean,
        }
    }
}

#[derive(Args)]
pub struct StackArgs {
    /// Directory with Light/, Bias/, Dark/, Flat/ and DarkFlat/ sub-directories
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Manifest file (TOML) listing frames per class
    #[arg(long, conflicts_with = "root")]
    pub manifest: Option<PathBuf>,

    /// Light frames
    #[arg(long, num_args = 1..)]
    pub light: Vec<PathBuf>,

    /// Bias frames
    #[arg(long, num_args = 1..)]
    pub bias: Vec<PathBuf>,

    /// Dark frames
    #[arg(long, num_args = 1..)]
    pub dark: Vec<PathBuf>,

    /// Flat frames
    #[arg(long, num_args = 1..)]
    pub flat: Vec<PathBuf>,

    /// Dark-flat frames
    #[arg(long, num_args = 1..)]
    pub dark_flat: Vec<PathBuf>,

    /// Stacking config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Feature detector: ORB, SIFT or AKAZE
    #[arg(long)]
    pub detector: Option<String>,

    /// Share of sorted ORB/AKAZE matches kept (0-1]
    #[arg(long)]
    pub match_fraction: Option<f32>,

    /// How the accumulated sum is finalized
    #[arg(long, value_enum)]
    pub combine: Option<CombineArg>,

    /// Worker threads (0 = all cores)
    #[arg(long)]
    pub threads: Option<usize>,

    /// No progress bars or summaries
    #[arg(short, long)]
    pub quiet: bool,

    /// Output file path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Write the stack to the output path when done
    #[arg(short, long)]
    pub save: bool,
}

/// Prints a summary of the finished stack and writes it with [`ImageFileSink`].
struct TerminalSink;

impl OutputSink for TerminalSink {
    fn present(&self, image: &StackedImage, label: &str) {
        print_image_summary(image, label);
    }

    fn save(&self, image: &StackedImage, path: &std::path::Path) -> astrostack_core::error::Result<()> {
        ImageFileSink.save(image, path)?;
        println!("Saved to {}", path.display());
        Ok(())
    }
}

pub fn run(args: &StackArgs) -> Result<()> {
    // Options are checked before any frame directory or manifest is read.
    let config = build_config(args)?;
    config.validate()?;
    let manifest = build_manifest(args)?;

    if !config.quiet {
        print_run_summary(&manifest, &config);
    }

    let reporter: Arc<dyn ProgressReporter> = Arc::new(BarReporter::new()?);
    let report = run_stack_reported(&manifest, &config, &FileDecoder, &TerminalSink, reporter)?;

    if !config.quiet {
        print_stack_report(&report);
    }
    Ok(())
}

fn build_manifest(args: &StackArgs) -> Result<FileManifest> {
    let mut manifest = if let Some(ref root) = args.root {
        FileManifest::from_directory(root)
            .with_context(|| format!("Failed to scan {}", root.display()))?
    } else if let Some(ref path) = args.manifest {
        FileManifest::from_toml_file(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?
    } else {
        FileManifest::default()
    };

    let explicit = [
        (FrameClass::Light, &args.light),
        (FrameClass::Bias, &args.bias),
        (FrameClass::Dark, &args.dark),
        (FrameClass::Flat, &args.flat),
        (FrameClass::DarkFlat, &args.dark_flat),
    ];
    for (class, paths) in explicit {
        manifest.paths_mut(class).extend(paths.iter().cloned());
    }
    Ok(manifest)
}

fn build_config(args: &StackArgs) -> Result<StackConfig> {
    let mut config = if let Some(ref path) = args.config {
        StackConfig::from_toml_file(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?
    } else {
        StackConfig::default()
    };

    if let Some(ref name) = args.detector {
        config.set_detector(name)?;
    }
    if let Some(fraction) = args.match_fraction {
        config.match_fraction = fraction;
    }
    if let Some(combine) = args.combine {
        config.combine = combine.into();
    }
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    if args.output.is_some() {
        config.output = args.output.clone();
    }
    if args.save {
        config.auto_save = true;
        if config.output.is_none() {
            config.output = Some(PathBuf::from("stacked.tiff"));
        }
    }
    config.quiet |= args.quiet;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use astrostack_core::error::StackError;

    fn args(root: PathBuf) -> StackArgs {
        StackArgs {
            root: Some(root),
            manifest: None,
            light: Vec::new(),
            bias: Vec::new(),
            dark: Vec::new(),
            flat: Vec::new(),
            dark_flat: Vec::new(),
            config: None,
            detector: None,
            match_fraction: None,
            combine: None,
            threads: None,
            quiet: true,
            output: None,
            save: false,
        }
    }

    #[test]
    fn unknown_detector_fails_before_scanning_inputs() {
        let mut args = args(PathBuf::from("/nonexistent/astrostack/frames"));
        args.detector = Some("surf".into());

        let err = run(&args).unwrap_err();
        assert!(
            matches!(err.downcast_ref::<StackError>(), Some(StackError::InvalidConfiguration(_))),
            "{err:#}"
        );
    }

    #[test]
    fn bad_match_fraction_fails_before_scanning_inputs() {
        let mut args = args(PathBuf::from("/nonexistent/astrostack/frames"));
        args.match_fraction = Some(1.5);

        let err = run(&args).unwrap_err();
        assert!(
            matches!(err.downcast_ref::<StackError>(), Some(StackError::InvalidConfiguration(_))),
            "{err:#}"
        );
    }

    #[test]
    fn save_without_output_defaults_to_tiff() {
        let mut args = args(PathBuf::from("frames"));
        args.save = true;

        let config = build_config(&args).unwrap();
        assert!(config.auto_save);
        assert_eq!(config.output, Some(PathBuf::from("stacked.tiff")));
    }
}
