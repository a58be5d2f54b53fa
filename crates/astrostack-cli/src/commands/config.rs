use std::path::PathBuf;

use anyhow::{Context, Result};
use astrostack_core::pipeline::StackConfig;
use clap::Args;

#[derive(Args)]
pub struct ConfigArgs {
    /// Write config to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Print or save a full default StackConfig as TOML.
pub fn run(args: &ConfigArgs) -> Result<()> {
    let config = StackConfig {
        output: Some(PathBuf::from("stacked.tiff")),
        ..Default::default()
    };
    let toml_str = config.to_toml_string()?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &toml_str)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        println!("Default config saved to {}", path.display());
    } else {
        print!("{}", toml_str);
    }

    Ok(())
}
