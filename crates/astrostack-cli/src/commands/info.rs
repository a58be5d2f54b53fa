use std::path::PathBuf;

use anyhow::Result;
use astrostack_core::io::{FileDecoder, FrameDecoder};
use clap::Args;

#[derive(Args)]
pub struct InfoArgs {
    /// Input FITS, TIFF or PNG file
    pub file: PathBuf,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let frame = FileDecoder.decode(&args.file)?;
    let (min, max) = frame
        .data
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    println!("File:        {}", args.file.display());
    println!("Dimensions:  {}x{}", frame.width(), frame.height());
    println!("Channels:    {}", frame.channels());
    println!("Bit depth:   {}", frame.bit_depth);
    println!("Range:       {:.0} .. {:.0}", min, max);

    let total_mb = (frame.data.len() * (frame.bit_depth as usize).div_ceil(8)) as f64 / (1024.0 * 1024.0);
    println!("Data size:   {:.1} MB", total_mb);

    Ok(())
}
