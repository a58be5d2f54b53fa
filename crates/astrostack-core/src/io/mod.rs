pub mod fits;
pub mod image_io;

use std::path::Path;

use tracing::info;

use crate::error::{Result, StackError};
use crate::frame::RawFrame;
use crate::stack::StackedImage;

/// Turns a file path into pixel data.
///
/// Implementations must be shareable across the worker pool.
pub trait FrameDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<RawFrame>;
}

/// Decode `path` through `decoder`, rejecting frames without pixels.
pub fn decode_frame(decoder: &dyn FrameDecoder, path: &Path) -> Result<RawFrame> {
    let frame = decoder.decode(path)?;
    let (h, w, c) = frame.shape();
    if h == 0 || w == 0 || c == 0 {
        return Err(StackError::decode(path, format!("empty frame {w}x{h}x{c}")));
    }
    Ok(frame)
}

/// Default decoder, dispatching on file extension.
///
/// FITS (`.fits`, `.fit`, `.fts`) goes through the memory-mapped FITS reader,
/// TIFF and PNG through the `image` crate. Camera RAW formats need a
/// demosaicing decoder supplied by the caller.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileDecoder;

impl FrameDecoder for FileDecoder {
    fn decode(&self, path: &Path) -> Result<RawFrame> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("fits" | "fit" | "fts") => fits::read_fits(path),
            Some("tif" | "tiff" | "png") => image_io::load_image(path).map_err(|e| match e {
                StackError::ImageError(err) => StackError::decode(path, err.to_string()),
                other => other,
            }),
            Some(other) => Err(StackError::decode(path, format!("unsupported format .{other}"))),
            None => Err(StackError::decode(path, "no file extension")),
        }
    }
}

/// Receives the finished stack: shown to the user and optionally written out.
pub trait OutputSink: Send + Sync {
    fn present(&self, image: &StackedImage, label: &str);

    fn save(&self, image: &StackedImage, path: &Path) -> Result<()>;
}

/// Writes stacks to disk with [`image_io::save_image`] and logs a one-line
/// description on `present`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageFileSink;

impl OutputSink for ImageFileSink {
    fn present(&self, image: &StackedImage, label: &str) {
        let (h, w, c) = image.data.dim();
        let (min, max) = image.range();
        info!(
            label,
            width = w,
            height = h,
            channels = c,
            frames = image.frame_count,
            min,
            max,
            "Stacked image"
        );
    }

    fn save(&self, image: &StackedImage, path: &Path) -> Result<()> {
        image_io::save_image(image, path)?;
        info!(path = %path.display(), "Saved stacked image");
        Ok(())
    }
}
