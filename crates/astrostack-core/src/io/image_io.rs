use std::path::Path;

use image::{GrayImage, ImageBuffer, ImageFormat, Luma, Pixel, Rgb, RgbImage};
use ndarray::Array3;
use num_traits::ToPrimitive;

use crate::consts::COLOR_CHANNEL_COUNT;
use crate::error::{Result, StackError};
use crate::frame::RawFrame;
use crate::stack::StackedImage;

/// Load a raster image (TIFF, PNG, ...) into a RawFrame.
///
/// Gray sources become single-channel frames, anything with color becomes
/// RGB. Samples keep their native scale: 8-bit data stays in 0..=255.
pub fn load_image(path: &Path) -> Result<RawFrame> {
    let img = image::open(path)?;
    let color = img.color();
    let depth = color.bits_per_pixel() / color.channel_count().max(1) as u16;

    let frame = match (color.has_color(), depth <= 8) {
        (false, true) => frame_from_buffer(&img.to_luma8(), 8, path),
        (false, false) => frame_from_buffer(&img.to_luma16(), 16, path),
        (true, true) => frame_from_buffer(&img.to_rgb8(), 8, path),
        (true, false) => frame_from_buffer(&img.to_rgb16(), 16, path),
    };
    Ok(frame)
}

fn frame_from_buffer<P>(buf: &ImageBuffer<P, Vec<P::Subpixel>>, bit_depth: u8, path: &Path) -> RawFrame
where
    P: Pixel,
    P::Subpixel: ToPrimitive,
{
    let (w, h) = buf.dimensions();
    let channels = P::CHANNEL_COUNT as usize;
    let data = Array3::from_shape_fn((h as usize, w as usize, channels), |(row, col, ch)| {
        buf.get_pixel(col as u32, row as u32).channels()[ch]
            .to_f32()
            .unwrap_or(0.0)
    });
    RawFrame::new(data, bit_depth, path)
}

/// Map the stacked range linearly onto `0.0..=1.0`.
fn normalized(image: &StackedImage) -> impl Fn(f64) -> f64 {
    let (min, max) = image.range();
    let span = max - min;
    move |v| {
        if span > 0.0 {
            ((v - min) / span).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Save a stacked image as 16-bit TIFF (gray or RGB).
pub fn save_tiff(image: &StackedImage, path: &Path) -> Result<()> {
    let (h, w, channels) = image.data.dim();
    let norm = normalized(image);
    let to_u16 = |v: f64| (norm(v) * 65535.0).round() as u16;

    match channels {
        1 => {
            let pixels: Vec<u16> = image.data.iter().map(|&v| to_u16(v)).collect();
            let img = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
                .expect("buffer size matches dimensions");
            img.save_with_format(path, ImageFormat::Tiff)?;
        }
        COLOR_CHANNEL_COUNT => {
            let pixels: Vec<u16> = image.data.iter().map(|&v| to_u16(v)).collect();
            let img = ImageBuffer::<Rgb<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
                .expect("buffer size matches dimensions");
            img.save_with_format(path, ImageFormat::Tiff)?;
        }
        n => {
            return Err(StackError::InvalidConfiguration(format!(
                "cannot export {n}-channel image"
            )))
        }
    }
    Ok(())
}

/// Save a stacked image as 8-bit PNG (gray or RGB).
pub fn save_png(image: &StackedImage, path: &Path) -> Result<()> {
    let (h, w, channels) = image.data.dim();
    let norm = normalized(image);
    let to_u8 = |v: f64| (norm(v) * 255.0).round() as u8;

    match channels {
        1 => {
            let mut img = GrayImage::new(w as u32, h as u32);
            for row in 0..h {
                for col in 0..w {
                    img.put_pixel(col as u32, row as u32, Luma([to_u8(image.data[[row, col, 0]])]));
                }
            }
            img.save_with_format(path, ImageFormat::Png)?;
        }
        COLOR_CHANNEL_COUNT => {
            let mut img = RgbImage::new(w as u32, h as u32);
            for row in 0..h {
                for col in 0..w {
                    let px = |ch| to_u8(image.data[[row, col, ch]]);
                    img.put_pixel(col as u32, row as u32, Rgb([px(0), px(1), px(2)]));
                }
            }
            img.save_with_format(path, ImageFormat::Png)?;
        }
        n => {
            return Err(StackError::InvalidConfiguration(format!(
                "cannot export {n}-channel image"
            )))
        }
    }
    Ok(())
}

/// Save a stacked image, choosing format from file extension.
pub fn save_image(image: &StackedImage, path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("tiff" | "tif") => save_tiff(image, path),
        Some("png") => save_png(image, path),
        _ => save_tiff(image, path),
    }
}
