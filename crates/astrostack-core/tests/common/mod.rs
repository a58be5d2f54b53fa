#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use astrostack_core::error::{Result, StackError};
use astrostack_core::frame::RawFrame;
use astrostack_core::io::{FrameDecoder, OutputSink};
use astrostack_core::stack::StackedImage;
use ndarray::{Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Single-channel 16-bit frame filled with `value`.
pub fn uniform_frame(h: usize, w: usize, value: f32, path: &str) -> RawFrame {
    RawFrame::mono(Array2::from_elem((h, w), value), 16, path)
}

/// Random stars as `(x, y, amplitude, sigma)`, kept `margin` pixels from the edges.
pub fn random_stars(seed: u64, count: usize, h: usize, w: usize, margin: usize) -> Vec<(f32, f32, f32, f32)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            (
                rng.gen_range(margin as f32..(w - margin) as f32),
                rng.gen_range(margin as f32..(h - margin) as f32),
                rng.gen_range(15_000.0..45_000.0),
                rng.gen_range(1.0..2.5),
            )
        })
        .collect()
}

/// Render Gaussian stars over a flat background, clamped to 16 bits.
pub fn render_stars(h: usize, w: usize, stars: &[(f32, f32, f32, f32)], background: f32) -> Array2<f32> {
    Array2::from_shape_fn((h, w), |(row, col)| {
        let v: f32 = stars
            .iter()
            .map(|&(x, y, amp, sigma)| {
                let d2 = (col as f32 - x).powi(2) + (row as f32 - y).powi(2);
                amp * (-d2 / (2.0 * sigma * sigma)).exp()
            })
            .sum();
        (background + v).round().min(65_535.0)
    })
}

/// Move content by `(dx, dy)` pixels; uncovered pixels take `fill`.
pub fn shift_plane(plane: &Array2<f32>, dx: i64, dy: i64, fill: f32) -> Array2<f32> {
    let (h, w) = plane.dim();
    Array2::from_shape_fn((h, w), |(row, col)| {
        let r = row as i64 - dy;
        let c = col as i64 - dx;
        if r < 0 || c < 0 || r >= h as i64 || c >= w as i64 {
            fill
        } else {
            plane[[r as usize, c as usize]]
        }
    })
}

pub fn star_frame(plane: Array2<f32>, path: &str) -> RawFrame {
    RawFrame::mono(plane, 16, path)
}

/// Decoder over an in-memory table of frames. Unknown paths fail to decode.
#[derive(Default)]
pub struct MockDecoder {
    frames: HashMap<PathBuf, RawFrame>,
    calls: AtomicUsize,
}

impl MockDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, frame: RawFrame) -> Self {
        self.frames.insert(frame.path.clone(), frame);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FrameDecoder for MockDecoder {
    fn decode(&self, path: &Path) -> Result<RawFrame> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.frames.get(path).cloned().ok_or_else(|| StackError::Decode {
            path: path.to_path_buf(),
            reason: "corrupt file".into(),
        })
    }
}

/// Decoder that fails the test if it is ever used.
pub struct UnreachableDecoder;

impl FrameDecoder for UnreachableDecoder {
    fn decode(&self, path: &Path) -> Result<RawFrame> {
        panic!("decoder called for {}", path.display());
    }
}

/// Sink that records what it was asked to do.
#[derive(Default)]
pub struct RecordingSink {
    pub presented: Mutex<Vec<String>>,
    pub saved: Mutex<Vec<PathBuf>>,
}

impl OutputSink for RecordingSink {
    fn present(&self, _image: &StackedImage, label: &str) {
        self.presented.lock().unwrap().push(label.to_string());
    }

    fn save(&self, _image: &StackedImage, path: &Path) -> Result<()> {
        self.saved.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

/// Write a 16-bit FITS file (BZERO = 32768) for a `(height, width, channels)` cube.
/// Write a FITS header built from `(keyword, value)` cards followed by one
/// zeroed data block.
pub fn write_fits_header(path: &Path, cards: &[(&str, i64)]) {
    let mut buf: Vec<u8> = Vec::new();
    buf.extend_from_slice(format!("{:<80}", format!("{:<8}= {:>20}", "SIMPLE", "T")).as_bytes());
    for (key, value) in cards {
        buf.extend_from_slice(format!("{:<80}", format!("{key:<8}= {value:>20}")).as_bytes());
    }
    buf.extend_from_slice(format!("{:<80}", "END").as_bytes());
    buf.resize(buf.len().div_ceil(2880) * 2880, b' ');
    buf.resize(buf.len() + 2880, 0);
    std::fs::write(path, buf).expect("write FITS header");
}

pub fn write_fits_u16(path: &Path, data: &Array3<u16>) {
    let (h, w, c) = data.dim();
    let mut cards = vec![
        format!("{:<8}= {:>20}", "SIMPLE", "T"),
        format!("{:<8}= {:>20}", "BITPIX", 16),
        format!("{:<8}= {:>20}", "NAXIS", if c == 1 { 2 } else { 3 }),
        format!("{:<8}= {:>20}", "NAXIS1", w),
        format!("{:<8}= {:>20}", "NAXIS2", h),
    ];
    if c > 1 {
        cards.push(format!("{:<8}= {:>20}", "NAXIS3", c));
    }
    cards.push(format!("{:<8}= {:>20}", "BZERO", 32768));
    cards.push(format!("{:<8}= {:>20}", "BSCALE", 1));
    cards.push(format!("{:<8}= {:<20} / frame type", "IMAGETYP", "'LIGHT'"));
    cards.push("END".to_string());

    let mut buf: Vec<u8> = Vec::new();
    for card in cards {
        buf.extend_from_slice(format!("{card:<80}").as_bytes());
    }
    buf.resize(buf.len().div_ceil(2880) * 2880, b' ');

    for plane in data.axis_iter(Axis(2)) {
        for &v in plane.iter() {
            let stored = (v as i32 - 32768) as i16;
            buf.extend_from_slice(&stored.to_be_bytes());
        }
    }
    buf.resize(buf.len().div_ceil(2880) * 2880, 0);

    let mut f = std::fs::File::create(path).expect("create FITS file");
    f.write_all(&buf).expect("write FITS data");
}
