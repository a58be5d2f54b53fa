use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use memmap2::Mmap;
use ndarray::Array3;

use crate::consts::{FITS_BLOCK_SIZE, FITS_CARD_SIZE};
use crate::error::{Result, StackError};
use crate::frame::RawFrame;

/// Primary HDU header of a FITS file.
#[derive(Clone, Debug)]
pub struct FitsHeader {
    pub bitpix: i32,
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub bzero: f64,
    pub bscale: f64,
    /// Byte offset of the data unit.
    pub data_offset: usize,
    /// Byte length of the data unit.
    pub data_len: usize,
    pub keywords: HashMap<String, String>,
}

impl FitsHeader {
    /// Effective bit depth of the physical values.
    ///
    /// Signed 16-bit data with `BZERO = 32768` is the usual unsigned camera
    /// encoding and reports as 16 bits.
    pub fn bit_depth(&self) -> u8 {
        self.bitpix.unsigned_abs().min(u8::MAX as u32) as u8
    }
}

/// Memory-mapped reader for the primary image HDU of a FITS file.
pub struct FitsReader {
    mmap: Mmap,
    pub header: FitsHeader,
}

impl FitsReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < FITS_BLOCK_SIZE || !mmap.starts_with(b"SIMPLE") {
            return Err(StackError::decode(path, "missing SIMPLE card"));
        }

        let header = parse_header(&mmap).map_err(|reason| StackError::decode(path, reason))?;

        let expected = header
            .data_offset
            .checked_add(header.data_len)
            .ok_or_else(|| StackError::decode(path, "data unit size overflows"))?;
        if mmap.len() < expected {
            return Err(StackError::decode(
                path,
                format!(
                    "data unit truncated: expected at least {} bytes, got {}",
                    expected,
                    mmap.len()
                ),
            ));
        }

        Ok(Self { mmap, header })
    }

    /// Decode the data unit into physical values (`BZERO + BSCALE * raw`).
    pub fn read_frame(&self, path: &Path) -> Result<RawFrame> {
        let h = &self.header;
        let raw = h
            .data_offset
            .checked_add(h.data_len)
            .and_then(|end| self.mmap.get(h.data_offset..end))
            .ok_or_else(|| StackError::decode(path, "data unit out of bounds"))?;
        let samples = decode_samples(raw, h.bitpix, h.bzero, h.bscale)
            .ok_or_else(|| StackError::decode(path, format!("unsupported BITPIX {}", h.bitpix)))?;

        // FITS stores planes one after another, NAXIS1 varying fastest.
        let plane = h.width * h.height;
        let data = Array3::from_shape_fn((h.height, h.width, h.channels), |(row, col, ch)| {
            samples[ch * plane + row * h.width + col]
        });

        Ok(RawFrame::new(data, h.bit_depth(), path))
    }
}

fn parse_header(buf: &[u8]) -> std::result::Result<FitsHeader, String> {
    let mut keywords = HashMap::new();
    let mut end_card = None;

    for (i, card) in buf.chunks_exact(FITS_CARD_SIZE).enumerate() {
        let card = String::from_utf8_lossy(card);
        let keyword = card.get(..8).unwrap_or(card.as_ref()).trim();
        if keyword == "END" {
            end_card = Some(i);
            break;
        }
        if card.get(8..10) == Some("= ") {
            if let Some(value) = card.get(10..) {
                keywords.insert(keyword.to_string(), parse_value(value));
            }
        }
    }

    let end_card = end_card.ok_or("header has no END card")?;
    let header_bytes = (end_card + 1) * FITS_CARD_SIZE;
    let data_offset = header_bytes.div_ceil(FITS_BLOCK_SIZE) * FITS_BLOCK_SIZE;

    let int = |key: &str| -> Option<i64> { keywords.get(key).and_then(|v| v.parse().ok()) };
    let float = |key: &str, default: f64| -> f64 {
        keywords
            .get(key)
            .and_then(|v| v.replace('D', "E").parse().ok())
            .unwrap_or(default)
    };

    let bitpix = int("BITPIX").ok_or("missing BITPIX")?;
    let bitpix = match bitpix {
        8 | 16 | 32 | -32 | -64 => bitpix as i32,
        other => return Err(format!("unsupported BITPIX {other}")),
    };
    let naxis = int("NAXIS").ok_or("missing NAXIS")?;
    if !(2..=3).contains(&naxis) {
        return Err(format!("expected a 2-D or 3-D image, NAXIS = {naxis}"));
    }
    // Axis lengths must be positive and fit in memory.
    let axis = |key: &str| -> std::result::Result<usize, String> {
        let n = int(key).ok_or_else(|| format!("missing {key}"))?;
        match usize::try_from(n) {
            Ok(len) if len > 0 => Ok(len),
            _ => Err(format!("invalid {key} = {n}")),
        }
    };
    let width = axis("NAXIS1")?;
    let height = axis("NAXIS2")?;
    let channels = if naxis == 3 { axis("NAXIS3")? } else { 1 };
    let sample_bytes = (bitpix.unsigned_abs() / 8) as usize;
    let data_len = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(channels))
        .and_then(|n| n.checked_mul(sample_bytes))
        .ok_or_else(|| format!("image {width}x{height}x{channels} is too large"))?;

    Ok(FitsHeader {
        bitpix,
        width,
        height,
        channels,
        bzero: float("BZERO", 0.0),
        bscale: float("BSCALE", 1.0),
        data_offset,
        data_len,
        keywords,
    })
}

/// Value part of a card: quoted strings unquoted, comments stripped.
fn parse_value(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix('\'') {
        return rest.split('\'').next().unwrap_or("").trim_end().to_string();
    }
    raw.split('/').next().unwrap_or("").trim().to_string()
}

fn decode_samples(raw: &[u8], bitpix: i32, bzero: f64, bscale: f64) -> Option<Vec<f32>> {
    let scale = |v: f64| (bzero + bscale * v) as f32;
    let samples = match bitpix {
        8 => raw.iter().map(|&b| scale(b as f64)).collect(),
        16 => raw
            .chunks_exact(2)
            .map(|c| scale(BigEndian::read_i16(c) as f64))
            .collect(),
        32 => raw
            .chunks_exact(4)
            .map(|c| scale(BigEndian::read_i32(c) as f64))
            .collect(),
        -32 => raw
            .chunks_exact(4)
            .map(|c| scale(BigEndian::read_f32(c) as f64))
            .collect(),
        -64 => raw
            .chunks_exact(8)
            .map(|c| scale(BigEndian::read_f64(c)))
            .collect(),
        _ => return None,
    };
    Some(samples)
}

/// Decode a FITS file's primary image.
pub fn read_fits(path: &Path) -> Result<RawFrame> {
    FitsReader::open(path)?.read_frame(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_and_commented_values() {
        assert_eq!(parse_value(" 'LIGHT   '  / frame type"), "LIGHT");
        assert_eq!(parse_value("                   16 / bits"), "16");
    }

    fn header_cards(cards: &[&str]) -> Vec<u8> {
        let mut buf: Vec<u8> = cards
            .iter()
            .chain(std::iter::once(&"END"))
            .flat_map(|c| format!("{c:<80}").into_bytes())
            .collect();
        buf.resize(FITS_BLOCK_SIZE, b' ');
        buf
    }

    #[test]
    fn rejects_non_positive_axes() {
        let buf = header_cards(&[
            "SIMPLE  =                    T",
            "BITPIX  =                   16",
            "NAXIS   =                    2",
            "NAXIS1  =                    0",
            "NAXIS2  =                    4",
        ]);
        assert_eq!(parse_header(&buf).unwrap_err(), "invalid NAXIS1 = 0");
    }

    #[test]
    fn rejects_unknown_bitpix() {
        let buf = header_cards(&[
            "SIMPLE  =                    T",
            "BITPIX  =                   12",
            "NAXIS   =                    2",
            "NAXIS1  =                    4",
            "NAXIS2  =                    4",
        ]);
        assert_eq!(parse_header(&buf).unwrap_err(), "unsupported BITPIX 12");
    }

    #[test]
    fn applies_bzero_to_signed_shorts() {
        let raw = [0x80u8, 0x00, 0x7f, 0xff];
        let samples = decode_samples(&raw, 16, 32768.0, 1.0).unwrap();
        assert_eq!(samples, vec![0.0, 65535.0]);
    }
}
