mod common;

use std::fs;

use ndarray::Array3;

use astrostack_core::error::StackError;
use astrostack_core::io::fits::{read_fits, FitsReader};
use astrostack_core::io::image_io::{load_image, save_image};
use astrostack_core::io::{FileDecoder, FrameDecoder, ImageFileSink, OutputSink};
use astrostack_core::manifest::{FileManifest, FrameClass};
use astrostack_core::stack::{Accumulator, CombineMode};

use common::{write_fits_header, write_fits_u16};

// ---------------------------------------------------------------------------
// FITS
// ---------------------------------------------------------------------------

#[test]
fn test_read_mono_fits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("light.fits");
    let data = Array3::from_shape_fn((5, 7, 1), |(r, c, _)| (r * 1000 + c * 10) as u16);
    write_fits_u16(&path, &data);

    let reader = FitsReader::open(&path).unwrap();
    assert_eq!(reader.header.width, 7);
    assert_eq!(reader.header.height, 5);
    assert_eq!(reader.header.keywords.get("IMAGETYP").map(String::as_str), Some("LIGHT"));

    let frame = read_fits(&path).unwrap();
    assert_eq!(frame.shape(), (5, 7, 1));
    assert_eq!(frame.bit_depth, 16);
    assert_eq!(frame.data[[4, 6, 0]], 4060.0);
    assert_eq!(frame.data[[0, 0, 0]], 0.0);
}

#[test]
fn test_read_cube_fits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rgb.fit");
    let data = Array3::from_shape_fn((3, 4, 3), |(r, c, ch)| (ch * 20_000 + r * 4 + c) as u16);
    write_fits_u16(&path, &data);

    let frame = FileDecoder.decode(&path).unwrap();
    assert_eq!(frame.shape(), (3, 4, 3));
    assert_eq!(frame.data[[2, 3, 2]], 40_011.0);
}

#[test]
fn test_truncated_fits_is_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.fits");
    let data = Array3::<u16>::zeros((64, 64, 1));
    write_fits_u16(&path, &data);
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..2880 + 100]).unwrap();

    assert!(matches!(FileDecoder.decode(&path), Err(StackError::Decode { .. })));
}

#[test]
fn test_negative_axis_is_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("negative.fits");
    write_fits_header(&path, &[("BITPIX", 16), ("NAXIS", 2), ("NAXIS1", -1), ("NAXIS2", 4)]);

    match FileDecoder.decode(&path) {
        Err(StackError::Decode { reason, .. }) => assert!(reason.contains("NAXIS1"), "{reason}"),
        other => panic!("expected a decode error, got {other:?}"),
    }
}

#[test]
fn test_oversized_axes_are_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("huge.fits");
    write_fits_header(
        &path,
        &[
            ("BITPIX", -64),
            ("NAXIS", 3),
            ("NAXIS1", i64::MAX),
            ("NAXIS2", i64::MAX),
            ("NAXIS3", 3),
        ],
    );

    assert!(matches!(FileDecoder.decode(&path), Err(StackError::Decode { .. })));
}

#[test]
fn test_unknown_extension_is_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.cr2");
    fs::write(&path, b"not a frame").unwrap();
    assert!(matches!(FileDecoder.decode(&path), Err(StackError::Decode { .. })));
}

// ---------------------------------------------------------------------------
// Raster images
// ---------------------------------------------------------------------------

#[test]
fn test_save_and_reload_tiff() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stack.tiff");

    let mut acc = Accumulator::new((6, 9, 1));
    let frame = Array3::from_shape_fn((6, 9, 1), |(r, c, _)| (r * 9 + c) as u16 * 100);
    acc.add(&frame).unwrap();
    acc.add(&frame).unwrap();
    let image = acc.finish(CombineMode::Sum).unwrap();

    save_image(&image, &path).unwrap();
    let loaded = load_image(&path).unwrap();
    assert_eq!(loaded.shape(), (6, 9, 1));
    assert_eq!(loaded.bit_depth, 16);
    assert_eq!(loaded.data[[0, 0, 0]], 0.0);
    assert_eq!(loaded.data[[5, 8, 0]], 65_535.0);
}

#[test]
fn test_file_sink_writes_png() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stack.png");
    let image = Accumulator::seeded(&Array3::from_elem((4, 4, 3), 7u16)).finish(CombineMode::Sum).unwrap();

    ImageFileSink.present(&image, "test");
    ImageFileSink.save(&image, &path).unwrap();
    let loaded = FileDecoder.decode(&path).unwrap();
    assert_eq!(loaded.shape(), (4, 4, 3));
    assert_eq!(loaded.bit_depth, 8);
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

#[test]
fn test_manifest_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    for sub in ["Light", "Dark", "DarkFlat"] {
        fs::create_dir(dir.path().join(sub)).unwrap();
    }
    for name in ["b.fits", "a.fits", "c.fits"] {
        fs::write(dir.path().join("Light").join(name), b"").unwrap();
    }
    fs::write(dir.path().join("Dark").join("d.fits"), b"").unwrap();

    let manifest = FileManifest::from_directory(dir.path()).unwrap();
    let names: Vec<_> = manifest
        .light
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["a.fits", "b.fits", "c.fits"]);
    assert_eq!(manifest.count(FrameClass::Dark), 1);
    assert_eq!(manifest.count(FrameClass::DarkFlat), 0);
    assert!(manifest.bias.is_empty());
}

#[test]
fn test_manifest_from_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("manifest.toml");
    fs::write(&path, "light = [\"l1.fits\", \"l2.fits\"]\nflat = [\"f.fits\"]\n").unwrap();

    let manifest = FileManifest::from_toml_file(&path).unwrap();
    assert_eq!(manifest.count(FrameClass::Light), 2);
    assert_eq!(manifest.count(FrameClass::Flat), 1);
    assert!(manifest.validate().is_ok());
}

#[test]
fn test_manifest_requires_lights() {
    let manifest = FileManifest {
        dark: vec!["d.fits".into()],
        ..Default::default()
    };
    assert!(matches!(manifest.validate(), Err(StackError::EmptyManifest)));
}
