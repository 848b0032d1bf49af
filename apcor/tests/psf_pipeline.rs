//! End-to-end checks: model file on disk → reconstruction → aperture correction

use apcor::fits::{self, card, Value, VectorColumn};
use apcor::psf::{write_reconstructions, PolynomialNormalization, INSPECTION_COORDS};
use apcor::{
    ApcorConfig, ApcorError, ApertureCorrector, ApertureMethod, Correction, FitsError,
    ModelError, PsfImage, PsfModel, SIRIANNI_APCOR,
};
use approx::assert_relative_eq;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use test_helpers::synthetic_basis_planes;

const PLANE_SIZE: usize = 25;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn normalization() -> PolynomialNormalization {
    PolynomialNormalization {
        pol_zero_x: 5000.0,
        pol_scale_x: 5000.0,
        pol_zero_y: 5000.0,
        pol_scale_y: 5000.0,
    }
}

/// Write a seeded synthetic model to `dir/field.psf`
fn write_model(dir: &Path) -> PathBuf {
    let planes = synthetic_basis_planes(PLANE_SIZE, 2.0, 0.02, 2005);
    let model = PsfModel::from_planes(normalization(), 1.37, 4.71, &planes, "synthetic").unwrap();
    let path = dir.join("field.psf");
    model.save(&path, false).unwrap();
    path
}

#[test]
fn test_model_file_round_trip_keeps_metadata() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let path = write_model(dir.path());

    let model = PsfModel::load(&path).unwrap();
    assert_eq!(model.plane_shape(), (PLANE_SIZE, PLANE_SIZE));
    assert_eq!(model.normalization(), &normalization());
    assert_relative_eq!(model.chi2(), 1.37);
    assert_relative_eq!(model.fwhm(), 4.71);
    assert_eq!(model.source(), path.display().to_string());

    // Basis planes are stored in single precision
    let expected = synthetic_basis_planes(PLANE_SIZE, 2.0, 0.02, 2005);
    for (loaded, original) in model.basis_planes().zip(&expected) {
        for (a, b) in loaded.iter().zip(original.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-6);
        }
    }
}

#[test]
fn test_correction_from_file_matches_loaded_model() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let path = write_model(dir.path());

    let config = ApcorConfig {
        diameter_pixels: 4.0,
        pixel_scale_arcsec: 0.1,
        method: ApertureMethod::Exact,
    };
    let corrector = ApertureCorrector::from_config(&config).unwrap();
    let xs = vec![1667.0, 5509.0, 8403.0];
    let ys = vec![4943.0, 1881.0, 5672.0];

    let from_file = corrector.correct_file(&path, xs.clone(), ys.clone()).unwrap();
    let model = PsfModel::load(&path).unwrap();
    let from_model = corrector.correct(&model, xs, ys).unwrap();
    assert_eq!(from_file, from_model);

    for &value in from_file.as_slice() {
        // A 4 px aperture misses flux relative to the 10 px reference
        assert!(value > SIRIANNI_APCOR, "correction {value}");
        assert!(value < SIRIANNI_APCOR + 1.5, "correction {value}");
    }
}

#[test]
fn test_scalar_call_matches_sequence_element() {
    let dir = TempDir::new().unwrap();
    let path = write_model(dir.path());
    let model = PsfModel::load(&path).unwrap();
    let corrector = ApertureCorrector::from_config(&ApcorConfig::default()).unwrap();

    let sequence = corrector
        .correct(&model, vec![4367.0, 4786.0], vec![9017.0, 5089.0])
        .unwrap();
    let scalar = corrector.correct(&model, 4786.0, 5089.0).unwrap();
    assert_eq!(scalar, Correction::Scalar(sequence.as_slice()[1]));
}

#[test]
fn test_shape_error_reported_before_reading_file() {
    let dir = TempDir::new().unwrap();
    let corrector = ApertureCorrector::from_config(&ApcorConfig::default()).unwrap();

    // The file does not exist; the shape check must fire first
    let result = corrector.correct_file(&dir.path().join("missing.psf"), 1.0, vec![1.0, 2.0]);
    assert!(matches!(result, Err(ApcorError::InputShape { .. })));

    let result = corrector.correct_file(&dir.path().join("missing.psf"), 1.0, 2.0);
    assert!(matches!(result, Err(ApcorError::Model(ModelError::Fits(FitsError::Io(_))))));
}

#[test]
fn test_model_missing_fwhm_is_malformed() {
    let dir = TempDir::new().unwrap();
    let planes = synthetic_basis_planes(9, 1.5, 0.01, 1);
    let values: Vec<f64> = planes.iter().flat_map(|p| p.iter().copied()).collect();
    let column = VectorColumn {
        name: "PSF_MASK",
        values: &values,
        dims: Some(&[9, 9, 10]),
    };
    let cards = vec![
        card("CHI2", Value::Float(1.0), None),
        card("POLZERO1", Value::Float(100.0), None),
        card("POLSCAL1", Value::Float(50.0), None),
        card("POLZERO2", Value::Float(100.0), None),
        card("POLSCAL2", Value::Float(50.0), None),
    ];
    let table = fits::vector_table_hdu("PSF_DATA", &[column], cards).unwrap();

    let path = dir.path().join("no_fwhm.psf");
    fits::write_hdus(&path, &[fits::empty_primary().unwrap(), table], false).unwrap();

    match PsfModel::load(&path) {
        Err(ModelError::Malformed(msg)) => assert!(msg.contains("PSF_FWHM"), "{msg}"),
        other => panic!("expected a malformed model, got {other:?}"),
    }
}

#[test]
fn test_inspection_images_written_once() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let path = write_model(dir.path());
    let model = PsfModel::load(&path).unwrap();

    let written = write_reconstructions(&model, &INSPECTION_COORDS, dir.path(), false).unwrap();
    assert_eq!(written.len(), INSPECTION_COORDS.len());
    assert_eq!(written[3], dir.path().join("field_pos3.fits"));

    let image = PsfImage::read_fits(&written[3]).unwrap();
    assert_eq!(image.provenance().x_image, INSPECTION_COORDS[3].0);
    assert_eq!(image.provenance().y_image, INSPECTION_COORDS[3].1);
    assert_eq!(image.provenance().source, path.display().to_string());
    assert_eq!(image.pixels().dim(), (PLANE_SIZE, PLANE_SIZE));

    // A second pass without overwrite refuses to clobber the first
    let again = write_reconstructions(&model, &INSPECTION_COORDS, dir.path(), false);
    assert!(matches!(again, Err(FitsError::DestinationExists(_))));
    write_reconstructions(&model, &INSPECTION_COORDS, dir.path(), true).unwrap();
}

#[test]
fn test_correction_saved_for_inspection() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let path = write_model(dir.path());
    let model = PsfModel::load(&path).unwrap();

    let corrector = ApertureCorrector::from_config(&ApcorConfig {
        diameter_pixels: 3.0,
        pixel_scale_arcsec: 0.12,
        method: ApertureMethod::Subpixel { subpixels: 5 },
    })
    .unwrap();
    let positions: Vec<(f64, f64)> = INSPECTION_COORDS.to_vec();
    let corrections = corrector.correct_many(&model, &positions).unwrap();

    let report: Vec<String> = positions
        .iter()
        .zip(&corrections)
        .map(|((x, y), c)| format!("{x:8.1} {y:8.1} {c:.4}"))
        .collect();
    let report_path = test_helpers::output_path("apcor_inspection_coords.txt");
    std::fs::write(&report_path, report.join("\n")).unwrap();
    assert!(report_path.exists());
}
