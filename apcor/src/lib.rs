//! PSFEx PSF reconstruction and aperture corrections.
//!
//! Loads PSFEx models (FITS files holding ten basis images of a degree-3
//! position-dependent PSF), reconstructs the PSF anywhere on the detector,
//! and derives the magnitude correction from a small working aperture to
//! total flux.
//!
//! ```no_run
//! use apcor::{ApcorConfig, ApertureCorrector, PsfModel};
//! use std::path::Path;
//!
//! let corrector = ApertureCorrector::from_config(&ApcorConfig::default())?;
//! let model = PsfModel::load(Path::new("field.psf"))?;
//! let corrections = corrector.correct(&model, vec![512.0, 1800.0], vec![300.0, 950.0])?;
//! log::info!("Aperture corrections: {:?}", corrections.as_slice());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Inspection stamps are written with the positions in
//! [`psf::INSPECTION_COORDS`]:
//!
//! ```no_run
//! use apcor::psf::{write_reconstructions, INSPECTION_COORDS};
//! use apcor::PsfModel;
//! use std::path::Path;
//!
//! let model = PsfModel::load(Path::new("field.psf"))?;
//! let written = write_reconstructions(&model, &INSPECTION_COORDS, Path::new("."), false)?;
//! assert_eq!(written.len(), INSPECTION_COORDS.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Errors
//!
//! Each module has its own error enum: [`FitsError`] for file access,
//! [`ModelError`] for model files that read but do not describe a usable
//! PSFEx model, [`ApcorError`] for correction inputs and degenerate
//! apertures, and [`ConfigError`] for settings.

pub mod config;
pub mod fits;
pub mod photometry;
pub mod psf;

pub use config::{ApcorConfig, ConfigError};
pub use fits::{FitsError, FitsReader};
pub use photometry::{
    ApcorError, ApertureCorrector, ApertureMethod, AperturePhotometry, CircularAperture,
    CoordinateInput, Correction, TophatFilter, SIRIANNI_APCOR,
};
pub use psf::{reconstruct, ModelError, PsfImage, PsfModel};
