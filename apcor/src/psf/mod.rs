//! PSFEx models and PSF reconstruction

pub mod model;
pub mod reconstruct;

pub use model::{PolynomialNormalization, PsfModel, N_BASIS_PLANES};
pub use reconstruct::{
    reconstruct, write_reconstructions, PsfImage, PsfProvenance, INSPECTION_COORDS,
};

use crate::fits::FitsError;
use thiserror::Error;

/// Errors raised while loading or persisting a PSF model
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Malformed PSF model: {0}")]
    Malformed(String),

    #[error("FITS error: {0}")]
    Fits(#[from] FitsError),
}
