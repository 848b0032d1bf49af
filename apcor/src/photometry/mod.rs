//! Aperture photometry and aperture corrections on model PSFs

pub mod apcor;
pub mod aperture;
pub mod tophat;

pub use apcor::{ApcorError, ApertureCorrector, CoordinateInput, Correction, SIRIANNI_APCOR};
pub use aperture::{pixel_fraction, ApertureMethod, AperturePhotometry, CircularAperture};
pub use tophat::TophatFilter;
