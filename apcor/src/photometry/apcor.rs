//! Aperture corrections from PSFEx models.
//!
//! The correction takes a magnitude measured in a small aperture to the
//! total magnitude in two steps:
//!
//! 1. Small aperture to a 1″ diameter aperture, using the encircled energy
//!    ratio measured on the model PSF reconstructed at the source position.
//! 2. 1″ diameter to infinity, using the published Sirianni et al. (2005)
//!    value [`SIRIANNI_APCOR`].
//!
//! ```text
//! EE         = flux(r = diameter / 2) / flux(r = 0.5″ / pixel_scale)
//! correction = -2.5 log10(EE) + 0.087
//! ```

use super::aperture::{AperturePhotometry, CircularAperture};
use crate::config::{ApcorConfig, ConfigError};
use crate::psf::{reconstruct, ModelError, PsfModel};
use rayon::prelude::*;
use std::path::Path;
use thiserror::Error;

/// Sirianni et al. (2005) aperture correction from a 1″ diameter aperture to
/// an infinite aperture, in magnitudes. A published calibration, not a tunable.
pub const SIRIANNI_APCOR: f64 = 0.087;

/// Radius of the 1″ diameter reference aperture, in arcseconds
const REFERENCE_RADIUS_ARCSEC: f64 = 0.5;

/// Errors raised while computing aperture corrections
#[derive(Debug, Error)]
pub enum ApcorError {
    #[error("Coordinate inputs disagree: x is {x}, y is {y}")]
    InputShape { x: String, y: String },

    #[error(
        "Non-positive encircled energy {ratio} at coordinate {index}: \
         working sum {working_sum}, reference sum {reference_sum}"
    )]
    NonPositiveFlux {
        index: usize,
        ratio: f64,
        working_sum: f64,
        reference_sum: f64,
    },

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// A coordinate argument: a single value or a sequence of values
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinateInput {
    Scalar(f64),
    Sequence(Vec<f64>),
}

impl CoordinateInput {
    fn describe(&self) -> String {
        match self {
            CoordinateInput::Scalar(_) => "a scalar".to_string(),
            CoordinateInput::Sequence(v) => format!("a sequence of length {}", v.len()),
        }
    }
}

impl From<f64> for CoordinateInput {
    fn from(value: f64) -> Self {
        CoordinateInput::Scalar(value)
    }
}

impl From<Vec<f64>> for CoordinateInput {
    fn from(values: Vec<f64>) -> Self {
        CoordinateInput::Sequence(values)
    }
}

impl From<&[f64]> for CoordinateInput {
    fn from(values: &[f64]) -> Self {
        CoordinateInput::Sequence(values.to_vec())
    }
}

/// Result of a correction call, shaped like its inputs
#[derive(Debug, Clone, PartialEq)]
pub enum Correction {
    Scalar(f64),
    Sequence(Vec<f64>),
}

impl Correction {
    /// Corrections as a slice, one per input coordinate
    pub fn as_slice(&self) -> &[f64] {
        match self {
            Correction::Scalar(value) => std::slice::from_ref(value),
            Correction::Sequence(values) => values,
        }
    }

    pub fn into_vec(self) -> Vec<f64> {
        match self {
            Correction::Scalar(value) => vec![value],
            Correction::Sequence(values) => values,
        }
    }
}

/// Zip matching coordinate inputs into positions; `true` if both were scalars
fn pair_up(
    x: CoordinateInput,
    y: CoordinateInput,
) -> Result<(Vec<(f64, f64)>, bool), ApcorError> {
    match (x, y) {
        (CoordinateInput::Scalar(x), CoordinateInput::Scalar(y)) => Ok((vec![(x, y)], true)),
        (CoordinateInput::Sequence(xs), CoordinateInput::Sequence(ys)) if xs.len() == ys.len() => {
            Ok((xs.into_iter().zip(ys).collect(), false))
        }
        (x, y) => Err(ApcorError::InputShape {
            x: x.describe(),
            y: y.describe(),
        }),
    }
}

fn shape_like_input(corrections: Vec<f64>, scalar: bool) -> Correction {
    if scalar && corrections.len() == 1 {
        Correction::Scalar(corrections[0])
    } else {
        Correction::Sequence(corrections)
    }
}

/// Flux within one aperture of a model PSF
#[derive(Debug, Clone, Copy, PartialEq)]
struct ApertureMeasurement {
    radius: f64,
    sum: f64,
}

/// Working and reference measurements on one reconstructed PSF
#[derive(Debug, Clone, Copy)]
struct EncircledEnergy {
    working: ApertureMeasurement,
    reference: ApertureMeasurement,
}

impl EncircledEnergy {
    fn ratio(&self) -> f64 {
        self.working.sum / self.reference.sum
    }

    /// Magnitude offset to infinite aperture; `index` locates failures in a batch
    fn magnitude_offset(&self, index: usize) -> Result<f64, ApcorError> {
        let ratio = self.ratio();
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(ApcorError::NonPositiveFlux {
                index,
                ratio,
                working_sum: self.working.sum,
                reference_sum: self.reference.sum,
            });
        }
        Ok(-2.5 * ratio.log10() + SIRIANNI_APCOR)
    }
}

/// Computes aperture corrections from model PSFs.
///
/// Both apertures of a correction are measured with the same photometry
/// primitive, so the encircled energy ratio is always like-for-like.
#[derive(Debug, Clone)]
pub struct ApertureCorrector<P = CircularAperture> {
    /// Working aperture diameter in pixels
    diameter: f64,
    /// Plate scale in arcseconds per pixel
    pixel_scale: f64,
    photometry: P,
}

impl ApertureCorrector<CircularAperture> {
    /// Corrector using the circular aperture and method named in `config`
    pub fn from_config(config: &ApcorConfig) -> Result<Self, ApcorError> {
        config.validate()?;
        Ok(Self::with_photometry(
            config.diameter_pixels,
            config.pixel_scale_arcsec,
            CircularAperture::new(config.method),
        ))
    }
}

impl<P: AperturePhotometry> ApertureCorrector<P> {
    /// # Arguments
    /// * `diameter` - working aperture diameter in pixels (normally below 1″)
    /// * `pixel_scale` - arcseconds per pixel
    /// * `photometry` - aperture summing primitive used for both apertures
    pub fn with_photometry(diameter: f64, pixel_scale: f64, photometry: P) -> Self {
        Self {
            diameter,
            pixel_scale,
            photometry,
        }
    }

    /// Radius of the working aperture in pixels
    pub fn working_radius(&self) -> f64 {
        self.diameter / 2.0
    }

    /// Radius of the 1″ diameter reference aperture in pixels
    pub fn reference_radius(&self) -> f64 {
        REFERENCE_RADIUS_ARCSEC / self.pixel_scale
    }

    pub fn photometry(&self) -> &P {
        &self.photometry
    }

    /// Aperture correction at `x`, `y`.
    ///
    /// `x` and `y` must both be scalars or both be sequences of equal length.
    /// Scalar inputs give [`Correction::Scalar`]; sequences give one
    /// correction per pair, in input order. A non-positive encircled energy at
    /// any pair fails the whole call.
    ///
    /// Both apertures are centered on the brightest pixel of the
    /// reconstructed PSF. The peak is found as a `(row, column)` array index
    /// and handed to the photometry primitive as `(x, y) = (column, row)`.
    /// Tools that pass the `(row, column)` index through unswapped measure a
    /// mirrored position, so their corrections differ from these for any PSF
    /// that is not symmetric about the diagonal.
    ///
    /// # Errors
    ///
    /// * [`ApcorError::InputShape`] when `x` and `y` differ in kind or length.
    /// * [`ApcorError::NonPositiveFlux`] when either aperture sum at some
    ///   position is zero, negative or not finite.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use apcor::{ApcorConfig, ApertureCorrector, Correction, PsfModel};
    /// use std::path::Path;
    ///
    /// let corrector = ApertureCorrector::from_config(&ApcorConfig::default())?;
    /// let model = PsfModel::load(Path::new("field.psf"))?;
    ///
    /// if let Correction::Scalar(mag) = corrector.correct(&model, 1024.0, 2048.0)? {
    ///     log::info!("Aperture correction: {mag:.4} mag");
    /// }
    /// let batch = corrector.correct(&model, vec![10.0, 20.0], vec![30.0, 40.0])?;
    /// assert_eq!(batch.as_slice().len(), 2);
    /// # Ok::<(), apcor::ApcorError>(())
    /// ```
    pub fn correct(
        &self,
        model: &PsfModel,
        x: impl Into<CoordinateInput>,
        y: impl Into<CoordinateInput>,
    ) -> Result<Correction, ApcorError> {
        let (positions, scalar) = pair_up(x.into(), y.into())?;
        let corrections = self.correct_pairs(model, &positions)?;
        Ok(shape_like_input(corrections, scalar))
    }

    /// Load the model at `path` once and correct at `x`, `y`.
    ///
    /// Inputs are checked before the file is read.
    ///
    /// # Errors
    ///
    /// As [`ApertureCorrector::correct`], plus [`ApcorError::Model`] when the
    /// model cannot be loaded.
    pub fn correct_file(
        &self,
        path: &Path,
        x: impl Into<CoordinateInput>,
        y: impl Into<CoordinateInput>,
    ) -> Result<Correction, ApcorError> {
        let (positions, scalar) = pair_up(x.into(), y.into())?;
        let model = PsfModel::load(path)?;
        let corrections = self.correct_pairs(&model, &positions)?;
        Ok(shape_like_input(corrections, scalar))
    }

    /// Aperture correction at a single position
    pub fn correct_at(&self, model: &PsfModel, x: f64, y: f64) -> Result<f64, ApcorError> {
        let mut corrections = self.correct_pairs(model, &[(x, y)])?;
        Ok(corrections.remove(0))
    }

    /// Aperture corrections at a list of positions
    pub fn correct_many(
        &self,
        model: &PsfModel,
        positions: &[(f64, f64)],
    ) -> Result<Vec<f64>, ApcorError> {
        self.correct_pairs(model, positions)
    }

    /// The one correction algorithm behind every entry point.
    ///
    /// Encircled energies are measured for all positions first (in parallel),
    /// then converted to magnitudes; the first non-positive ratio aborts.
    fn correct_pairs(
        &self,
        model: &PsfModel,
        positions: &[(f64, f64)],
    ) -> Result<Vec<f64>, ApcorError> {
        log::debug!(
            "Aperture correction for {} position(s): working r = {:.3} px, reference r = {:.3} px, {:?}",
            positions.len(),
            self.working_radius(),
            self.reference_radius(),
            self.photometry.method()
        );

        let energies: Vec<EncircledEnergy> = positions
            .par_iter()
            .map(|&(x, y)| self.encircled_energy(model, x, y))
            .collect();

        energies
            .iter()
            .enumerate()
            .map(|(index, ee)| ee.magnitude_offset(index))
            .collect()
    }

    /// Reconstruct the PSF at `(x, y)` and measure both apertures on its peak
    fn encircled_energy(&self, model: &PsfModel, x: f64, y: f64) -> EncircledEnergy {
        let psf = reconstruct(model, x, y);
        let (row, col) = psf.peak_pixel();
        let center = (col as f64, row as f64);
        let pixels = psf.pixels().view();

        let measure = |radius: f64| ApertureMeasurement {
            radius,
            sum: self.photometry.measure(&pixels, center, radius),
        };
        let working = measure(self.working_radius());
        let reference = measure(self.reference_radius());

        log::trace!(
            "PSF at ({x}, {y}): peak at {center:?}, sums {:.6} (r={:.3}) / {:.6} (r={:.3})",
            working.sum,
            working.radius,
            reference.sum,
            reference.radius
        );

        EncircledEnergy { working, reference }
    }
}
