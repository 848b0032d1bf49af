//! PSF reconstruction at an image position.
//!
//! PSFEx describes the PSF variation across the field with a degree-3
//! polynomial in the normalized image coordinates. The model keeps one basis
//! image per term; the PSF at a position is the sum of the basis images
//! weighted by the term values:
//!
//! ```text
//! psf = P0 + x P1 + x² P2 + x³ P3 + y P4 + xy P5 + x²y P6 + y² P7 + xy² P8 + y³ P9
//! ```
//!
//! The term list is fixed. It is not the full set of bivariate cubic terms
//! (there is no x²y², x³y, ...), and must stay exactly as PSFEx orders it.

use super::model::{PsfModel, N_BASIS_PLANES};
use crate::fits::{self, card, comment_card, FitsError, FitsReader, Value};
use ndarray::Array2;
use std::path::{Path, PathBuf};

/// Positions at which PSFs are written out for visual inspection
pub const INSPECTION_COORDS: [(f64, f64); 5] = [
    (1667.0, 4943.0),
    (5509.0, 1881.0),
    (8403.0, 5672.0),
    (4367.0, 9017.0),
    (4786.0, 5089.0),
];

/// Normalized coordinate magnitude past which the polynomial is extrapolating
const EXTRAPOLATION_LIMIT: f64 = 1.0;

/// Comment block separating reconstruction keywords from copied model keywords
const MODEL_KEYWORDS_COMMENT: &str = " Keywords from PSFEx PSF model file";

/// Term values `1, x, x², x³, y, xy, x²y, y², xy², y³` in basis-plane order
pub fn polynomial_terms(x: f64, y: f64) -> [f64; N_BASIS_PLANES] {
    [
        1.0,
        x,
        x * x,
        x * x * x,
        y,
        x * y,
        x * x * y,
        y * y,
        x * y * y,
        y * y * y,
    ]
}

/// Where a reconstructed PSF came from
#[derive(Debug, Clone, PartialEq)]
pub struct PsfProvenance {
    /// Identifier of the source model (usually its path)
    pub source: String,
    pub x_image: f64,
    pub y_image: f64,
    pub chi2: f64,
    pub fwhm: f64,
}

/// PSF image reconstructed at one position
#[derive(Debug, Clone)]
pub struct PsfImage {
    pixels: Array2<f64>,
    provenance: PsfProvenance,
}

/// Evaluate the model at image coordinate `(x_image, y_image)`.
///
/// Positions outside the normalization domain are extrapolated, not clamped;
/// such calls are reported through `log::warn!`.
///
/// # Examples
///
/// ```
/// use apcor::psf::{reconstruct, PolynomialNormalization, PsfModel};
/// use ndarray::Array3;
///
/// let normalization = PolynomialNormalization {
///     pol_zero_x: 500.0,
///     pol_scale_x: 500.0,
///     pol_zero_y: 500.0,
///     pol_scale_y: 500.0,
/// };
/// let mut basis = Array3::<f64>::zeros((10, 5, 5));
/// basis[[0, 2, 2]] = 1.0;
/// let model = PsfModel::new(normalization, 1.0, 2.0, basis, "synthetic")?;
///
/// // At the normalization origin only the constant plane contributes
/// let psf = reconstruct(&model, 500.0, 500.0);
/// assert_eq!(psf.peak_pixel(), (2, 2));
/// # Ok::<(), apcor::ModelError>(())
/// ```
pub fn reconstruct(model: &PsfModel, x_image: f64, y_image: f64) -> PsfImage {
    let (x, y) = model.normalization().normalize(x_image, y_image);
    if x.abs() > EXTRAPOLATION_LIMIT || y.abs() > EXTRAPOLATION_LIMIT {
        log::warn!(
            "PSF at ({x_image}, {y_image}) extrapolates {} to normalized ({x:.3}, {y:.3})",
            model.source()
        );
    }

    let mut pixels = Array2::<f64>::zeros(model.plane_shape());
    for (weight, plane) in polynomial_terms(x, y).iter().zip(model.basis_planes()) {
        pixels.scaled_add(*weight, &plane);
    }

    PsfImage {
        pixels,
        provenance: PsfProvenance {
            source: model.source().to_string(),
            x_image,
            y_image,
            chi2: model.chi2(),
            fwhm: model.fwhm(),
        },
    }
}

impl PsfImage {
    pub fn pixels(&self) -> &Array2<f64> {
        &self.pixels
    }

    pub fn provenance(&self) -> &PsfProvenance {
        &self.provenance
    }

    pub fn into_pixels(self) -> Array2<f64> {
        self.pixels
    }

    /// `(row, col)` of the brightest pixel; ties go to the first in row-major order
    pub fn peak_pixel(&self) -> (usize, usize) {
        let mut best = (0, 0);
        let mut best_value = f64::NEG_INFINITY;
        for ((row, col), &value) in self.pixels.indexed_iter() {
            if value > best_value {
                best_value = value;
                best = (row, col);
            }
        }
        best
    }

    /// Write as a single primary image HDU (`BITPIX = -64`) with provenance
    /// keywords. A `COMMENT` card separates `PSFEX`/`X_IMAGE`/`Y_IMAGE`
    /// from the keys copied out of the model.
    ///
    /// # Errors
    ///
    /// [`FitsError::DestinationExists`] if `path` exists and `overwrite` is
    /// false; [`FitsError::Io`] for other write failures.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use apcor::{reconstruct, PsfModel};
    /// use std::path::Path;
    ///
    /// let model = PsfModel::load(Path::new("field.psf"))?;
    /// reconstruct(&model, 2048.0, 1024.0).write_fits(Path::new("field_center.fits"), false)?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn write_fits(&self, path: &Path, overwrite: bool) -> Result<(), FitsError> {
        let p = &self.provenance;
        let cards = vec![
            card("PSFEX", Value::String(p.source.clone()), Some("PSFEx .psf file")),
            card("X_IMAGE", Value::Float(p.x_image), Some("X coord of PSF reconstruction")),
            card("Y_IMAGE", Value::Float(p.y_image), Some("Y coord of PSF reconstruction")),
            comment_card(MODEL_KEYWORDS_COMMENT),
            card("CHI2", Value::Float(p.chi2), Some("Final Chi2")),
            card("PSF_FWHM", Value::Float(p.fwhm), Some("Mean PSF FWHM")),
        ];

        let hdu = fits::image_hdu(self.pixels.view(), cards)?;
        fits::write_hdus(path, &[hdu], overwrite)
    }

    /// Read back an image written by [`PsfImage::write_fits`]
    pub fn read_fits(path: &Path) -> Result<Self, FitsError> {
        let file = FitsReader::open(path)?;
        let provenance = PsfProvenance {
            source: file.key::<String>(0, "PSFEX")?,
            x_image: file.key(0, "X_IMAGE")?,
            y_image: file.key(0, "Y_IMAGE")?,
            chi2: file.key(0, "CHI2")?,
            fwhm: file.key(0, "PSF_FWHM")?,
        };

        Ok(Self {
            pixels: file.image(0)?,
            provenance,
        })
    }
}

/// Reconstruct the model at each position and write `<stem>_pos<i>.fits` into `out_dir`
///
/// # Errors
///
/// Stops at the first image that cannot be written. With `overwrite` unset
/// an existing file gives [`FitsError::DestinationExists`]; images written
/// before it are left in place.
pub fn write_reconstructions(
    model: &PsfModel,
    coords: &[(f64, f64)],
    out_dir: &Path,
    overwrite: bool,
) -> Result<Vec<PathBuf>, FitsError> {
    let stem = Path::new(model.source())
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("psf")
        .to_string();

    coords
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| {
            let path = out_dir.join(format!("{stem}_pos{i}.fits"));
            reconstruct(model, x, y).write_fits(&path, overwrite)?;
            Ok(path)
        })
        .collect()
}
