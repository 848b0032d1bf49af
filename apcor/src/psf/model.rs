//! PSFEx model files.
//!
//! A PSFEx `.psf` file stores a spatially-varying PSF as a cubic polynomial
//! in image coordinates. The header of the first extension carries the
//! normalization of those coordinates and some fit statistics; the first cell
//! of its binary table holds one basis image per polynomial term.

use super::ModelError;
use crate::fits::{self, card, FitsError, FitsReader, Value, VectorColumn};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use std::path::Path;

/// Number of polynomial terms, and therefore basis planes, in a degree-3 model
pub const N_BASIS_PLANES: usize = 10;

/// Polynomial degree implied by [`N_BASIS_PLANES`]
pub const POLYNOMIAL_DEGREE: i64 = 3;

/// Extension name PSFEx uses for the model table
const PSF_EXTNAME: &str = "PSF_DATA";

/// The model table is the first extension
const MODEL_HDU: usize = 1;

/// Mapping from absolute image coordinates to the polynomial's domain
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolynomialNormalization {
    pub pol_zero_x: f64,
    pub pol_scale_x: f64,
    pub pol_zero_y: f64,
    pub pol_scale_y: f64,
}

impl PolynomialNormalization {
    /// Normalized `(x, y)` for an image coordinate
    pub fn normalize(&self, x_image: f64, y_image: f64) -> (f64, f64) {
        (
            (x_image - self.pol_zero_x) / self.pol_scale_x,
            (y_image - self.pol_zero_y) / self.pol_scale_y,
        )
    }
}

/// A loaded PSFEx model. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct PsfModel {
    normalization: PolynomialNormalization,
    chi2: f64,
    fwhm: f64,
    /// Shape (N_BASIS_PLANES, ny, nx)
    basis: Array3<f64>,
    source: String,
}

impl PsfModel {
    /// Build a model from its parts, checking the structural invariants.
    ///
    /// # Arguments
    /// * `normalization` - coordinate zero-points and scales (scales must be non-zero)
    /// * `chi2` - fit quality statistic, kept for provenance
    /// * `fwhm` - mean PSF FWHM in pixels, kept for provenance
    /// * `basis` - cube of shape (10, ny, nx) in the term order `1, x, x², x³, y, xy, x²y, y², xy², y³`
    /// * `source` - identifier of where the model came from
    ///
    /// # Errors
    ///
    /// [`ModelError::Malformed`] when the cube does not hold ten non-empty
    /// planes or a normalization scale is zero or non-finite.
    pub fn new(
        normalization: PolynomialNormalization,
        chi2: f64,
        fwhm: f64,
        basis: Array3<f64>,
        source: impl Into<String>,
    ) -> Result<Self, ModelError> {
        let (planes, ny, nx) = basis.dim();
        if planes != N_BASIS_PLANES {
            return Err(ModelError::Malformed(format!(
                "expected {N_BASIS_PLANES} basis planes, found {planes}"
            )));
        }
        if ny == 0 || nx == 0 {
            return Err(ModelError::Malformed(format!(
                "basis planes have empty shape {ny}x{nx}"
            )));
        }
        for (name, scale) in [
            ("POLSCAL1", normalization.pol_scale_x),
            ("POLSCAL2", normalization.pol_scale_y),
        ] {
            if scale == 0.0 || !scale.is_finite() {
                return Err(ModelError::Malformed(format!(
                    "{name} must be finite and non-zero, found {scale}"
                )));
            }
        }

        Ok(Self {
            normalization,
            chi2,
            fwhm,
            basis,
            source: source.into(),
        })
    }

    /// Build a model from a list of equally-shaped planes
    pub fn from_planes(
        normalization: PolynomialNormalization,
        chi2: f64,
        fwhm: f64,
        planes: &[Array2<f64>],
        source: impl Into<String>,
    ) -> Result<Self, ModelError> {
        if planes.len() != N_BASIS_PLANES {
            return Err(ModelError::Malformed(format!(
                "expected {N_BASIS_PLANES} basis planes, found {}",
                planes.len()
            )));
        }
        let shape = planes[0].dim();
        if let Some((i, plane)) = planes.iter().enumerate().find(|(_, p)| p.dim() != shape) {
            return Err(ModelError::Malformed(format!(
                "basis plane {i} has shape {:?}, plane 0 has {shape:?}",
                plane.dim()
            )));
        }

        let views: Vec<_> = planes.iter().map(|p| p.view()).collect();
        let basis = ndarray::stack(Axis(0), &views)
            .map_err(|e| ModelError::Malformed(format!("cannot stack basis planes: {e}")))?;
        Self::new(normalization, chi2, fwhm, basis, source)
    }

    /// Load a PSFEx model file.
    ///
    /// Requires `CHI2`, `POLZERO1`, `POLSCAL1`, `POLZERO2`, `POLSCAL2` and
    /// `PSF_FWHM` in the first extension header, and exactly ten basis planes
    /// in the first field of the first table row. The plane shape comes from
    /// `TDIM1`, or from `PSFAXIS1..3` when the column has no `TDIM1`.
    ///
    /// # Errors
    ///
    /// * [`ModelError::Malformed`] when a required key is missing or not
    ///   numeric, the cube does not hold exactly ten planes, or the cell
    ///   length disagrees with the declared dimensions.
    /// * [`ModelError::Fits`] when the file cannot be read or its HDU layout
    ///   is broken.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use apcor::PsfModel;
    /// use std::path::Path;
    ///
    /// let model = PsfModel::load(Path::new("field.psf"))?;
    /// let (ny, nx) = model.plane_shape();
    /// log::info!("{}: {nx}x{ny} planes, FWHM {:.2} px", model.source(), model.fwhm());
    /// # Ok::<(), apcor::ModelError>(())
    /// ```
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let file = FitsReader::open(path)?;
        if file.num_hdus()? < 2 {
            return Err(ModelError::Malformed(
                "no PSF extension after the primary HDU".into(),
            ));
        }

        let chi2 = required_number(&file, "CHI2")?;
        let normalization = PolynomialNormalization {
            pol_zero_x: required_number(&file, "POLZERO1")?,
            pol_scale_x: required_number(&file, "POLSCAL1")?,
            pol_zero_y: required_number(&file, "POLZERO2")?,
            pol_scale_y: required_number(&file, "POLSCAL2")?,
        };
        let fwhm = required_number(&file, "PSF_FWHM")?;

        for (keyword, expected) in [("POLNAXIS", 2), ("POLDEG1", POLYNOMIAL_DEGREE)] {
            match file.optional_key::<i64>(MODEL_HDU, keyword).map_err(malformed)? {
                Some(found) if found != expected => {
                    return Err(ModelError::Malformed(format!(
                        "{keyword} must be {expected}, found {found}"
                    )))
                }
                _ => {}
            }
        }

        let basis = read_basis_cube(&file)?;
        log::debug!(
            "Loaded PSF model {} with {}x{} basis planes",
            path.display(),
            basis.dim().1,
            basis.dim().2
        );

        Self::new(
            normalization,
            chi2,
            fwhm,
            basis,
            path.display().to_string(),
        )
    }

    /// Write the model in PSFEx layout: an empty primary HDU and a
    /// `PSF_DATA` table whose single `PSF_MASK` cell holds the cube.
    ///
    /// # Errors
    ///
    /// [`FitsError::DestinationExists`](crate::FitsError::DestinationExists)
    /// (wrapped in [`ModelError::Fits`]) if `path` exists and `overwrite` is
    /// false; other I/O failures as [`ModelError::Fits`].
    pub fn save(&self, path: &Path, overwrite: bool) -> Result<(), ModelError> {
        let (planes, ny, nx) = self.basis.dim();
        // Standard layout of (plane, y, x) is already FITS order with x fastest
        let values: Vec<f64> = self.basis.iter().copied().collect();
        let dims = [nx, ny, planes];
        let column = VectorColumn {
            name: "PSF_MASK",
            values: &values,
            dims: Some(&dims),
        };

        let norm = &self.normalization;
        let context = "Offset value for this context parameter";
        let scale = "Scale value for this context parameter";
        let group = "Polynom group for this context parameter";
        let axis = "Number of element along this axis";
        let name = "Name of this context parameter";
        let degree = "Polynom degree for this context group";
        let cards = vec![
            card("CHI2", Value::Float(self.chi2), Some("Final Chi2")),
            card("POLNAXIS", Value::Integer(2), Some("Number of context parameters")),
            card("POLGRP1", Value::Integer(1), Some(group)),
            card("POLNAME1", Value::String("X_IMAGE".into()), Some(name)),
            card("POLZERO1", Value::Float(norm.pol_zero_x), Some(context)),
            card("POLSCAL1", Value::Float(norm.pol_scale_x), Some(scale)),
            card("POLGRP2", Value::Integer(1), Some(group)),
            card("POLNAME2", Value::String("Y_IMAGE".into()), Some(name)),
            card("POLZERO2", Value::Float(norm.pol_zero_y), Some(context)),
            card("POLSCAL2", Value::Float(norm.pol_scale_y), Some(scale)),
            card("POLNGRP", Value::Integer(1), Some("Number of context groups")),
            card("POLDEG1", Value::Integer(POLYNOMIAL_DEGREE), Some(degree)),
            card("PSF_FWHM", Value::Float(self.fwhm), Some("PSF FWHM in image pixels")),
            card("PSFNAXIS", Value::Integer(3), Some("Dimensionality of the PSF data")),
            card("PSFAXIS1", Value::Integer(nx as i64), Some(axis)),
            card("PSFAXIS2", Value::Integer(ny as i64), Some(axis)),
            card("PSFAXIS3", Value::Integer(planes as i64), Some(axis)),
        ];

        let table = fits::vector_table_hdu(PSF_EXTNAME, &[column], cards)?;
        fits::write_hdus(path, &[fits::empty_primary()?, table], overwrite)?;
        Ok(())
    }

    pub fn normalization(&self) -> &PolynomialNormalization {
        &self.normalization
    }

    pub fn chi2(&self) -> f64 {
        self.chi2
    }

    pub fn fwhm(&self) -> f64 {
        self.fwhm
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// `(ny, nx)` shape shared by every basis plane
    pub fn plane_shape(&self) -> (usize, usize) {
        let (_, ny, nx) = self.basis.dim();
        (ny, nx)
    }

    /// Basis plane for term `index` in the fixed term order
    pub fn basis_plane(&self, index: usize) -> ArrayView2<'_, f64> {
        self.basis.index_axis(Axis(0), index)
    }

    pub fn basis_planes(&self) -> impl Iterator<Item = ArrayView2<'_, f64>> {
        self.basis.outer_iter()
    }
}

/// Key and layout problems inside a readable file are model problems
fn malformed(e: FitsError) -> ModelError {
    match e {
        FitsError::MissingKeyword(_)
        | FitsError::InvalidKeyword { .. }
        | FitsError::Unsupported(_) => ModelError::Malformed(e.to_string()),
        other => ModelError::Fits(other),
    }
}

fn required_number(file: &FitsReader, keyword: &str) -> Result<f64, ModelError> {
    file.key::<f64>(MODEL_HDU, keyword).map_err(|e| match e {
        FitsError::MissingKeyword(_) => {
            ModelError::Malformed(format!("missing header keyword {keyword}"))
        }
        FitsError::InvalidKeyword { reason, .. } => {
            ModelError::Malformed(format!("keyword {keyword} is not numeric: {reason}"))
        }
        other => malformed(other),
    })
}

/// Read the first field of the first row as a (planes, ny, nx) cube
fn read_basis_cube(file: &FitsReader) -> Result<Array3<f64>, ModelError> {
    let values = file
        .vector_cell(MODEL_HDU, 1)
        .map_err(|e| match e {
            FitsError::Unsupported(reason) => {
                ModelError::Malformed(format!("cannot read basis planes: {reason}"))
            }
            other => malformed(other),
        })?;

    let dims = match file.column_dims(MODEL_HDU, 1).map_err(malformed)? {
        Some(dims) => dims,
        None => (1..=3)
            .map(|i| {
                let key = format!("PSFAXIS{i}");
                file.optional_key::<i64>(MODEL_HDU, &key)
                    .map_err(malformed)?
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| {
                        ModelError::Malformed(format!("basis cube has no TDIM1 and no valid {key}"))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?,
    };

    let (nx, ny, planes) = match dims.as_slice() {
        [nx, ny, planes] => (*nx, *ny, *planes),
        _ => {
            return Err(ModelError::Malformed(format!(
                "basis cube must be 3-D, found dimensions {dims:?}"
            )))
        }
    };
    if planes != N_BASIS_PLANES {
        return Err(ModelError::Malformed(format!(
            "expected {N_BASIS_PLANES} basis planes, found {planes}"
        )));
    }
    let expected = nx
        .checked_mul(ny)
        .and_then(|n| n.checked_mul(planes))
        .ok_or_else(|| {
            ModelError::Malformed(format!("basis cube dimensions {dims:?} are too large"))
        })?;
    if expected != values.len() {
        return Err(ModelError::Malformed(format!(
            "basis cell holds {} values but dimensions {dims:?} need {expected}",
            values.len()
        )));
    }

    Array3::from_shape_vec((planes, ny, nx), values)
        .map_err(|e| ModelError::Malformed(format!("basis cube shape: {e}")))
}
