//! Top-hat detection filters.
//!
//! Builds a SExtractor `CONV NORM` convolution mask of a top-hat (uniform
//! disk) PSF, so detection can be matched to the photometry aperture.

use super::aperture::{pixel_fraction, ApertureMethod};
use ndarray::Array2;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Sub-pixel sampling used for mask edges
const MASK_SUBPIXELS: u32 = 10;

/// Smallest mask size SExtractor accepts
const MIN_MASK_SIZE: usize = 3;

/// Convolution mask of a top-hat of a given diameter
#[derive(Debug, Clone)]
pub struct TophatFilter {
    diameter: f64,
    mask: Array2<f64>,
}

impl TophatFilter {
    /// Mask for a top-hat of `diameter` pixels.
    ///
    /// The mask is `ceil(diameter)` pixels on a side, bumped to an odd size of
    /// at least 3. Each entry is the fraction of that pixel covered by the disk.
    pub fn new(diameter: f64) -> Self {
        let size = mask_size(diameter);
        let center = (size - 1) as f64 / 2.0;
        let radius = diameter / 2.0;
        let method = ApertureMethod::Subpixel {
            subpixels: MASK_SUBPIXELS,
        };

        let mask = Array2::from_shape_fn((size, size), |(row, col)| {
            pixel_fraction(method, col as f64 - center, row as f64 - center, radius)
        });
        Self { diameter, mask }
    }

    pub fn diameter(&self) -> f64 {
        self.diameter
    }

    pub fn mask(&self) -> &Array2<f64> {
        &self.mask
    }

    /// Write the filter file; refuses to replace an existing file unless `overwrite`
    pub fn save(&self, path: &Path, overwrite: bool) -> std::io::Result<()> {
        let mut options = OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let mut file = options.open(path)?;
        write!(file, "{self}")
    }
}

fn mask_size(diameter: f64) -> usize {
    let mut size = diameter.ceil().max(0.0) as usize;
    if size % 2 == 0 {
        size += 1;
    }
    size.max(MIN_MASK_SIZE)
}

impl fmt::Display for TophatFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = self.mask.nrows();
        writeln!(f, "CONV NORM")?;
        writeln!(
            f,
            "# {size}x{size} convolution mask of a top-hat PSF with diameter = {:3.1} pixels.",
            self.diameter
        )?;
        for row in self.mask.rows() {
            let line: Vec<String> = row.iter().map(|v| format!("{v:8.6}")).collect();
            writeln!(f, "{}", line.join(" "))?;
        }
        Ok(())
    }
}
