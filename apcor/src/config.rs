//! Aperture correction settings, persisted as JSON.

use crate::photometry::aperture::ApertureMethod;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Working aperture and plate scale for a correction run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApcorConfig {
    /// Working aperture diameter in pixels
    pub diameter_pixels: f64,
    /// Plate scale in arcseconds per pixel
    pub pixel_scale_arcsec: f64,
    /// Overlap policy for pixels on the aperture edge
    #[serde(default)]
    pub method: ApertureMethod,
}

impl Default for ApcorConfig {
    /// A 4 px aperture on a 0.1″/px detector
    fn default() -> Self {
        Self {
            diameter_pixels: 4.0,
            pixel_scale_arcsec: 0.1,
            method: ApertureMethod::Exact,
        }
    }
}

impl ApcorConfig {
    /// Check the settings can produce a correction.
    ///
    /// A working aperture wider than the 1″ reference is allowed but logged,
    /// since the resulting correction is negative relative to the 1″ value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.diameter_pixels.is_finite() && self.diameter_pixels > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "aperture diameter must be positive, got {}",
                self.diameter_pixels
            )));
        }
        if !(self.pixel_scale_arcsec.is_finite() && self.pixel_scale_arcsec > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "pixel scale must be positive, got {}",
                self.pixel_scale_arcsec
            )));
        }
        if let ApertureMethod::Subpixel { subpixels: 0 } = self.method {
            return Err(ConfigError::Invalid(
                "subpixel sampling needs at least 1 subpixel".to_string(),
            ));
        }

        let reference_diameter = 1.0 / self.pixel_scale_arcsec;
        if self.diameter_pixels > reference_diameter {
            log::warn!(
                "Working aperture ({:.2} px) is larger than the 1\" reference aperture ({:.2} px)",
                self.diameter_pixels,
                reference_diameter
            );
        }
        Ok(())
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
