//! Test fixtures shared across the workspace.
//!
//! - Project and output directory discovery, so tests can leave artifacts
//!   under `<workspace>/test_output/` for manual inspection.
//! - Synthetic PSFEx-style basis planes: a Gaussian constant term plus
//!   small, seeded perturbations in the higher-order terms.
//!
//! ```rust
//! use test_helpers::{gaussian_plane, synthetic_basis_planes};
//!
//! let core = gaussian_plane(25, 2.0);
//! assert_eq!(core.dim(), (25, 25));
//!
//! let planes = synthetic_basis_planes(25, 2.0, 0.02, 7);
//! assert_eq!(planes.len(), 10);
//! ```

use ndarray::Array2;
use once_cell::sync::Lazy;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::env;
use std::path::{Path, PathBuf};

/// Number of basis planes in a degree-3 PSFEx model
pub const BASIS_PLANES: usize = 10;

#[derive(thiserror::Error, Debug)]
pub enum TestHelperError {
    #[error("Failed to find project root: {0}")]
    ProjectRootNotFound(String),
}

/// Walk up from the current directory to the Cargo.toml holding `[workspace]`
pub fn find_project_root() -> Result<PathBuf, TestHelperError> {
    let mut current_dir = env::current_dir().map_err(|e| {
        TestHelperError::ProjectRootNotFound(format!("Failed to get current directory: {e}"))
    })?;

    loop {
        let cargo_toml = current_dir.join("Cargo.toml");
        if cargo_toml.exists() {
            let content = std::fs::read_to_string(&cargo_toml).map_err(|e| {
                TestHelperError::ProjectRootNotFound(format!("Failed to read Cargo.toml: {e}"))
            })?;
            if content.contains("[workspace]") {
                return Ok(current_dir);
            }
        }

        if !current_dir.pop() {
            break;
        }
    }

    Err(TestHelperError::ProjectRootNotFound(
        "Workspace root not found".to_string(),
    ))
}

static PROJECT_ROOT: Lazy<PathBuf> =
    Lazy::new(|| find_project_root().expect("Failed to find project root directory"));

/// `<workspace>/test_output`, created on first use
pub fn get_output_dir() -> PathBuf {
    let output_dir = PROJECT_ROOT.join("test_output");
    if !output_dir.exists() {
        std::fs::create_dir_all(&output_dir).expect("Failed to create output directory");
    }
    output_dir
}

/// Path under the test output directory
pub fn output_path<P: AsRef<Path>>(path: P) -> PathBuf {
    get_output_dir().join(path)
}

/// Unit-peak circular Gaussian of width `sigma`, centered on pixel `(size / 2, size / 2)`
pub fn gaussian_plane(size: usize, sigma: f64) -> Array2<f64> {
    let c = (size / 2) as f64;
    let two_sigma2 = 2.0 * sigma * sigma;
    Array2::from_shape_fn((size, size), |(row, col)| {
        let r2 = (col as f64 - c).powi(2) + (row as f64 - c).powi(2);
        (-r2 / two_sigma2).exp()
    })
}

/// Ten basis planes: a Gaussian constant term and nine perturbation terms.
///
/// Each perturbation plane is the Gaussian scaled pixel-by-pixel by a random
/// factor in `[-amplitude, amplitude]`, so every reconstruction inside the
/// normalized domain stays positive for small amplitudes. The same `seed`
/// always yields the same planes.
pub fn synthetic_basis_planes(
    size: usize,
    sigma: f64,
    amplitude: f64,
    seed: u64,
) -> Vec<Array2<f64>> {
    let core = gaussian_plane(size, sigma);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut planes = Vec::with_capacity(BASIS_PLANES);
    planes.push(core.clone());
    for _ in 1..BASIS_PLANES {
        let plane = core.mapv(|v| v * rng.random_range(-amplitude..=amplitude));
        planes.push(plane);
    }
    planes
}
