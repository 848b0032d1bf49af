//! Circular aperture photometry on 2-D grids.
//!
//! Pixel `(row, col)` covers the unit square centered on `(x = col, y = row)`.
//! How partially covered pixels contribute is set by [`ApertureMethod`]:
//!
//! - `Center`: a pixel counts fully if its center lies inside the circle
//! - `Subpixel`: each pixel is split into n×n sub-pixels, each counted by its center
//! - `Exact`: the analytic area of overlap between the circle and the pixel

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

/// How pixels straddling the aperture edge are weighted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApertureMethod {
    Center,
    Subpixel { subpixels: u32 },
    #[default]
    Exact,
}

/// A flux-summing primitive over circular apertures
pub trait AperturePhotometry: Sync {
    /// Precision mode used for every measurement made by this instance
    fn method(&self) -> ApertureMethod;

    /// Sum of `image` within a circle of `radius` pixels centered at `center = (x, y)`
    fn measure(&self, image: &ArrayView2<f64>, center: (f64, f64), radius: f64) -> f64;
}

/// Circular aperture sum with a fixed overlap policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CircularAperture {
    method: ApertureMethod,
}

impl CircularAperture {
    pub fn new(method: ApertureMethod) -> Self {
        Self { method }
    }
}

impl AperturePhotometry for CircularAperture {
    fn method(&self) -> ApertureMethod {
        self.method
    }

    fn measure(&self, image: &ArrayView2<f64>, center: (f64, f64), radius: f64) -> f64 {
        if radius <= 0.0 {
            return 0.0;
        }
        let (height, width) = image.dim();
        if height == 0 || width == 0 {
            return 0.0;
        }
        let (x_center, y_center) = center;

        // Pixels whose squares can touch the circle
        let x_min = (x_center - radius - 0.5).floor().max(0.0) as usize;
        let y_min = (y_center - radius - 0.5).floor().max(0.0) as usize;
        let x_max = (x_center + radius + 0.5).ceil().min((width - 1) as f64);
        let y_max = (y_center + radius + 0.5).ceil().min((height - 1) as f64);
        if x_max < 0.0 || y_max < 0.0 {
            return 0.0;
        }
        let (x_max, y_max) = (x_max as usize, y_max as usize);

        let mut sum = 0.0;
        for row in y_min..=y_max {
            for col in x_min..=x_max {
                let dx = col as f64 - x_center;
                let dy = row as f64 - y_center;
                let weight = pixel_fraction(self.method, dx, dy, radius);
                if weight > 0.0 {
                    sum += weight * image[[row, col]];
                }
            }
        }
        sum
    }
}

/// Fraction of the unit pixel centered at `(dx, dy)` (relative to the
/// aperture center) that lies within `radius`
pub fn pixel_fraction(method: ApertureMethod, dx: f64, dy: f64, radius: f64) -> f64 {
    match method {
        ApertureMethod::Center => {
            if dx * dx + dy * dy <= radius * radius {
                1.0
            } else {
                0.0
            }
        }
        ApertureMethod::Subpixel { subpixels } => {
            let n = subpixels.max(1);
            let step = 1.0 / n as f64;
            let r2 = radius * radius;
            let mut inside = 0u32;
            for i in 0..n {
                let sy = dy - 0.5 + (i as f64 + 0.5) * step;
                for j in 0..n {
                    let sx = dx - 0.5 + (j as f64 + 0.5) * step;
                    if sx * sx + sy * sy < r2 {
                        inside += 1;
                    }
                }
            }
            inside as f64 / (n * n) as f64
        }
        ApertureMethod::Exact => {
            circle_rect_overlap(dx - 0.5, dx + 0.5, dy - 0.5, dy + 0.5, radius)
        }
    }
}

/// ∫₀ˣ √(r² − t²) dt
fn circle_integral(x: f64, r: f64) -> f64 {
    let x = x.clamp(-r, r);
    0.5 * (x * (r * r - x * x).max(0.0).sqrt() + r * r * (x / r).asin())
}

/// Area of the circle above the line y = h (h ≥ 0) between x0 and x1
fn area_above(x0: f64, x1: f64, h: f64, r: f64) -> f64 {
    if h >= r {
        return 0.0;
    }
    let half_chord = (r * r - h * h).sqrt();
    let a = x0.clamp(-half_chord, half_chord);
    let b = x1.clamp(-half_chord, half_chord);
    circle_integral(b, r) - circle_integral(a, r) - h * (b - a)
}

/// Area of overlap between the origin-centered circle of radius `r` and the
/// rectangle `[x0, x1] × [y0, y1]`
fn circle_rect_overlap(x0: f64, x1: f64, y0: f64, y1: f64, r: f64) -> f64 {
    if y1 <= 0.0 {
        // Entirely below the x axis: mirror it
        circle_rect_overlap(x0, x1, -y1, -y0, r)
    } else if y0 < 0.0 {
        // Straddles the x axis: split at y = 0
        circle_rect_overlap(x0, x1, 0.0, -y0, r) + circle_rect_overlap(x0, x1, 0.0, y1, r)
    } else {
        area_above(x0, x1, y0, r) - area_above(x0, x1, y1, r)
    }
}
