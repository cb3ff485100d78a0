//! Influence clipping by Mahalanobis distance.
//!
//! Samples inside the radius pass through untouched. Samples outside are
//! pulled back along their residual onto the radius shell, so no single
//! point can sit further than `radius` from `mu` in the metric of `Σ`.

use nalgebra::{DMatrix, DVector};

use super::linalg::{invert, mahalanobis};
use crate::errors::{GateError, Result};

/// Clip `data` to Mahalanobis radius `radius` around `(mu, sigma)`.
pub fn influence_clip(
    data: &[DVector<f64>],
    mu: &DVector<f64>,
    sigma: &DMatrix<f64>,
    radius: f64,
) -> Result<Vec<DVector<f64>>> {
    if sigma.nrows() != mu.len() {
        return Err(GateError::DimensionMismatch {
            expected: mu.len(),
            got: sigma.nrows(),
        });
    }
    let precision = invert(sigma)?;
    clip_with_precision(data, mu, &precision, radius)
}

/// Same as [`influence_clip`] with the inverse covariance supplied.
pub fn clip_with_precision(
    data: &[DVector<f64>],
    mu: &DVector<f64>,
    precision: &DMatrix<f64>,
    radius: f64,
) -> Result<Vec<DVector<f64>>> {
    data.iter()
        .map(|x| {
            if x.len() != mu.len() {
                return Err(GateError::DimensionMismatch {
                    expected: mu.len(),
                    got: x.len(),
                });
            }
            let distance = mahalanobis(x, mu, precision);
            if distance <= radius {
                Ok(x.clone())
            } else {
                Ok(mu + (x - mu) * (radius / distance))
            }
        })
        .collect()
}
