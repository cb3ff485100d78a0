//! Corridor checks between a candidate Gaussian and a reference Gaussian.
//!
//! - **Spectral**: whiten the candidate covariance by the reference,
//!   `W = Σ_R^{-1/2} Σ_A Σ_R^{-1/2}`, and require every eigenvalue of `W`
//!   to lie in `[1 − τ, 1 + τ]`.
//! - **KL**: closed form for two Gaussians,
//!   `KL(c‖R) = ½[tr(Σ_R⁻¹Σ_c) + δᵀΣ_R⁻¹δ − d + ln det Σ_R − ln det Σ_c]`.
//!
//! The `*_whitened` / `*_with_precision` variants take reference-side
//! factors that the gate computes once at construction.

use nalgebra::{DMatrix, DVector};

use super::linalg::{invert, log_det, quadratic_form, sym_eigenvalues, sym_power, symmetrize};
use crate::errors::{GateError, Result};

/// Outcome of a spectral corridor check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralCheck {
    pub passed: bool,
    pub min_eigenvalue: f64,
    pub max_eigenvalue: f64,
}

fn check_square(m: &DMatrix<f64>, d: usize) -> Result<()> {
    if m.nrows() != d || m.ncols() != d {
        return Err(GateError::DimensionMismatch {
            expected: d,
            got: m.nrows(),
        });
    }
    Ok(())
}

/// Spectral corridor check of `sigma_a` against `sigma_r` with band `tau`.
pub fn spectral_corridor_check(
    sigma_a: &DMatrix<f64>,
    sigma_r: &DMatrix<f64>,
    tau: f64,
) -> Result<SpectralCheck> {
    check_square(sigma_r, sigma_a.nrows())?;
    let r_inv_sqrt = sym_power(sigma_r, -0.5);
    spectral_check_whitened(sigma_a, &r_inv_sqrt, tau)
}

/// Spectral check given the reference inverse square root `Σ_R^{-1/2}`.
pub fn spectral_check_whitened(
    sigma_a: &DMatrix<f64>,
    r_inv_sqrt: &DMatrix<f64>,
    tau: f64,
) -> Result<SpectralCheck> {
    check_square(sigma_a, r_inv_sqrt.nrows())?;
    let whitened = symmetrize(&(r_inv_sqrt * sigma_a * r_inv_sqrt));
    let eigenvalues = sym_eigenvalues(&whitened);

    let min_eigenvalue = eigenvalues.first().copied().unwrap_or(1.0);
    let max_eigenvalue = eigenvalues.last().copied().unwrap_or(1.0);
    let passed = min_eigenvalue >= 1.0 - tau && max_eigenvalue <= 1.0 + tau;

    Ok(SpectralCheck {
        passed,
        min_eigenvalue,
        max_eigenvalue,
    })
}

/// `KL(N(mu_p, sigma_p) ‖ N(mu_q, sigma_q))` in nats.
pub fn kl_divergence(
    mu_p: &DVector<f64>,
    sigma_p: &DMatrix<f64>,
    mu_q: &DVector<f64>,
    sigma_q: &DMatrix<f64>,
) -> Result<f64> {
    check_square(sigma_q, mu_q.len())?;
    let precision_q = invert(sigma_q)?;
    kl_divergence_with_precision(mu_p, sigma_p, mu_q, &precision_q, log_det(sigma_q))
}

/// KL divergence with the reference precision and log-determinant cached.
pub fn kl_divergence_with_precision(
    mu_p: &DVector<f64>,
    sigma_p: &DMatrix<f64>,
    mu_q: &DVector<f64>,
    precision_q: &DMatrix<f64>,
    log_det_q: f64,
) -> Result<f64> {
    let d = mu_q.len();
    if mu_p.len() != d {
        return Err(GateError::DimensionMismatch {
            expected: d,
            got: mu_p.len(),
        });
    }
    check_square(sigma_p, d)?;
    check_square(precision_q, d)?;

    let trace_term = (precision_q * sigma_p).trace();
    let delta = mu_q - mu_p;
    let mean_term = quadratic_form(&delta, precision_q);
    let log_det_ratio = log_det_q - log_det(sigma_p);

    Ok(0.5 * (trace_term + mean_term - d as f64 + log_det_ratio))
}
