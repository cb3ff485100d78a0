//! Dense linear-algebra primitives for the robust estimators.
//!
//! Storage and products come from nalgebra. Inversion and the log-determinant
//! carry their own numerical floors because the corridor checks must fail
//! loudly on singular input rather than return garbage:
//!
//! ```text
//! invert:      Gauss-Jordan, partial pivoting, |pivot| < 1e-12  → SingularMatrix
//! log_det:     Σ ln max(|Uᵢᵢ|, 1e-10) over the LU factor
//! power:       V · diag(max(λ, 1e-10)^p) · Vᵀ
//! ```

use nalgebra::{DMatrix, DVector, SymmetricEigen};

use crate::errors::{GateError, Result};

/// Pivot magnitude below which a matrix is treated as singular.
pub const SINGULAR_PIVOT: f64 = 1e-12;

/// Floor applied to each |Uᵢᵢ| term of the log-determinant.
pub const LOG_DET_FLOOR: f64 = 1e-10;

/// Floor applied to eigenvalues before raising them to a power.
pub const EIGEN_FLOOR: f64 = 1e-10;

/// Invert a square matrix by Gauss-Jordan elimination with partial pivoting.
pub fn invert(m: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let n = m.nrows();
    if m.ncols() != n {
        return Err(GateError::DimensionMismatch {
            expected: n,
            got: m.ncols(),
        });
    }

    let mut a = m.clone();
    let mut inv = DMatrix::<f64>::identity(n, n);

    for col in 0..n {
        // Partial pivot: largest magnitude at or below the diagonal
        let mut pivot_row = col;
        let mut pivot_abs = a[(col, col)].abs();
        for row in (col + 1)..n {
            let candidate = a[(row, col)].abs();
            if candidate > pivot_abs {
                pivot_abs = candidate;
                pivot_row = row;
            }
        }

        if pivot_abs.is_nan() || pivot_abs < SINGULAR_PIVOT {
            return Err(GateError::SingularMatrix { pivot: pivot_abs });
        }

        if pivot_row != col {
            a.swap_rows(col, pivot_row);
            inv.swap_rows(col, pivot_row);
        }

        let pivot = a[(col, col)];
        for j in 0..n {
            a[(col, j)] /= pivot;
            inv[(col, j)] /= pivot;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[(row, col)];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                a[(row, j)] -= factor * a[(col, j)];
                inv[(row, j)] -= factor * inv[(col, j)];
            }
        }
    }

    Ok(inv)
}

/// Log-determinant from the diagonal of the LU factor.
///
/// Each |Uᵢᵢ| is floored at [`LOG_DET_FLOOR`], so near-singular input yields a
/// large negative value instead of `-inf`. The sign of the determinant is
/// ignored; callers pass covariance matrices.
pub fn log_det(m: &DMatrix<f64>) -> f64 {
    let u = m.clone().lu().u();
    u.diagonal()
        .iter()
        .map(|d| d.abs().max(LOG_DET_FLOOR).ln())
        .sum()
}

/// Raise a symmetric matrix to a real power via its eigendecomposition.
///
/// Eigenvalues are clamped to [`EIGEN_FLOOR`] first, so negative powers of
/// near-singular matrices stay finite.
pub fn sym_power(m: &DMatrix<f64>, p: f64) -> DMatrix<f64> {
    let eigen = SymmetricEigen::new(m.clone());
    let powered = eigen.eigenvalues.map(|v| v.max(EIGEN_FLOOR).powf(p));
    let d = DMatrix::from_diagonal(&powered);
    &eigen.eigenvectors * d * eigen.eigenvectors.transpose()
}

/// Eigenvalues of a symmetric matrix, ascending.
pub fn sym_eigenvalues(m: &DMatrix<f64>) -> Vec<f64> {
    let mut values: Vec<f64> = SymmetricEigen::new(m.clone())
        .eigenvalues
        .iter()
        .copied()
        .collect();
    values.sort_by(|a, b| a.total_cmp(b));
    values
}

/// Quadratic form `xᵀ P x`.
pub fn quadratic_form(x: &DVector<f64>, p: &DMatrix<f64>) -> f64 {
    x.dot(&(p * x))
}

/// Mahalanobis distance of `x` from `mu` under precision matrix `precision`.
pub fn mahalanobis(x: &DVector<f64>, mu: &DVector<f64>, precision: &DMatrix<f64>) -> f64 {
    let r = x - mu;
    quadratic_form(&r, precision).max(0.0).sqrt()
}

/// Element-wise convex combination `(1 - w)·a + w·b`.
pub fn convex_blend(a: &DMatrix<f64>, b: &DMatrix<f64>, w: f64) -> DMatrix<f64> {
    a * (1.0 - w) + b * w
}

/// Force exact symmetry by averaging with the transpose.
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}
