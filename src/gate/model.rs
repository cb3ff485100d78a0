//! Model state, sample provenance and the immutable reference anchor.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{GateError, Result};
use crate::estimator::linalg::{invert, log_det, sym_power};
use crate::estimator::location::common_dimension;
use crate::estimator::mrcd::mrcd;

/// Shrinkage weight on the raw trimmed covariance of the golden set.
pub const REFERENCE_SHRINKAGE: f64 = 0.3;

/// One Gaussian model: mean, covariance and bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub mean: DVector<f64>,
    pub covariance: DMatrix<f64>,
    /// Clock time of the last merge, rollback or construction.
    pub last_update_ms: u64,
    /// Index of the checkpoint this state was captured as (or restored from).
    pub checkpoint_index: u64,
}

impl ModelState {
    pub fn new(mean: DVector<f64>, covariance: DMatrix<f64>, now_ms: u64) -> Self {
        Self {
            mean,
            covariance,
            last_update_ms: now_ms,
            checkpoint_index: 0,
        }
    }

    pub fn dimension(&self) -> usize {
        self.mean.len()
    }
}

/// Origin and trust of one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: String,
    /// Trust score in `[0, 1]`.
    pub trust: f64,
    pub timestamp_ms: u64,
}

impl Provenance {
    pub fn new(source: impl Into<String>, trust: f64, timestamp_ms: u64) -> Self {
        Self {
            source: source.into(),
            trust,
            timestamp_ms,
        }
    }
}

/// Reference model fitted once from the golden dataset.
///
/// Holds the factors every corridor check needs (precision, inverse square
/// root, log-determinant) so they are computed exactly once. Never mutated
/// after construction.
#[derive(Debug, Clone)]
pub struct ReferenceAnchor {
    golden: Vec<DVector<f64>>,
    model: ModelState,
    precision: DMatrix<f64>,
    inv_sqrt: DMatrix<f64>,
    log_det: f64,
}

impl ReferenceAnchor {
    /// Fit MRCD(golden, 0.3) shrunk toward identity and cache its factors.
    pub fn fit(golden: Vec<DVector<f64>>, now_ms: u64) -> Result<Self> {
        let d = common_dimension(&golden)?;
        if golden.iter().any(|x| x.iter().any(|v| !v.is_finite())) {
            return Err(GateError::InvalidConfig(
                "golden dataset contains non-finite values".to_string(),
            ));
        }

        let fit = mrcd(&golden, REFERENCE_SHRINKAGE, None, None)?;
        let precision = invert(&fit.covariance)?;
        let inv_sqrt = sym_power(&fit.covariance, -0.5);
        let log_det = log_det(&fit.covariance);

        info!(
            golden_samples = golden.len(),
            dimension = d,
            log_det = %format!("{:.4}", log_det),
            "Reference model fitted"
        );

        Ok(Self {
            golden,
            model: ModelState::new(fit.mean, fit.covariance, now_ms),
            precision,
            inv_sqrt,
            log_det,
        })
    }

    pub fn model(&self) -> &ModelState {
        &self.model
    }

    pub fn golden(&self) -> &[DVector<f64>] {
        &self.golden
    }

    pub fn precision(&self) -> &DMatrix<f64> {
        &self.precision
    }

    pub fn inv_sqrt(&self) -> &DMatrix<f64> {
        &self.inv_sqrt
    }

    pub fn log_det(&self) -> f64 {
        self.log_det
    }

    pub fn dimension(&self) -> usize {
        self.model.dimension()
    }
}
