//! Robust location estimators.
//!
//! ## Bounded-influence mean (Catoni-style)
//!
//! Starting from the coordinatewise median, each round reweights residuals
//! `r = x - μ` by
//!
//! ```text
//! w(r) = tanh(min(‖r‖/c, 3)) / ‖r‖        (w = 1 when ‖r‖ ≈ 0)
//! μ ← μ + Σ wᵢ rᵢ / Σ wᵢ
//! ```
//!
//! so any single sample moves the estimate by at most `tanh(3)` in the
//! numerator no matter how far away it sits.
//!
//! ## Median-of-means
//!
//! Shuffle, split into `k` blocks, average each block, take the coordinatewise
//! median of the block means. Breakdown point ≈ 0.5 − 1/(2k).

use nalgebra::DVector;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::trace;

use crate::errors::{GateError, Result};

/// Saturation point of the influence function, in units of `c`.
const CATONI_SATURATION: f64 = 3.0;

/// Residual norm below which a sample keeps unit weight.
const ZERO_RESIDUAL: f64 = 1e-12;

/// Convergence threshold on the Euclidean norm of one update step.
const CATONI_TOLERANCE: f64 = 1e-6;

/// Check that every sample shares one dimension; return it.
pub(crate) fn common_dimension(data: &[DVector<f64>]) -> Result<usize> {
    let first = data.first().ok_or(GateError::EmptyDataset)?;
    let d = first.len();
    for x in data {
        if x.len() != d {
            return Err(GateError::DimensionMismatch {
                expected: d,
                got: x.len(),
            });
        }
    }
    Ok(d)
}

fn median_of_sorted(values: &[f64]) -> f64 {
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Coordinatewise median. Even-sized inputs average the two middle values.
pub fn coordinatewise_median(data: &[DVector<f64>]) -> Result<DVector<f64>> {
    let d = common_dimension(data)?;
    let mut column = Vec::with_capacity(data.len());
    let median = DVector::from_fn(d, |j, _| {
        column.clear();
        column.extend(data.iter().map(|x| x[j]));
        column.sort_by(|a, b| a.total_cmp(b));
        median_of_sorted(&column)
    });
    Ok(median)
}

/// Arithmetic mean of a non-empty dataset.
pub fn sample_mean(data: &[DVector<f64>]) -> Result<DVector<f64>> {
    let d = common_dimension(data)?;
    let mut sum = DVector::zeros(d);
    for x in data {
        sum += x;
    }
    Ok(sum / data.len() as f64)
}

/// Bounded-influence mean.
///
/// # Arguments
/// * `c` - Scale at which residuals start to saturate
/// * `max_iters` - Upper bound on reweighting rounds
pub fn catoni_mean(data: &[DVector<f64>], c: f64, max_iters: usize) -> Result<DVector<f64>> {
    if !(c > 0.0) {
        return Err(GateError::InvalidConfig(format!(
            "catoni scale must be > 0, got {c}"
        )));
    }

    let mut mu = coordinatewise_median(data)?;
    let d = mu.len();

    for iteration in 0..max_iters {
        let mut weighted = DVector::<f64>::zeros(d);
        let mut total_weight = 0.0;

        for x in data {
            let r = x - &mu;
            let norm = r.norm();
            let w = if norm < ZERO_RESIDUAL {
                1.0
            } else {
                (norm / c).min(CATONI_SATURATION).tanh() / norm
            };
            weighted += r * w;
            total_weight += w;
        }

        if total_weight <= 0.0 {
            break;
        }

        let step = weighted / total_weight;
        let step_norm = step.norm();
        mu += step;

        if step_norm < CATONI_TOLERANCE {
            trace!(iteration, step_norm, "Catoni mean converged");
            break;
        }
    }

    Ok(mu)
}

/// Median-of-means over `k` random blocks.
///
/// `k` is clamped to `[1, n]`; leftover samples are spread over the first
/// blocks so block sizes differ by at most one.
pub fn median_of_means<R: Rng + ?Sized>(
    data: &[DVector<f64>],
    k: usize,
    rng: &mut R,
) -> Result<DVector<f64>> {
    common_dimension(data)?;
    let n = data.len();
    let k = k.clamp(1, n);

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);

    let base = n / k;
    let extra = n % k;
    let mut block_means = Vec::with_capacity(k);
    let mut start = 0;
    for b in 0..k {
        let len = base + usize::from(b < extra);
        let block: Vec<DVector<f64>> = order[start..start + len]
            .iter()
            .map(|&i| data[i].clone())
            .collect();
        block_means.push(sample_mean(&block)?);
        start += len;
    }

    coordinatewise_median(&block_means)
}
