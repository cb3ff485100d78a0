//! Regularized trimmed covariance (MRCD-style).
//!
//! Concentration steps on the `h` samples closest to the current estimate,
//! with every covariance shrunk toward a trusted prior:
//!
//! ```text
//! Σ ← α·Σ_raw(h closest) + (1 − α)·Σ_prior
//! ```
//!
//! An adversary who controls part of the data can inflate the raw
//! eigenvalues, but only by a factor of α; the prior term stays put.
//! Unlike plain MRCD, which starts from the raw sample covariance, the
//! starting covariance here is shrunk the same way, so a degenerate batch
//! (e.g. all samples clipped onto one shell) never reaches inversion as a
//! singular matrix unless α = 1.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use super::linalg::{invert, mahalanobis, symmetrize};
use super::location::{common_dimension, coordinatewise_median, sample_mean};
use crate::errors::{GateError, Result};

/// Number of concentration rounds.
pub const MRCD_ROUNDS: usize = 10;

/// Mean and covariance from a robust fit.
#[derive(Debug, Clone, PartialEq)]
pub struct RobustEstimate {
    pub mean: DVector<f64>,
    pub covariance: DMatrix<f64>,
}

/// Sample covariance around `mean`, normalized by `n - 1`.
///
/// A single sample has no spread; the result is the zero matrix.
pub fn sample_covariance(data: &[DVector<f64>], mean: &DVector<f64>) -> DMatrix<f64> {
    let d = mean.len();
    let mut cov = DMatrix::<f64>::zeros(d, d);
    if data.len() < 2 {
        return cov;
    }
    for x in data {
        let r = x - mean;
        cov += &r * r.transpose();
    }
    symmetrize(&(cov / (data.len() - 1) as f64))
}

fn shrink(raw: &DMatrix<f64>, prior: &DMatrix<f64>, alpha: f64) -> DMatrix<f64> {
    raw * alpha + prior * (1.0 - alpha)
}

/// Robust mean and shrunk covariance.
///
/// # Arguments
/// * `alpha` - Weight on the raw trimmed covariance, in `[0, 1]`
/// * `prior` - Shrinkage target; identity when `None`
/// * `h` - Subset size kept each round; `n / 2` when `None`, clamped to `[1, n]`
pub fn mrcd(
    data: &[DVector<f64>],
    alpha: f64,
    prior: Option<&DMatrix<f64>>,
    h: Option<usize>,
) -> Result<RobustEstimate> {
    let d = common_dimension(data)?;
    if !(0.0..=1.0).contains(&alpha) {
        return Err(GateError::InvalidConfig(format!(
            "mrcd alpha must be in [0, 1], got {alpha}"
        )));
    }

    let prior = match prior {
        Some(p) if p.nrows() != d || p.ncols() != d => {
            return Err(GateError::DimensionMismatch {
                expected: d,
                got: p.nrows(),
            });
        }
        Some(p) => p.clone(),
        None => DMatrix::identity(d, d),
    };

    let n = data.len();
    let h = h.unwrap_or(n / 2).clamp(1, n);

    let mut mean = coordinatewise_median(data)?;
    let mut covariance = shrink(&sample_covariance(data, &mean), &prior, alpha);

    let mut ranked: Vec<(f64, usize)> = Vec::with_capacity(n);
    for _ in 0..MRCD_ROUNDS {
        let precision = invert(&covariance)?;

        ranked.clear();
        ranked.extend(
            data.iter()
                .enumerate()
                .map(|(i, x)| (mahalanobis(x, &mean, &precision), i)),
        );
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let subset: Vec<DVector<f64>> = ranked[..h].iter().map(|&(_, i)| data[i].clone()).collect();

        mean = sample_mean(&subset)?;
        covariance = shrink(&sample_covariance(&subset, &mean), &prior, alpha);
    }

    debug!(n, h, alpha, dimension = d, "MRCD fit complete");

    Ok(RobustEstimate { mean, covariance })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, StandardNormal};

    fn cluster_with_outliers() -> (Vec<DVector<f64>>, Vec<DVector<f64>>) {
        let mut rng = StdRng::seed_from_u64(21);
        let cluster: Vec<DVector<f64>> = (0..60)
            .map(|_| {
                DVector::from_fn(2, |_, _| {
                    let z: f64 = StandardNormal.sample(&mut rng);
                    0.1 * z
                })
            })
            .collect();
        let mut data = cluster.clone();
        for i in 0..40 {
            let angle = i as f64 * 0.3;
            data.push(DVector::from_vec(vec![
                500.0 * angle.cos(),
                500.0 * angle.sin(),
            ]));
        }
        (data, cluster)
    }

    #[test]
    fn test_sample_covariance_known_values() {
        let data = vec![
            DVector::from_vec(vec![1.0, 2.0]),
            DVector::from_vec(vec![3.0, 6.0]),
        ];
        let mean = sample_mean(&data).unwrap();
        let cov = sample_covariance(&data, &mean);
        assert!((cov[(0, 0)] - 2.0).abs() < 1e-12);
        assert!((cov[(1, 1)] - 8.0).abs() < 1e-12);
        assert!((cov[(0, 1)] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_alpha_one_is_trimmed_sample_covariance() {
        let (data, cluster) = cluster_with_outliers();
        let fit = mrcd(&data, 1.0, None, Some(cluster.len())).unwrap();

        let cluster_mean = sample_mean(&cluster).unwrap();
        let cluster_cov = sample_covariance(&cluster, &cluster_mean);

        assert!((&fit.mean - &cluster_mean).amax() < 1e-12);
        assert!((&fit.covariance - &cluster_cov).amax() < 1e-12);
    }

    #[test]
    fn test_alpha_zero_is_prior_exactly() {
        let (data, _) = cluster_with_outliers();
        let prior = DMatrix::from_row_slice(2, 2, &[2.0, 0.3, 0.3, 1.5]);
        let fit = mrcd(&data, 0.0, Some(&prior), None).unwrap();
        assert_eq!(fit.covariance, prior);
    }

    #[test]
    fn test_default_prior_is_identity() {
        let (data, _) = cluster_with_outliers();
        let fit = mrcd(&data, 0.0, None, None).unwrap();
        assert_eq!(fit.covariance, DMatrix::<f64>::identity(2, 2));
    }

    #[test]
    fn test_outliers_do_not_inflate_covariance() {
        let (data, _) = cluster_with_outliers();
        let fit = mrcd(&data, 0.3, None, None).unwrap();
        // 40% of points sit at radius 500; a plain covariance would be ~1e5
        assert!(fit.covariance.amax() < 1.0, "covariance inflated: {}", fit.covariance);
        assert!(fit.mean.norm() < 0.1);
    }

    #[test]
    fn test_prior_dimension_checked() {
        let (data, _) = cluster_with_outliers();
        let prior = DMatrix::<f64>::identity(3, 3);
        assert!(matches!(
            mrcd(&data, 0.3, Some(&prior), None),
            Err(GateError::DimensionMismatch { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn test_alpha_out_of_range() {
        let (data, _) = cluster_with_outliers();
        assert!(matches!(
            mrcd(&data, 1.5, None, None),
            Err(GateError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_degenerate_batch_survives_shrinkage() {
        // Every sample identical: raw covariance is zero, the prior keeps it invertible
        let data = vec![DVector::from_vec(vec![1.0, 1.0]); 20];
        let fit = mrcd(&data, 0.3, None, None).unwrap();
        assert!((fit.covariance[(0, 0)] - 0.7).abs() < 1e-12);
        assert_eq!(fit.mean, DVector::from_vec(vec![1.0, 1.0]));
    }
}
