//! Robust estimators.
//!
//! Stateless building blocks for the gate:
//! - **location**: coordinatewise median, bounded-influence (Catoni) mean,
//!   median-of-means
//! - **mrcd**: regularized trimmed covariance shrunk toward a prior
//! - **influence**: Mahalanobis influence clipping
//! - **corridor**: spectral corridor and Gaussian KL checks
//! - **linalg**: inversion, log-determinant, symmetric powers

pub mod corridor;
pub mod influence;
pub mod linalg;
pub mod location;
pub mod mrcd;

pub use corridor::{
    kl_divergence, kl_divergence_with_precision, spectral_check_whitened,
    spectral_corridor_check, SpectralCheck,
};
pub use influence::{clip_with_precision, influence_clip};
pub use linalg::{invert, log_det, mahalanobis, sym_power};
pub use location::{catoni_mean, coordinatewise_median, median_of_means, sample_mean};
pub use mrcd::{mrcd, sample_covariance, RobustEstimate};
