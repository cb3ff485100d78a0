//! Running gate metrics.

use serde::{Deserialize, Serialize};

/// Snapshot of the most recent pipeline measurements.
///
/// Each field holds the last value computed; a check that was not reached in
/// the latest update keeps its previous value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateMetrics {
    /// Mahalanobis distance of the last candidate mean from the reference mean.
    pub mean_drift: f64,
    /// Largest eigenvalue of the last whitened candidate covariance.
    pub spectral_norm: f64,
    /// KL(candidate ‖ reference) of the last candidate, nats.
    pub kl_divergence: f64,
    /// Shannon entropy (bits) of admitted sources.
    pub provenance_entropy: f64,
    /// Sum of squared admitted-source shares.
    pub herfindahl_index: f64,
    /// Fraction of golden points outside the anchor cutoff under the adaptive model.
    pub anchor_anomaly_rate: f64,
    /// Consecutive corridor failures; reset after an accepted update.
    pub update_rejections: u32,
    /// Externally supplied flow-toxicity score (VPIN-equivalent).
    pub toxicity: f64,
    /// Lifetime corridor failures.
    pub total_rejections: u64,
    /// Lifetime accepted merges.
    pub accepted_updates: u64,
}
