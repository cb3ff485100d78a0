//! Gate thresholds.

use serde::{Deserialize, Serialize};

/// Corridor thresholds and merge bounds for a [`super::MultiModelGate`].
///
/// Every field has a default, so a TOML file only needs the overrides:
///
/// ```toml
/// tau_mu = 0.4
/// kl_threshold = 0.05
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Max Mahalanobis distance of the candidate mean from the reference mean.
    pub tau_mu: f64,

    /// Half-width of the whitened eigenvalue band around 1.
    pub tau_sigma: f64,

    /// Max KL(candidate ‖ reference) in nats.
    pub kl_threshold: f64,

    /// Mahalanobis radius for influence clipping.
    pub clip_radius: f64,

    /// Upper bound on the merge learning rate.
    pub eta_max: f64,

    /// Learning-rate decay. Accepted for compatibility; the merge does not read it.
    pub eta_decay: f64,

    /// Minimum spacing between periodic checkpoints.
    pub checkpoint_interval_ms: u64,

    /// Snapshots retained for rollback (FIFO eviction).
    pub checkpoint_capacity: usize,

    /// Consecutive corridor failures tolerated before a forced rollback.
    pub rejection_limit: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            tau_mu: 0.5,
            tau_sigma: 0.15,
            kl_threshold: 0.1,
            clip_radius: 3.0,
            eta_max: 0.05,
            eta_decay: 0.995,
            checkpoint_interval_ms: 5 * 60 * 1000, // 5 minutes
            checkpoint_capacity: 20,
            rejection_limit: 10,
        }
    }
}

impl GateConfig {
    pub fn with_tau_mu(mut self, tau_mu: f64) -> Self {
        self.tau_mu = tau_mu;
        self
    }

    pub fn with_tau_sigma(mut self, tau_sigma: f64) -> Self {
        self.tau_sigma = tau_sigma;
        self
    }

    pub fn with_kl_threshold(mut self, kl_threshold: f64) -> Self {
        self.kl_threshold = kl_threshold;
        self
    }

    pub fn with_clip_radius(mut self, clip_radius: f64) -> Self {
        self.clip_radius = clip_radius;
        self
    }

    pub fn with_eta_max(mut self, eta_max: f64) -> Self {
        self.eta_max = eta_max;
        self
    }

    pub fn with_checkpoint_interval_ms(mut self, interval_ms: u64) -> Self {
        self.checkpoint_interval_ms = interval_ms;
        self
    }

    pub fn with_checkpoint_capacity(mut self, capacity: usize) -> Self {
        self.checkpoint_capacity = capacity;
        self
    }

    pub fn with_rejection_limit(mut self, limit: u32) -> Self {
        self.rejection_limit = limit;
        self
    }

    /// Validate field ranges. The error names the offending field.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.tau_mu > 0.0) || !self.tau_mu.is_finite() {
            return Err(format!("tau_mu must be finite and > 0.0, got {}", self.tau_mu));
        }
        if !(self.tau_sigma > 0.0 && self.tau_sigma < 1.0) {
            return Err(format!(
                "tau_sigma must be in (0.0, 1.0), got {}",
                self.tau_sigma
            ));
        }
        if !(self.kl_threshold > 0.0) || !self.kl_threshold.is_finite() {
            return Err(format!(
                "kl_threshold must be finite and > 0.0, got {}",
                self.kl_threshold
            ));
        }
        if !(self.clip_radius > 0.0) || !self.clip_radius.is_finite() {
            return Err(format!(
                "clip_radius must be finite and > 0.0, got {}",
                self.clip_radius
            ));
        }
        if !(self.eta_max > 0.0 && self.eta_max <= 1.0) {
            return Err(format!("eta_max must be in (0.0, 1.0], got {}", self.eta_max));
        }
        if !(self.eta_decay > 0.0 && self.eta_decay <= 1.0) {
            return Err(format!(
                "eta_decay must be in (0.0, 1.0], got {}",
                self.eta_decay
            ));
        }
        if self.checkpoint_capacity == 0 {
            return Err("checkpoint_capacity must be >= 1".to_string());
        }
        Ok(())
    }
}
