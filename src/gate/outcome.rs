//! Update decisions and gate mode.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result of one `robust_update` call that ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateDecision {
    /// Candidate passed the corridor and was merged.
    Accepted {
        /// Learning rate used for the merge.
        eta: f64,
        /// Samples that reached re-estimation.
        samples: usize,
    },
    Rejected(Rejection),
}

impl UpdateDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, UpdateDecision::Accepted { .. })
    }

    /// Human-readable rejection reason; `None` when accepted.
    pub fn reason(&self) -> Option<String> {
        match self {
            UpdateDecision::Accepted { .. } => None,
            UpdateDecision::Rejected(r) => Some(r.to_string()),
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            UpdateDecision::Accepted { .. } => None,
            UpdateDecision::Rejected(r) => Some(r),
        }
    }
}

/// Expected, non-exceptional reasons an update is not merged.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// Admission control left nothing.
    AllSamplesRejected,
    /// Fewer than 3 sources or under 1.5 bits of source entropy.
    InsufficientDiversity {
        unique_sources: usize,
        entropy_bits: f64,
    },
    /// Candidate left the corridor around the reference model.
    GateViolation(Violation),
    /// A freeze breaker is active.
    Frozen { remaining_ms: u64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::AllSamplesRejected => write!(f, "all samples rejected"),
            Rejection::InsufficientDiversity {
                unique_sources,
                entropy_bits,
            } => write!(
                f,
                "insufficient provenance diversity: {unique_sources} sources, {entropy_bits:.3} bits"
            ),
            Rejection::GateViolation(v) => write!(f, "gate violation: {v}"),
            Rejection::Frozen { remaining_ms } => {
                write!(f, "gate frozen for another {remaining_ms} ms")
            }
        }
    }
}

/// Which corridor check failed, with the measured value and its bound.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    MeanDrift {
        distance: f64,
        bound: f64,
    },
    Spectral {
        min_eigenvalue: f64,
        max_eigenvalue: f64,
        tau: f64,
    },
    KlDivergence {
        kl: f64,
        bound: f64,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::MeanDrift { distance, bound } => {
                write!(f, "mean drift {distance:.4} exceeds {bound:.4}")
            }
            Violation::Spectral {
                min_eigenvalue,
                max_eigenvalue,
                tau,
            } => write!(
                f,
                "spectral corridor: eigenvalues [{min_eigenvalue:.4}, {max_eigenvalue:.4}] outside [{:.4}, {:.4}]",
                1.0 - tau,
                1.0 + tau
            ),
            Violation::KlDivergence { kl, bound } => {
                write!(f, "KL divergence {kl:.4} exceeds {bound:.4}")
            }
        }
    }
}

/// Whether the gate accepts updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateMode {
    Live,
    /// Updates refused until the clock reaches `until_ms`.
    Frozen { until_ms: u64 },
}

impl GateMode {
    pub fn is_frozen(&self) -> bool {
        matches!(self, GateMode::Frozen { .. })
    }
}
