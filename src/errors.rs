use thiserror::Error;

/// Failures that abort an update attempt or a construction.
///
/// Expected pipeline outcomes (admission emptied the batch, diversity guard,
/// corridor violations, frozen gate) are not errors; see
/// [`crate::gate::Rejection`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GateError {
    /// Gauss-Jordan elimination met a pivot below the singularity floor.
    #[error("Singular matrix: pivot magnitude {pivot:e} below 1e-12")]
    SingularMatrix { pivot: f64 },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Batch and provenance must be index-aligned.
    #[error("Batch has {batch} samples but provenance has {provenance} entries")]
    LengthMismatch { batch: usize, provenance: usize },

    #[error("Dataset is empty")]
    EmptyDataset,

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Checkpoint history is empty")]
    EmptyCheckpointHistory,
}

pub type Result<T> = std::result::Result<T, GateError>;
