#![deny(unreachable_pub)]

// Core modules
pub mod clock;
pub mod errors;

// Feature modules
pub mod estimator;
pub mod gate;
pub mod infra;

// Re-exports
pub use clock::{ManualClock, MonotonicClock, TimeSource};
pub use errors::{GateError, Result};
pub use gate::{
    AlertSink, GateBuilder, GateConfig, GateMetrics, GateMode, ModelState, MultiModelGate,
    Provenance, Rejection, UpdateDecision, Violation,
};
