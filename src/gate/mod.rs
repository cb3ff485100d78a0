//! Multi-model gate.
//!
//! Keeps an adaptive model that learns from incoming batches and a reference
//! model fitted once from a golden dataset, and only lets the adaptive model
//! move while its candidate stays inside a corridor around the reference.
//!
//! # Update pipeline
//!
//! ```text
//! batch + provenance
//!        │
//!        ▼
//!  ┌────────────┐ nothing left       ┌────────────────────┐
//!  │ admission  │ ─────────────────► │ AllSamplesRejected │
//!  └─────┬──────┘                    └────────────────────┘
//!        ▼
//!  ┌────────────┐ < 3 sources or     ┌───────────────────────┐
//!  │ diversity  │ ─ < 1.5 bits ────► │ InsufficientDiversity │
//!  └─────┬──────┘                    └───────────────────────┘
//!        ▼
//!  stratified sample ─► clip vs adaptive ─► Catoni mean + MRCD(prior = reference)
//!        │
//!        ▼
//!  ┌────────────┐ drift / spectral   ┌──────────────┐  streak > limit
//!  │  corridor  │ ─ / KL fails ────► │ GateViolation│ ───────────────► rollback
//!  └─────┬──────┘                    └──────────────┘
//!        ▼
//!  bounded merge ─► circuit breakers ─► periodic checkpoint ─► Accepted
//! ```
//!
//! Steps up to the corridor run against a snapshot of the adaptive model
//! without holding the state lock. The merge, breaker bookkeeping,
//! checkpointing and every metric or counter write happen under the lock,
//! after all fallible work for the step has succeeded, so an `Err` leaves
//! the gate untouched. Alerts are delivered once the lock is released.

pub mod admission;
pub mod alerts;
pub mod breakers;
pub mod checkpoint;
pub mod config;
pub mod metrics;
pub mod model;
pub mod outcome;
pub mod sampler;


pub use admission::{admit, AdmittedSample, Diversity};
pub use alerts::{Alert, AlertSink, ROLLBACK_ALERT};
pub use breakers::{BreakerAction, BreakerKind, BreakerRegistry, BreakerTrip};
pub use checkpoint::CheckpointHistory;
pub use config::GateConfig;
pub use metrics::GateMetrics;
pub use model::{ModelState, Provenance, ReferenceAnchor};
pub use outcome::{GateMode, Rejection, UpdateDecision, Violation};
pub use sampler::StratifiedSampler;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::clock::{MonotonicClock, TimeSource};
use crate::errors::{GateError, Result};
use crate::estimator::corridor::{kl_divergence_with_precision, spectral_check_whitened};
use crate::estimator::influence::clip_with_precision;
use crate::estimator::linalg::{convex_blend, invert, mahalanobis};
use crate::estimator::location::catoni_mean;
use crate::estimator::mrcd::mrcd;

/// Catoni influence scale for the candidate mean.
pub const CATONI_SCALE: f64 = 2.0;

pub const CATONI_MAX_ITERS: usize = 50;

/// MRCD weight on the raw candidate covariance; the rest is the reference.
pub const CANDIDATE_SHRINKAGE: f64 = 0.3;

/// Mahalanobis distance beyond which a golden point counts as anomalous.
pub const ANCHOR_CUTOFF: f64 = 9.0;

/// Per-source damping in `eta = 1 / (1 + 0.1 × sources)`.
pub const SOURCE_DAMPING: f64 = 0.1;

/// Mutable gate state. Guarded by a single mutex.
struct GateState {
    adaptive: ModelState,
    metrics: GateMetrics,
    checkpoints: CheckpointHistory,
    breakers: BreakerRegistry,
    mode: GateMode,
}

impl GateState {
    /// Remaining freeze time, clearing an expired freeze.
    fn frozen_remaining(&mut self, now_ms: u64) -> Option<u64> {
        match self.mode {
            GateMode::Frozen { until_ms } if now_ms < until_ms => Some(until_ms - now_ms),
            GateMode::Frozen { until_ms } => {
                info!(until_ms, now_ms, "Gate freeze expired");
                self.mode = GateMode::Live;
                None
            }
            GateMode::Live => None,
        }
    }

    /// Freeze until `until_ms`, extending any freeze already in place.
    fn freeze_until(&mut self, until_ms: u64) {
        let until_ms = match self.mode {
            GateMode::Frozen { until_ms: current } => current.max(until_ms),
            GateMode::Live => until_ms,
        };
        self.mode = GateMode::Frozen { until_ms };
    }

    fn capture(&mut self, now_ms: u64) -> u64 {
        let index = self.checkpoints.push(&self.adaptive, now_ms);
        self.adaptive.checkpoint_index = index;
        info!(
            checkpoint_index = index,
            retained = self.checkpoints.len(),
            capacity = self.checkpoints.capacity(),
            "Checkpoint captured"
        );
        index
    }

    /// Replace the adaptive model with the newest checkpoint.
    fn restore_latest(&mut self, reason: &str) -> Option<Alert> {
        let Some(snapshot) = self.checkpoints.latest().cloned() else {
            warn!(reason, "Rollback requested with empty checkpoint history, ignoring");
            return None;
        };
        let index = snapshot.checkpoint_index;
        self.adaptive = snapshot;
        warn!(checkpoint_index = index, reason, "Adaptive model rolled back");
        Some(Alert::new(
            ROLLBACK_ALERT,
            format!("adaptive model restored from checkpoint {index}: {reason}"),
        ))
    }
}

/// Metrics computed by one pipeline run, committed together under the lock.
#[derive(Debug, Default)]
struct StageMetrics {
    provenance_entropy: Option<f64>,
    herfindahl_index: Option<f64>,
    mean_drift: Option<f64>,
    spectral_norm: Option<f64>,
    kl_divergence: Option<f64>,
}

impl StageMetrics {
    fn apply(&self, metrics: &mut GateMetrics) {
        if let Some(v) = self.provenance_entropy {
            metrics.provenance_entropy = v;
        }
        if let Some(v) = self.herfindahl_index {
            metrics.herfindahl_index = v;
        }
        if let Some(v) = self.mean_drift {
            metrics.mean_drift = v;
        }
        if let Some(v) = self.spectral_norm {
            metrics.spectral_norm = v;
        }
        if let Some(v) = self.kl_divergence {
            metrics.kl_divergence = v;
        }
    }
}

/// Builder for [`MultiModelGate`].
pub struct GateBuilder {
    golden: Vec<DVector<f64>>,
    config: GateConfig,
    alert_sink: Option<Arc<dyn AlertSink>>,
    clock: Option<Arc<dyn TimeSource>>,
    seed: Option<u64>,
}

impl GateBuilder {
    pub fn config(mut self, config: GateConfig) -> Self {
        self.config = config;
        self
    }

    /// Receive breaker and rollback alerts.
    pub fn alert_sink<S: AlertSink + 'static>(mut self, sink: S) -> Self {
        self.alert_sink = Some(Arc::new(sink));
        self
    }

    /// Clock for cooldowns, freezes and checkpoint cadence. Defaults to a
    /// [`MonotonicClock`].
    pub fn time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Seed the sampler's generator. Unseeded gates draw from OS entropy.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Fit the reference model and seed the first checkpoint.
    ///
    /// # Errors
    /// `InvalidConfig` for out-of-range thresholds or non-finite golden data,
    /// `EmptyDataset`/`DimensionMismatch` for an unusable golden set, and
    /// `SingularMatrix` if the reference covariance cannot be inverted.
    pub fn build(self) -> Result<MultiModelGate> {
        self.config.validate().map_err(GateError::InvalidConfig)?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()) as Arc<dyn TimeSource>);
        let now = clock.now_ms();

        let anchor = ReferenceAnchor::fit(self.golden, now)?;
        let adaptive = anchor.model().clone();

        let mut state = GateState {
            adaptive,
            metrics: GateMetrics::default(),
            checkpoints: CheckpointHistory::new(self.config.checkpoint_capacity),
            breakers: BreakerRegistry::new(),
            mode: GateMode::Live,
        };
        state.capture(now);

        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        info!(
            dimension = anchor.dimension(),
            tau_mu = self.config.tau_mu,
            tau_sigma = self.config.tau_sigma,
            kl_threshold = self.config.kl_threshold,
            seeded = self.seed.is_some(),
            "Multi-model gate initialized"
        );

        Ok(MultiModelGate {
            anchor: Arc::new(anchor),
            config: self.config,
            sampler: StratifiedSampler::default(),
            state: Mutex::new(state),
            rng: Mutex::new(rng),
            alert_sink: self.alert_sink,
            clock,
        })
    }
}

/// Reference-anchored gate over an adaptive Gaussian model.
///
/// `Send + Sync`; share it behind an `Arc` and call [`robust_update`] from
/// any thread. Updates are serialized only around the commit.
///
/// [`robust_update`]: MultiModelGate::robust_update
pub struct MultiModelGate {
    anchor: Arc<ReferenceAnchor>,
    config: GateConfig,
    sampler: StratifiedSampler,
    state: Mutex<GateState>,
    rng: Mutex<StdRng>,
    alert_sink: Option<Arc<dyn AlertSink>>,
    clock: Arc<dyn TimeSource>,
}

impl MultiModelGate {
    /// Start building a gate anchored on `golden`.
    pub fn builder(golden: Vec<DVector<f64>>) -> GateBuilder {
        GateBuilder {
            golden,
            config: GateConfig::default(),
            alert_sink: None,
            clock: None,
            seed: None,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one batch through the gate.
    ///
    /// Expected outcomes (empty admission, weak diversity, corridor
    /// violation, active freeze) come back as [`UpdateDecision::Rejected`].
    ///
    /// # Errors
    /// `LengthMismatch` and `DimensionMismatch` for malformed input,
    /// `SingularMatrix` when a covariance cannot be inverted. No state is
    /// mutated on error.
    pub fn robust_update(
        &self,
        batch: &[DVector<f64>],
        provenance: &[Provenance],
    ) -> Result<UpdateDecision> {
        let now = self.clock.now_ms();

        let snapshot = {
            let mut state = self.lock_state();
            if let Some(remaining_ms) = state.frozen_remaining(now) {
                debug!(remaining_ms, "Update refused while frozen");
                return Ok(UpdateDecision::Rejected(Rejection::Frozen { remaining_ms }));
            }
            state.adaptive.clone()
        };

        // 1. Admission
        let admitted = admit(batch, provenance, self.anchor.dimension())?;
        if admitted.is_empty() {
            warn!(batch = batch.len(), "All samples rejected at admission");
            return Ok(UpdateDecision::Rejected(Rejection::AllSamplesRejected));
        }

        // 2. Diversity guard
        let diversity = Diversity::measure(&admitted);
        let mut stage = StageMetrics {
            provenance_entropy: Some(diversity.entropy_bits),
            herfindahl_index: Some(diversity.herfindahl),
            ..Default::default()
        };
        if !diversity.is_sufficient() {
            stage.apply(&mut self.lock_state().metrics);
            warn!(
                unique_sources = diversity.unique_sources,
                entropy_bits = %format!("{:.3}", diversity.entropy_bits),
                "Insufficient provenance diversity"
            );
            return Ok(UpdateDecision::Rejected(Rejection::InsufficientDiversity {
                unique_sources: diversity.unique_sources,
                entropy_bits: diversity.entropy_bits,
            }));
        }

        // 3. Stratified sampling
        let sampled = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            self.sampler.sample(&admitted, &mut *rng)
        };

        // 4. Clip against the current adaptive model
        let adaptive_precision = invert(&snapshot.covariance)?;
        let clipped = clip_with_precision(
            &sampled,
            &snapshot.mean,
            &adaptive_precision,
            self.config.clip_radius,
        )?;

        // 5. Re-estimate, shrinking toward the reference
        let candidate_mean = catoni_mean(&clipped, CATONI_SCALE, CATONI_MAX_ITERS)?;
        let candidate_cov = mrcd(
            &clipped,
            CANDIDATE_SHRINKAGE,
            Some(&self.anchor.model().covariance),
            None,
        )?
        .covariance;

        debug!(
            admitted = admitted.len(),
            sampled = sampled.len(),
            sampler_capacity = self.sampler.capacity(),
            unique_sources = diversity.unique_sources,
            "Candidate estimated"
        );

        // 6. Corridor
        if let Some(violation) = self.corridor_check(&candidate_mean, &candidate_cov, &mut stage)? {
            return Ok(self.record_violation(violation, &stage, now));
        }

        // 7-9. Merge, breakers, checkpoint
        self.commit(
            &candidate_mean,
            &candidate_cov,
            diversity.unique_sources,
            sampled.len(),
            &stage,
            now,
        )
    }

    /// Mean drift, then spectral band, then KL. Stops at the first failure.
    fn corridor_check(
        &self,
        mean: &DVector<f64>,
        cov: &DMatrix<f64>,
        stage: &mut StageMetrics,
    ) -> Result<Option<Violation>> {
        let reference = self.anchor.model();

        let distance = mahalanobis(mean, &reference.mean, self.anchor.precision());
        stage.mean_drift = Some(distance);
        if !(distance <= self.config.tau_mu) {
            return Ok(Some(Violation::MeanDrift {
                distance,
                bound: self.config.tau_mu,
            }));
        }

        let spectral = spectral_check_whitened(cov, self.anchor.inv_sqrt(), self.config.tau_sigma)?;
        stage.spectral_norm = Some(spectral.max_eigenvalue);
        if !spectral.passed {
            return Ok(Some(Violation::Spectral {
                min_eigenvalue: spectral.min_eigenvalue,
                max_eigenvalue: spectral.max_eigenvalue,
                tau: self.config.tau_sigma,
            }));
        }

        let kl = kl_divergence_with_precision(
            mean,
            cov,
            &reference.mean,
            self.anchor.precision(),
            self.anchor.log_det(),
        )?;
        stage.kl_divergence = Some(kl);
        if !(kl <= self.config.kl_threshold) {
            return Ok(Some(Violation::KlDivergence {
                kl,
                bound: self.config.kl_threshold,
            }));
        }

        Ok(None)
    }

    fn record_violation(
        &self,
        violation: Violation,
        stage: &StageMetrics,
        now: u64,
    ) -> UpdateDecision {
        let raised = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            // A concurrent update may have frozen the gate since the snapshot
            if let Some(remaining_ms) = state.frozen_remaining(now) {
                debug!(
                    remaining_ms,
                    violation = %violation,
                    "Violation dropped, gate frozen mid-update"
                );
                return UpdateDecision::Rejected(Rejection::Frozen { remaining_ms });
            }
            stage.apply(&mut state.metrics);
            state.metrics.update_rejections = state.metrics.update_rejections.saturating_add(1);
            state.metrics.total_rejections += 1;
            let streak = state.metrics.update_rejections;

            warn!(
                violation = %violation,
                consecutive = streak,
                total = state.metrics.total_rejections,
                "Candidate rejected by corridor check"
            );

            let mut raised = Vec::new();
            if streak > self.config.rejection_limit {
                let reason = format!(
                    "{streak} consecutive rejections exceed limit {}",
                    self.config.rejection_limit
                );
                raised.extend(state.restore_latest(&reason));
            }
            raised
        };

        alerts::dispatch(self.alert_sink.as_deref(), &raised);
        UpdateDecision::Rejected(Rejection::GateViolation(violation))
    }

    fn commit(
        &self,
        candidate_mean: &DVector<f64>,
        candidate_cov: &DMatrix<f64>,
        unique_sources: usize,
        samples: usize,
        stage: &StageMetrics,
        now: u64,
    ) -> Result<UpdateDecision> {
        let eta = (1.0 / (1.0 + SOURCE_DAMPING * unique_sources as f64)).min(self.config.eta_max);

        let raised = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            if let Some(remaining_ms) = state.frozen_remaining(now) {
                debug!(remaining_ms, "Merge refused, gate frozen mid-update");
                return Ok(UpdateDecision::Rejected(Rejection::Frozen { remaining_ms }));
            }

            let merged_mean = &state.adaptive.mean * (1.0 - eta) + candidate_mean * eta;
            let merged_cov = convex_blend(&state.adaptive.covariance, candidate_cov, eta);
            let merged_precision = invert(&merged_cov)?;
            let anomaly_rate = self.anchor_anomaly_rate(&merged_mean, &merged_precision);

            state.adaptive.mean = merged_mean;
            state.adaptive.covariance = merged_cov;
            state.adaptive.last_update_ms = now;
            stage.apply(&mut state.metrics);
            state.metrics.anchor_anomaly_rate = anomaly_rate;
            state.metrics.accepted_updates += 1;

            info!(
                eta = %format!("{:.4}", eta),
                samples,
                mean_drift = %format!("{:.4}", state.metrics.mean_drift),
                kl = %format!("{:.5}", state.metrics.kl_divergence),
                anchor_anomaly_rate = anomaly_rate,
                "Update merged into adaptive model"
            );

            let mut raised = Vec::new();
            for trip in state.breakers.evaluate(&state.metrics, &self.config, now) {
                warn!(
                    breaker = %trip.kind,
                    value = trip.value,
                    threshold = trip.threshold,
                    action = ?trip.action,
                    "Circuit breaker tripped"
                );
                raised.push(Alert::new(trip.kind.name(), trip.message()));
                match trip.action {
                    BreakerAction::Rollback => raised.extend(state.restore_latest(trip.kind.name())),
                    BreakerAction::Freeze => state.freeze_until(trip.cooldown_until_ms),
                    BreakerAction::Alert => {}
                }
            }
            state.metrics.update_rejections = 0;

            if state
                .checkpoints
                .is_due(now, self.config.checkpoint_interval_ms)
            {
                state.capture(now);
            }
            raised
        };

        alerts::dispatch(self.alert_sink.as_deref(), &raised);
        Ok(UpdateDecision::Accepted { eta, samples })
    }

    /// Fraction of golden points beyond [`ANCHOR_CUTOFF`] under `(mean, precision)`.
    fn anchor_anomaly_rate(&self, mean: &DVector<f64>, precision: &DMatrix<f64>) -> f64 {
        let golden = self.anchor.golden();
        let outside = golden
            .iter()
            .filter(|x| mahalanobis(x, mean, precision) > ANCHOR_CUTOFF)
            .count();
        outside as f64 / golden.len() as f64
    }

    /// Snapshot the adaptive model now, regardless of cadence.
    pub fn checkpoint(&self) -> u64 {
        let now = self.clock.now_ms();
        self.lock_state().capture(now)
    }

    /// Restore the adaptive model from the newest checkpoint.
    ///
    /// Returns `false` (after logging) when the history is empty.
    pub fn rollback(&self) -> bool {
        match self.try_rollback() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Rollback skipped");
                false
            }
        }
    }

    /// Like [`rollback`](Self::rollback) but reports an empty history.
    pub fn try_rollback(&self) -> Result<()> {
        let raised: Vec<Alert> = {
            let mut state = self.lock_state();
            if state.checkpoints.is_empty() {
                return Err(GateError::EmptyCheckpointHistory);
            }
            state.restore_latest("manual rollback").into_iter().collect()
        };
        alerts::dispatch(self.alert_sink.as_deref(), &raised);
        Ok(())
    }

    /// Set the externally computed flow-toxicity score read by `toxic_flow`.
    pub fn set_toxicity(&self, score: f64) {
        if !score.is_finite() {
            warn!(score, "Ignoring non-finite toxicity score");
            return;
        }
        self.lock_state().metrics.toxicity = score;
    }

    pub fn metrics(&self) -> GateMetrics {
        self.lock_state().metrics.clone()
    }

    /// Copies of `(adaptive, reference)`.
    pub fn models(&self) -> (ModelState, ModelState) {
        let adaptive = self.lock_state().adaptive.clone();
        (adaptive, self.anchor.model().clone())
    }

    /// Copies of the retained checkpoints, oldest first.
    pub fn checkpoint_history(&self) -> Vec<ModelState> {
        self.lock_state().checkpoints.snapshots()
    }

    /// Current mode; an expired freeze reads as `Live`.
    pub fn mode(&self) -> GateMode {
        let now = self.clock.now_ms();
        match self.lock_state().mode {
            GateMode::Frozen { until_ms } if now >= until_ms => GateMode::Live,
            mode => mode,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn dimension(&self) -> usize {
        self.anchor.dimension()
    }
}
