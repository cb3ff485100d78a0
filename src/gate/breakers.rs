//! Circuit breakers over gate metrics.
//!
//! Five fixed breakers watch the running [`GateMetrics`]:
//!
//! | Breaker | Trips when | Action | Cooldown |
//! |---------|------------|--------|----------|
//! | `anchor_anomaly` | anchor anomaly rate > 1e-4 | rollback | 300 s |
//! | `provenance_concentration` | Herfindahl > 0.2 | freeze | 60 s |
//! | `kl_divergence_spike` | KL > 2 × `kl_threshold` | rollback | 600 s |
//! | `update_rejection_spike` | consecutive rejections > limit | alert | 300 s |
//! | `toxic_flow` | toxicity > 0.75 | freeze | 120 s |
//!
//! A breaker that fired is not re-evaluated until its cooldown has elapsed
//! since the last trigger.

use std::collections::HashMap;
use std::time::Duration;

use super::config::GateConfig;
use super::metrics::GateMetrics;

/// Anchor anomaly rate above which the adaptive model is considered detached.
pub const ANCHOR_ANOMALY_THRESHOLD: f64 = 1e-4;

/// Herfindahl index above which the source mix is too concentrated.
pub const CONCENTRATION_THRESHOLD: f64 = 0.2;

/// Multiple of `kl_threshold` that counts as a KL spike.
pub const KL_SPIKE_MULTIPLIER: f64 = 2.0;

/// Toxicity score above which incoming flow is considered toxic.
pub const TOXICITY_THRESHOLD: f64 = 0.75;

/// The fixed set of breakers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BreakerKind {
    AnchorAnomaly,
    ProvenanceConcentration,
    KlDivergenceSpike,
    UpdateRejectionSpike,
    ToxicFlow,
}

impl BreakerKind {
    /// All breakers in evaluation order.
    pub const ALL: [BreakerKind; 5] = [
        BreakerKind::AnchorAnomaly,
        BreakerKind::ProvenanceConcentration,
        BreakerKind::KlDivergenceSpike,
        BreakerKind::UpdateRejectionSpike,
        BreakerKind::ToxicFlow,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BreakerKind::AnchorAnomaly => "anchor_anomaly",
            BreakerKind::ProvenanceConcentration => "provenance_concentration",
            BreakerKind::KlDivergenceSpike => "kl_divergence_spike",
            BreakerKind::UpdateRejectionSpike => "update_rejection_spike",
            BreakerKind::ToxicFlow => "toxic_flow",
        }
    }

    pub fn action(&self) -> BreakerAction {
        match self {
            BreakerKind::AnchorAnomaly | BreakerKind::KlDivergenceSpike => BreakerAction::Rollback,
            BreakerKind::ProvenanceConcentration | BreakerKind::ToxicFlow => BreakerAction::Freeze,
            BreakerKind::UpdateRejectionSpike => BreakerAction::Alert,
        }
    }

    pub fn cooldown(&self) -> Duration {
        match self {
            BreakerKind::AnchorAnomaly => Duration::from_secs(300),
            BreakerKind::ProvenanceConcentration => Duration::from_secs(60),
            BreakerKind::KlDivergenceSpike => Duration::from_secs(600),
            BreakerKind::UpdateRejectionSpike => Duration::from_secs(300),
            BreakerKind::ToxicFlow => Duration::from_secs(120),
        }
    }

    /// Predicate over the current metrics.
    pub fn is_tripped(&self, metrics: &GateMetrics, config: &GateConfig) -> bool {
        match self {
            BreakerKind::AnchorAnomaly => metrics.anchor_anomaly_rate > ANCHOR_ANOMALY_THRESHOLD,
            BreakerKind::ProvenanceConcentration => {
                metrics.herfindahl_index > CONCENTRATION_THRESHOLD
            }
            BreakerKind::KlDivergenceSpike => {
                metrics.kl_divergence > KL_SPIKE_MULTIPLIER * config.kl_threshold
            }
            BreakerKind::UpdateRejectionSpike => {
                metrics.update_rejections > config.rejection_limit
            }
            BreakerKind::ToxicFlow => metrics.toxicity > TOXICITY_THRESHOLD,
        }
    }

    /// Value and threshold behind the predicate, for alert messages.
    fn reading(&self, metrics: &GateMetrics, config: &GateConfig) -> (f64, f64) {
        match self {
            BreakerKind::AnchorAnomaly => (metrics.anchor_anomaly_rate, ANCHOR_ANOMALY_THRESHOLD),
            BreakerKind::ProvenanceConcentration => {
                (metrics.herfindahl_index, CONCENTRATION_THRESHOLD)
            }
            BreakerKind::KlDivergenceSpike => (
                metrics.kl_divergence,
                KL_SPIKE_MULTIPLIER * config.kl_threshold,
            ),
            BreakerKind::UpdateRejectionSpike => (
                metrics.update_rejections as f64,
                config.rejection_limit as f64,
            ),
            BreakerKind::ToxicFlow => (metrics.toxicity, TOXICITY_THRESHOLD),
        }
    }
}

impl std::fmt::Display for BreakerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What the gate does when a breaker trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerAction {
    /// Restore the adaptive model from the newest checkpoint.
    Rollback,
    /// Refuse updates until the breaker's cooldown expires.
    Freeze,
    /// Notify only.
    Alert,
}

/// A breaker that fired during one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerTrip {
    pub kind: BreakerKind,
    pub action: BreakerAction,
    pub value: f64,
    pub threshold: f64,
    /// Clock time at which the cooldown ends.
    pub cooldown_until_ms: u64,
}

impl BreakerTrip {
    pub fn message(&self) -> String {
        format!(
            "{} tripped: {:.6} > {:.6} (action: {:?})",
            self.kind, self.value, self.threshold, self.action
        )
    }
}

/// Cooldown bookkeeping for the fixed breaker set.
#[derive(Debug, Clone, Default)]
pub struct BreakerRegistry {
    last_trigger_ms: HashMap<BreakerKind, u64>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `kind` has never fired or its cooldown has elapsed.
    pub fn is_armed(&self, kind: BreakerKind, now_ms: u64) -> bool {
        match self.last_trigger_ms.get(&kind) {
            None => true,
            Some(&last) => now_ms.saturating_sub(last) >= kind.cooldown().as_millis() as u64,
        }
    }

    pub fn last_trigger_ms(&self, kind: BreakerKind) -> Option<u64> {
        self.last_trigger_ms.get(&kind).copied()
    }

    /// Evaluate every armed breaker and record triggers at `now_ms`.
    pub fn evaluate(
        &mut self,
        metrics: &GateMetrics,
        config: &GateConfig,
        now_ms: u64,
    ) -> Vec<BreakerTrip> {
        let mut trips = Vec::new();
        for kind in BreakerKind::ALL {
            if !self.is_armed(kind, now_ms) {
                continue;
            }
            if !kind.is_tripped(metrics, config) {
                continue;
            }
            self.last_trigger_ms.insert(kind, now_ms);
            let (value, threshold) = kind.reading(metrics, config);
            trips.push(BreakerTrip {
                kind,
                action: kind.action(),
                value,
                threshold,
                cooldown_until_ms: now_ms + kind.cooldown().as_millis() as u64,
            });
        }
        trips
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calm() -> GateMetrics {
        GateMetrics {
            herfindahl_index: 0.1,
            ..Default::default()
        }
    }

    #[test]
    fn test_calm_metrics_trip_nothing() {
        let mut registry = BreakerRegistry::new();
        let trips = registry.evaluate(&calm(), &GateConfig::default(), 1_000);
        assert!(trips.is_empty());
    }

    #[test]
    fn test_each_predicate() {
        let cfg = GateConfig::default();
        let cases = [
            (
                BreakerKind::AnchorAnomaly,
                GateMetrics {
                    anchor_anomaly_rate: 0.01,
                    ..calm()
                },
            ),
            (
                BreakerKind::ProvenanceConcentration,
                GateMetrics {
                    herfindahl_index: 0.5,
                    ..calm()
                },
            ),
            (
                BreakerKind::KlDivergenceSpike,
                GateMetrics {
                    kl_divergence: 0.25,
                    ..calm()
                },
            ),
            (
                BreakerKind::UpdateRejectionSpike,
                GateMetrics {
                    update_rejections: 11,
                    ..calm()
                },
            ),
            (
                BreakerKind::ToxicFlow,
                GateMetrics {
                    toxicity: 0.8,
                    ..calm()
                },
            ),
        ];
        for (kind, metrics) in cases {
            assert!(kind.is_tripped(&metrics, &cfg), "{kind} should trip");
            let others: Vec<_> = BreakerKind::ALL
                .iter()
                .filter(|k| **k != kind && k.is_tripped(&metrics, &cfg))
                .collect();
            assert!(others.is_empty(), "{kind} case also tripped {:?}", others);
        }
    }

    #[test]
    fn test_thresholds_are_strict() {
        let cfg = GateConfig::default();
        let at_limit = GateMetrics {
            herfindahl_index: 0.2,
            kl_divergence: 0.2,
            update_rejections: 10,
            toxicity: 0.75,
            anchor_anomaly_rate: 1e-4,
            ..Default::default()
        };
        for kind in BreakerKind::ALL {
            assert!(!kind.is_tripped(&at_limit, &cfg), "{kind} tripped at its limit");
        }
    }

    #[test]
    fn test_actions_and_cooldowns() {
        assert_eq!(BreakerKind::AnchorAnomaly.action(), BreakerAction::Rollback);
        assert_eq!(BreakerKind::KlDivergenceSpike.action(), BreakerAction::Rollback);
        assert_eq!(BreakerKind::ProvenanceConcentration.action(), BreakerAction::Freeze);
        assert_eq!(BreakerKind::ToxicFlow.action(), BreakerAction::Freeze);
        assert_eq!(BreakerKind::UpdateRejectionSpike.action(), BreakerAction::Alert);

        assert_eq!(BreakerKind::AnchorAnomaly.cooldown(), Duration::from_secs(300));
        assert_eq!(BreakerKind::ProvenanceConcentration.cooldown(), Duration::from_secs(60));
        assert_eq!(BreakerKind::KlDivergenceSpike.cooldown(), Duration::from_secs(600));
        assert_eq!(BreakerKind::UpdateRejectionSpike.cooldown(), Duration::from_secs(300));
        assert_eq!(BreakerKind::ToxicFlow.cooldown(), Duration::from_secs(120));
    }

    #[test]
    fn test_cooldown_gates_reevaluation() {
        let cfg = GateConfig::default();
        let toxic = GateMetrics {
            toxicity: 0.9,
            ..calm()
        };
        let mut registry = BreakerRegistry::new();

        let trips = registry.evaluate(&toxic, &cfg, 10_000);
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].kind, BreakerKind::ToxicFlow);
        assert_eq!(trips[0].cooldown_until_ms, 130_000);
        assert_eq!(registry.last_trigger_ms(BreakerKind::ToxicFlow), Some(10_000));

        // Inside the 120 s cooldown: silent
        assert!(registry.evaluate(&toxic, &cfg, 129_999).is_empty());
        assert!(!registry.is_armed(BreakerKind::ToxicFlow, 129_999));

        // Cooldown elapsed: fires again
        let trips = registry.evaluate(&toxic, &cfg, 130_000);
        assert_eq!(trips.len(), 1);
        assert_eq!(registry.last_trigger_ms(BreakerKind::ToxicFlow), Some(130_000));
    }

    #[test]
    fn test_cooldowns_are_independent() {
        let cfg = GateConfig::default();
        let mut registry = BreakerRegistry::new();
        let toxic = GateMetrics {
            toxicity: 0.9,
            ..calm()
        };
        registry.evaluate(&toxic, &cfg, 0);

        let concentrated = GateMetrics {
            toxicity: 0.9,
            herfindahl_index: 0.9,
            ..Default::default()
        };
        let trips = registry.evaluate(&concentrated, &cfg, 1_000);
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].kind, BreakerKind::ProvenanceConcentration);
    }

    #[test]
    fn test_kl_spike_scales_with_config() {
        let metrics = GateMetrics {
            kl_divergence: 0.3,
            ..calm()
        };
        let tight = GateConfig::default();
        let loose = GateConfig::default().with_kl_threshold(0.2);
        assert!(BreakerKind::KlDivergenceSpike.is_tripped(&metrics, &tight));
        assert!(!BreakerKind::KlDivergenceSpike.is_tripped(&metrics, &loose));
    }

    #[test]
    fn test_display_uses_snake_case_name() {
        assert_eq!(format!("{}", BreakerKind::ToxicFlow), "toxic_flow");
        assert_eq!(
            BreakerKind::ProvenanceConcentration.to_string(),
            "provenance_concentration"
        );
    }
}
