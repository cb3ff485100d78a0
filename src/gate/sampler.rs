//! Stratified trust-weighted sampler.
//!
//! Samples are grouped by source. Each stratum gets a quota proportional to
//! its aggregate trust:
//!
//! ```text
//! quota(s) = ⌈ trust(s) / trust(all) × capacity ⌉
//! ```
//!
//! Within a stratum, weighted reservoir sampling (Efraimidis–Spirakis) keeps
//! the `quota` samples with the largest keys `U^(1/trust)`, `U ~ Uniform(0,1)`.
//! Rounding up per stratum means the total can exceed `capacity` by at most
//! one sample per stratum.

use std::collections::BTreeMap;

use nalgebra::DVector;
use rand::Rng;

use super::admission::AdmittedSample;

/// Default total sample budget.
pub const SAMPLE_CAPACITY: usize = 200;

/// Groups admitted samples by source and draws a trust-weighted subset.
#[derive(Debug, Clone)]
pub struct StratifiedSampler {
    capacity: usize,
}

impl Default for StratifiedSampler {
    fn default() -> Self {
        Self::new(SAMPLE_CAPACITY)
    }
}

impl StratifiedSampler {
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Draw the stratified subset. Strata are visited in source-name order so
    /// a seeded generator gives a reproducible result.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        admitted: &[AdmittedSample],
        rng: &mut R,
    ) -> Vec<DVector<f64>> {
        let mut strata: BTreeMap<&str, Vec<&AdmittedSample>> = BTreeMap::new();
        for s in admitted {
            strata.entry(s.provenance.source.as_str()).or_default().push(s);
        }

        let total_trust: f64 = admitted.iter().map(|s| s.provenance.trust).sum();
        if !(total_trust > 0.0) {
            return Vec::new();
        }

        let mut selected = Vec::with_capacity(self.capacity + strata.len());
        for members in strata.values() {
            let stratum_trust: f64 = members.iter().map(|s| s.provenance.trust).sum();
            let quota = (stratum_trust / total_trust * self.capacity as f64).ceil() as usize;
            selected.extend(reservoir(members, quota, rng));
        }
        selected
    }
}

/// Keep the `quota` members with the largest `U^(1/trust)` keys.
fn reservoir<R: Rng + ?Sized>(
    members: &[&AdmittedSample],
    quota: usize,
    rng: &mut R,
) -> Vec<DVector<f64>> {
    if quota >= members.len() {
        return members.iter().map(|s| s.value.clone()).collect();
    }

    let mut keyed: Vec<(f64, usize)> = members
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let u: f64 = rng.gen();
            (u.powf(1.0 / s.provenance.trust), i)
        })
        .collect();
    keyed.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

    keyed
        .into_iter()
        .take(quota)
        .map(|(_, i)| members[i].value.clone())
        .collect()
}
