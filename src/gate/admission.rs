//! Admission control and the provenance diversity guard.
//!
//! Admission drops low-trust and non-finite samples and caps each source at
//! [`PER_SOURCE_CAP`] admissions per call. The cap is per call only; nothing
//! carries over between batches.
//!
//! The diversity guard then requires at least [`MIN_UNIQUE_SOURCES`] sources
//! *and* at least [`MIN_ENTROPY_BITS`] of Shannon entropy over them. Either
//! condition alone rejects.

use std::collections::HashMap;

use nalgebra::DVector;

use super::model::Provenance;
use crate::errors::{GateError, Result};

/// Samples with trust below this are dropped.
pub const MIN_TRUST: f64 = 0.3;

/// Max admissions per source within one call.
pub const PER_SOURCE_CAP: usize = 50;

pub const MIN_UNIQUE_SOURCES: usize = 3;

pub const MIN_ENTROPY_BITS: f64 = 1.5;

/// One admitted sample with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmittedSample {
    pub value: DVector<f64>,
    pub provenance: Provenance,
}

/// Filter a batch down to admissible samples.
///
/// # Errors
/// `LengthMismatch` when batch and provenance are not index-aligned,
/// `DimensionMismatch` when a sample is not `dimension` long.
pub fn admit(
    batch: &[DVector<f64>],
    provenance: &[Provenance],
    dimension: usize,
) -> Result<Vec<AdmittedSample>> {
    if batch.len() != provenance.len() {
        return Err(GateError::LengthMismatch {
            batch: batch.len(),
            provenance: provenance.len(),
        });
    }

    let mut per_source: HashMap<&str, usize> = HashMap::new();
    let mut admitted = Vec::with_capacity(batch.len().min(1024));

    for (x, p) in batch.iter().zip(provenance) {
        if x.len() != dimension {
            return Err(GateError::DimensionMismatch {
                expected: dimension,
                got: x.len(),
            });
        }
        // NaN trust fails this comparison and is dropped too
        if !(p.trust >= MIN_TRUST) {
            continue;
        }
        if x.iter().any(|v| !v.is_finite()) {
            continue;
        }
        let count = per_source.entry(p.source.as_str()).or_insert(0);
        if *count >= PER_SOURCE_CAP {
            continue;
        }
        *count += 1;
        admitted.push(AdmittedSample {
            value: x.clone(),
            provenance: p.clone(),
        });
    }

    Ok(admitted)
}

/// Source-mix statistics of an admitted set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Diversity {
    pub unique_sources: usize,
    /// Shannon entropy of source shares, bits.
    pub entropy_bits: f64,
    /// Sum of squared source shares.
    pub herfindahl: f64,
}

impl Diversity {
    /// Compute source-mix statistics by sample count.
    pub fn measure(samples: &[AdmittedSample]) -> Self {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for s in samples {
            *counts.entry(s.provenance.source.as_str()).or_insert(0) += 1;
        }

        let total = samples.len() as f64;
        let mut entropy_bits = 0.0;
        let mut herfindahl = 0.0;
        if total > 0.0 {
            for &c in counts.values() {
                let share = c as f64 / total;
                entropy_bits -= share * share.log2();
                herfindahl += share * share;
            }
        }

        Self {
            unique_sources: counts.len(),
            entropy_bits,
            herfindahl,
        }
    }

    /// True when the source mix clears both diversity floors.
    pub fn is_sufficient(&self) -> bool {
        self.unique_sources >= MIN_UNIQUE_SOURCES && self.entropy_bits >= MIN_ENTROPY_BITS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(v: f64) -> DVector<f64> {
        DVector::from_vec(vec![v, -v])
    }

    fn batch_from(sources: &[(&str, usize, f64)]) -> (Vec<DVector<f64>>, Vec<Provenance>) {
        let mut batch = Vec::new();
        let mut prov = Vec::new();
        for &(source, n, trust) in sources {
            for i in 0..n {
                batch.push(sample(i as f64));
                prov.push(Provenance::new(source, trust, i as u64));
            }
        }
        (batch, prov)
    }

    #[test]
    fn test_single_source_quota_is_exactly_fifty() {
        let (batch, prov) = batch_from(&[("feed-a", 1000, 1.0)]);
        let admitted = admit(&batch, &prov, 2).unwrap();
        assert_eq!(admitted.len(), 50);
        // First fifty in arrival order
        assert_eq!(admitted[49].value, sample(49.0));
    }

    #[test]
    fn test_quota_does_not_persist_across_calls() {
        let (batch, prov) = batch_from(&[("feed-a", 80, 1.0)]);
        assert_eq!(admit(&batch, &prov, 2).unwrap().len(), 50);
        assert_eq!(admit(&batch, &prov, 2).unwrap().len(), 50);
    }

    #[test]
    fn test_low_trust_dropped() {
        let (batch, prov) = batch_from(&[("ok", 10, 0.3), ("weak", 10, 0.29)]);
        let admitted = admit(&batch, &prov, 2).unwrap();
        assert_eq!(admitted.len(), 10);
        assert!(admitted.iter().all(|s| s.provenance.source == "ok"));
    }

    #[test]
    fn test_non_finite_samples_dropped() {
        let batch = vec![
            DVector::from_vec(vec![1.0, f64::NAN]),
            DVector::from_vec(vec![1.0, 2.0]),
            DVector::from_vec(vec![f64::INFINITY, 2.0]),
        ];
        let prov = vec![Provenance::new("a", 1.0, 0); 3];
        assert_eq!(admit(&batch, &prov, 2).unwrap().len(), 1);
    }

    #[test]
    fn test_everything_rejected_yields_empty() {
        let (batch, prov) = batch_from(&[("weak", 20, 0.1)]);
        assert!(admit(&batch, &prov, 2).unwrap().is_empty());
    }

    #[test]
    fn test_length_mismatch_is_error() {
        let (batch, mut prov) = batch_from(&[("a", 3, 1.0)]);
        prov.pop();
        assert_eq!(
            admit(&batch, &prov, 2),
            Err(GateError::LengthMismatch {
                batch: 3,
                provenance: 2
            })
        );
    }

    #[test]
    fn test_wrong_dimension_is_error() {
        let batch = vec![DVector::from_vec(vec![1.0, 2.0, 3.0])];
        let prov = vec![Provenance::new("a", 1.0, 0)];
        assert!(matches!(
            admit(&batch, &prov, 2),
            Err(GateError::DimensionMismatch { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn test_two_sources_never_sufficient() {
        // Two sources can reach at most 1 bit; the unique-source floor rejects regardless
        let (batch, prov) = batch_from(&[("a", 25, 1.0), ("b", 25, 1.0)]);
        let admitted = admit(&batch, &prov, 2).unwrap();
        let diversity = Diversity::measure(&admitted);
        assert_eq!(diversity.unique_sources, 2);
        assert!((diversity.entropy_bits - 1.0).abs() < 1e-12);
        assert!(!diversity.is_sufficient());
    }

    #[test]
    fn test_three_uniform_sources_sufficient() {
        let (batch, prov) = batch_from(&[("a", 10, 1.0), ("b", 10, 1.0), ("c", 10, 1.0)]);
        let diversity = Diversity::measure(&admit(&batch, &prov, 2).unwrap());
        assert!((diversity.entropy_bits - 3.0_f64.log2()).abs() < 1e-12);
        assert!((diversity.herfindahl - 1.0 / 3.0).abs() < 1e-12);
        assert!(diversity.is_sufficient());
    }

    #[test]
    fn test_skewed_sources_fail_entropy_floor() {
        // Three sources but one dominates: entropy well under 1.5 bits
        let (batch, prov) = batch_from(&[("a", 50, 1.0), ("b", 2, 1.0), ("c", 2, 1.0)]);
        let diversity = Diversity::measure(&admit(&batch, &prov, 2).unwrap());
        assert_eq!(diversity.unique_sources, 3);
        assert!(diversity.entropy_bits < MIN_ENTROPY_BITS);
        assert!(!diversity.is_sufficient());
    }

    #[test]
    fn test_empty_measure() {
        let diversity = Diversity::measure(&[]);
        assert_eq!(diversity.unique_sources, 0);
        assert_eq!(diversity.entropy_bits, 0.0);
        assert_eq!(diversity.herfindahl, 0.0);
    }
}
