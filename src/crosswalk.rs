//! Geographic crosswalk: source units to weighted target allocations
//!
//! Built once from a reference table of (source, target, weight) triples
//! and read-only afterwards. Weight computation (geometry intersection,
//! population interpolation) happens upstream; this module only consumes
//! the three-column contract, which keeps the aggregation engine
//! geometry-agnostic.

use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::pipeline::Diagnostic;

/// Per-source weight sums may deviate from 1.0 by this much before a
/// coverage warning is recorded.
pub const WEIGHT_TOLERANCE: f64 = 1e-3;

/// One allocation of a source unit to a target unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub target: String,
    pub weight: f64,
}

/// Reference-table row used for construction.
#[derive(Debug, Clone, PartialEq)]
pub struct CrosswalkRecord {
    pub source: String,
    pub target: String,
    pub weight: f64,
}

impl CrosswalkRecord {
    pub fn new(source: impl Into<String>, target: impl Into<String>, weight: f64) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            weight,
        }
    }
}

/// Mapping from source geography to target geography.
pub struct Crosswalk {
    allocations: HashMap<String, Vec<Allocation>>,
    targets: BTreeSet<String>,
    warnings: Vec<Diagnostic>,
}

impl Crosswalk {
    /// Build from reference records.
    ///
    /// Weights outside (0, 1] are construction errors. Per-source weight
    /// sums deviating from 1.0 beyond [`WEIGHT_TOLERANCE`] are recorded
    /// as coverage warnings and the unit proceeds with whatever weight it
    /// has; partial coverage at jurisdiction boundaries is expected.
    pub fn from_records(records: impl IntoIterator<Item = CrosswalkRecord>) -> Result<Self> {
        let mut allocations: HashMap<String, Vec<Allocation>> = HashMap::new();
        let mut targets = BTreeSet::new();
        // Insertion order of sources, for deterministic warning output.
        let mut source_order = Vec::new();

        for record in records {
            if !(record.weight > 0.0 && record.weight <= 1.0) {
                return Err(Error::Crosswalk(format!(
                    "weight {} for {} -> {} outside (0, 1]",
                    record.weight, record.source, record.target
                )));
            }

            targets.insert(record.target.clone());
            let entry = allocations.entry(record.source.clone()).or_default();
            if entry.is_empty() {
                source_order.push(record.source.clone());
            }
            entry.push(Allocation {
                target: record.target,
                weight: record.weight,
            });
        }

        if allocations.is_empty() {
            return Err(Error::Crosswalk("empty crosswalk table".to_string()));
        }

        let mut warnings = Vec::new();
        for source in &source_order {
            let weight_sum: f64 = allocations[source].iter().map(|a| a.weight).sum();
            if (weight_sum - 1.0).abs() > WEIGHT_TOLERANCE {
                log::warn!(
                    "crosswalk coverage loss for {}: weights sum to {:.4}",
                    source,
                    weight_sum
                );
                warnings.push(Diagnostic::CoverageLoss {
                    geo_id: source.clone(),
                    weight_sum,
                });
            }
        }

        Ok(Self {
            allocations,
            targets,
            warnings,
        })
    }

    /// Allocations for a source unit, in reference-table order. None
    /// means the unit falls outside the target jurisdiction.
    pub fn allocate(&self, source: &str) -> Option<&[Allocation]> {
        self.allocations.get(source).map(Vec::as_slice)
    }

    /// Every target unit, sorted. Aggregation emits a row for each of
    /// these whether or not any source data reached it.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().map(String::as_str)
    }

    /// Coverage warnings recorded at construction.
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    /// Number of source units.
    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_preserves_record_order() {
        let crosswalk = Crosswalk::from_records(vec![
            CrosswalkRecord::new("S1", "T2", 0.6),
            CrosswalkRecord::new("S1", "T1", 0.4),
        ])
        .unwrap();

        let allocs = crosswalk.allocate("S1").unwrap();
        assert_eq!(allocs[0].target, "T2");
        assert_eq!(allocs[1].target, "T1");
        assert!(crosswalk.warnings().is_empty());
    }

    #[test]
    fn test_unknown_source_is_none() {
        let crosswalk =
            Crosswalk::from_records(vec![CrosswalkRecord::new("S1", "T1", 1.0)]).unwrap();
        assert!(crosswalk.allocate("S9").is_none());
    }

    #[test]
    fn test_weight_sum_deviation_warns_but_builds() {
        let crosswalk = Crosswalk::from_records(vec![
            CrosswalkRecord::new("S1", "T1", 0.5),
            CrosswalkRecord::new("S1", "T2", 0.3),
            CrosswalkRecord::new("S2", "T1", 1.0),
        ])
        .unwrap();

        assert_eq!(crosswalk.warnings().len(), 1);
        match &crosswalk.warnings()[0] {
            Diagnostic::CoverageLoss { geo_id, weight_sum } => {
                assert_eq!(geo_id, "S1");
                assert!((weight_sum - 0.8).abs() < 1e-9);
            }
            other => panic!("unexpected diagnostic {other:?}"),
        }
    }

    #[test]
    fn test_weight_sum_within_tolerance_is_clean() {
        let crosswalk = Crosswalk::from_records(vec![
            CrosswalkRecord::new("S1", "T1", 0.3333),
            CrosswalkRecord::new("S1", "T2", 0.3333),
            CrosswalkRecord::new("S1", "T3", 0.3334),
        ])
        .unwrap();
        assert!(crosswalk.warnings().is_empty());
    }

    #[test]
    fn test_out_of_range_weight_is_error() {
        assert!(Crosswalk::from_records(vec![CrosswalkRecord::new("S1", "T1", 0.0)]).is_err());
        assert!(Crosswalk::from_records(vec![CrosswalkRecord::new("S1", "T1", 1.2)]).is_err());
        assert!(Crosswalk::from_records(vec![CrosswalkRecord::new("S1", "T1", -0.4)]).is_err());
    }

    #[test]
    fn test_empty_table_is_error() {
        assert!(Crosswalk::from_records(Vec::new()).is_err());
    }

    #[test]
    fn test_targets_sorted_and_deduplicated() {
        let crosswalk = Crosswalk::from_records(vec![
            CrosswalkRecord::new("S1", "T2", 1.0),
            CrosswalkRecord::new("S2", "T1", 0.5),
            CrosswalkRecord::new("S2", "T2", 0.5),
        ])
        .unwrap();

        let targets: Vec<&str> = crosswalk.targets().collect();
        assert_eq!(targets, vec!["T1", "T2"]);
        assert_eq!(crosswalk.len(), 2);
    }
}
