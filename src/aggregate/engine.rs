//! Aggregation engine: weighted crosswalk join plus per-rule combination
//!
//! Joins fetched observations to their crosswalk allocations, groups the
//! weighted contributions by (target, variable), and combines each group
//! with the rule its variable declares. Every target in the crosswalk
//! emits a row for every requested variable; targets nothing reached
//! report `coverage = None` with a null estimate, so callers can always
//! tell "zero" apart from "no data".

use std::collections::{BTreeSet, HashMap};

use crate::aggregate::rules::{
    combine_sum, moe_for_ratio, weighted_median, Contribution, MoePolicy,
};
use crate::crosswalk::Crosswalk;
use crate::pipeline::Diagnostic;
use crate::types::{AggregatedResult, Coverage, Observation};
use crate::variables::CombinationRule;

/// Per-variable aggregation instruction.
#[derive(Debug, Clone)]
pub struct VariablePlan {
    pub name: String,
    pub combination: CombinationRule,
    pub moe_policy: MoePolicy,
    /// False for variables pulled in only as ratio numerators or
    /// denominators: they are combined but not emitted as rows.
    pub emit: bool,
}

impl VariablePlan {
    pub fn new(name: impl Into<String>, combination: CombinationRule) -> Self {
        Self {
            name: name.into(),
            combination,
            moe_policy: MoePolicy::default(),
            emit: true,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.emit = false;
        self
    }
}

/// Aggregated rows plus the diagnostics produced along the way.
#[derive(Debug)]
pub struct AggregateOutput {
    pub rows: Vec<AggregatedResult>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Combine observations onto the crosswalk's target geography.
pub fn aggregate(
    observations: &[Observation],
    crosswalk: &Crosswalk,
    plan: &[VariablePlan],
) -> AggregateOutput {
    let mut diagnostics = Vec::new();

    // 1. Join: one weighted contribution per (variable, target).
    let mut groups: HashMap<(&str, &str), Vec<Contribution>> = HashMap::new();
    let mut uncovered: BTreeSet<&str> = BTreeSet::new();

    for obs in observations {
        match crosswalk.allocate(&obs.geo_id) {
            Some(allocations) => {
                for alloc in allocations {
                    groups
                        .entry((obs.variable.as_str(), alloc.target.as_str()))
                        .or_default()
                        .push(Contribution {
                            source_id: obs.geo_id.clone(),
                            weight: alloc.weight,
                            estimate: obs.estimate,
                            moe: obs.moe,
                        });
                }
            }
            None => {
                uncovered.insert(obs.geo_id.as_str());
            }
        }
    }

    for geo_id in uncovered {
        log::warn!("source unit {} absent from crosswalk, dropped", geo_id);
        diagnostics.push(Diagnostic::UncoveredGeography {
            geo_id: geo_id.to_string(),
        });
    }

    let targets: Vec<&str> = crosswalk.targets().collect();

    // 2. Sum and median variables first; their combined values feed the
    // ratio pass.
    let mut combined: HashMap<(&str, &str), (Option<f64>, Option<f64>)> = HashMap::new();
    let mut rows = Vec::new();

    for plan_var in plan {
        if matches!(plan_var.combination, CombinationRule::Ratio { .. }) {
            continue;
        }

        let mut any_approximate = false;

        for &target in &targets {
            let contributions = groups.get(&(plan_var.name.as_str(), target));

            let (estimate, moe, approximate, coverage) = match contributions {
                Some(contributions) => match plan_var.combination {
                    CombinationRule::Median => {
                        let estimate = weighted_median(contributions);
                        any_approximate |= estimate.is_some();
                        (estimate, None, estimate.is_some(), Coverage::Covered)
                    }
                    _ => {
                        let (estimate, moe) = combine_sum(contributions, plan_var.moe_policy);
                        (estimate, moe, false, Coverage::Covered)
                    }
                },
                None => (None, None, false, Coverage::None),
            };

            combined.insert((plan_var.name.as_str(), target), (estimate, moe));

            if plan_var.emit {
                rows.push(AggregatedResult {
                    target_id: target.to_string(),
                    variable: plan_var.name.clone(),
                    estimate,
                    moe,
                    approximate,
                    coverage,
                });
            }
        }

        if any_approximate {
            diagnostics.push(Diagnostic::ApproximateMedian {
                variable: plan_var.name.clone(),
            });
        }
    }

    // 3. Ratio variables recompute from combined numerators and
    // denominators, never from averaged percentages.
    for plan_var in plan {
        let (numerator, denominator, scale) = match &plan_var.combination {
            CombinationRule::Ratio {
                numerator,
                denominator,
                scale,
            } => (numerator.as_str(), denominator.as_str(), *scale),
            _ => continue,
        };

        for &target in &targets {
            let num = combined.get(&(numerator, target)).copied();
            let den = combined.get(&(denominator, target)).copied();

            let covered = num.is_some_and(|(e, _)| e.is_some())
                || den.is_some_and(|(e, _)| e.is_some());

            let (estimate, moe) = match (num, den) {
                (Some((Some(num_est), num_moe)), Some((Some(den_est), den_moe)))
                    if den_est != 0.0 =>
                {
                    let estimate = scale * num_est / den_est;
                    let moe = moe_for_ratio(num_est, den_est, num_moe, den_moe, plan_var.moe_policy)
                        .map(|m| m * scale);
                    (Some(estimate), moe)
                }
                _ => (None, None),
            };

            if plan_var.emit {
                rows.push(AggregatedResult {
                    target_id: target.to_string(),
                    variable: plan_var.name.clone(),
                    estimate,
                    moe,
                    approximate: false,
                    coverage: if covered {
                        Coverage::Covered
                    } else {
                        Coverage::None
                    },
                });
            }
        }
    }

    AggregateOutput { rows, diagnostics }
}
