//! Statistical combination rules
//!
//! Margin-of-error propagation follows the ACS handbook formulas:
//! root-sum-of-squares for sums of independent estimates, the
//! proportion/ratio formulas for recomputed shares, and weighted linear
//! interpolation for medians. Agencies occasionally prescribe different
//! combination constants for specific table types; [`MoePolicy`] carries
//! a design factor so callers can override per variable instead of the
//! formula being hard-coded.

use std::cmp::Ordering;

/// One weighted contribution from a source unit to a target unit.
#[derive(Debug, Clone)]
pub struct Contribution {
    pub source_id: String,
    pub weight: f64,
    pub estimate: Option<f64>,
    pub moe: Option<f64>,
}

impl Contribution {
    pub fn new(source_id: impl Into<String>, weight: f64, estimate: f64, moe: f64) -> Self {
        Self {
            source_id: source_id.into(),
            weight,
            estimate: Some(estimate),
            moe: Some(moe),
        }
    }
}

/// Margin-of-error combination policy.
#[derive(Debug, Clone, Copy)]
pub struct MoePolicy {
    /// Multiplier applied to every combined margin. 1.0 is the standard
    /// root-sum-of-squares rule.
    pub design_factor: f64,
}

impl Default for MoePolicy {
    fn default() -> Self {
        Self { design_factor: 1.0 }
    }
}

/// Combined (estimate, margin) for sum-type variables.
///
/// estimate = Σ wᵢxᵢ over contributions with a present estimate;
/// margin = √Σ(wᵢmᵢ)² over contributions with a present margin. A target
/// fed only by null estimates (or null margins) yields None on that side
/// since null is not zero.
pub fn combine_sum(contributions: &[Contribution], policy: MoePolicy) -> (Option<f64>, Option<f64>) {
    let mut estimate_sum = 0.0;
    let mut saw_estimate = false;
    let mut moe_sq_sum = 0.0;
    let mut saw_moe = false;

    for c in contributions {
        if let Some(x) = c.estimate {
            estimate_sum += c.weight * x;
            saw_estimate = true;
        }
        if let Some(m) = c.moe {
            moe_sq_sum += (c.weight * m).powi(2);
            saw_moe = true;
        }
    }

    (
        saw_estimate.then_some(estimate_sum),
        saw_moe.then(|| policy.design_factor * moe_sq_sum.sqrt()),
    )
}

/// Margin for a recomputed share p = num/den.
///
/// Standard ACS proportion formula √(m_num² − p²·m_den²) / den; when the
/// radicand goes negative (possible with small denominators) the ratio
/// form √(m_num² + p²·m_den²) / den applies instead. Returns None when
/// the numerator margin is absent or the denominator is zero.
pub fn moe_for_ratio(
    numerator: f64,
    denominator: f64,
    moe_numerator: Option<f64>,
    moe_denominator: Option<f64>,
    policy: MoePolicy,
) -> Option<f64> {
    if denominator == 0.0 {
        return None;
    }
    let m_num = moe_numerator?;
    let m_den = moe_denominator.unwrap_or(0.0);

    let p = numerator / denominator;
    let radicand = m_num.powi(2) - p.powi(2) * m_den.powi(2);
    let combined = if radicand >= 0.0 {
        radicand.sqrt()
    } else {
        (m_num.powi(2) + p.powi(2) * m_den.powi(2)).sqrt()
    };

    Some(policy.design_factor * combined / denominator.abs())
}

/// Weighted median by linear interpolation across the contribution
/// distribution.
///
/// Medians cannot be exactly re-aggregated from grouped data; callers
/// must flag the result approximate. Contributions without an estimate
/// carry no information and are skipped.
pub fn weighted_median(contributions: &[Contribution]) -> Option<f64> {
    let mut points: Vec<(f64, f64)> = contributions
        .iter()
        .filter(|c| c.weight > 0.0)
        .filter_map(|c| c.estimate.map(|e| (e, c.weight)))
        .collect();

    if points.is_empty() {
        return None;
    }

    points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    let total: f64 = points.iter().map(|(_, w)| w).sum();
    let mut cumulative = 0.0;
    let mut previous: Option<(f64, f64)> = None; // (position, value)

    for (value, weight) in &points {
        // Each point represents the midpoint of its own weight mass.
        let position = (cumulative + weight / 2.0) / total;
        if position >= 0.5 {
            return Some(match previous {
                Some((prev_position, prev_value)) if position > prev_position => {
                    let t = (0.5 - prev_position) / (position - prev_position);
                    prev_value + t * (value - prev_value)
                }
                _ => *value,
            });
        }
        previous = Some((position, *value));
        cumulative += weight;
    }

    points.last().map(|(value, _)| *value)
}
