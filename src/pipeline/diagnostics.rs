//! Diagnostic stream for degraded or skipped work
//!
//! Recoverable conditions surface here instead of as errors. The run
//! result carries the full stream so operators can see exactly which
//! units and variables were skipped, dropped, or approximated.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// Variable skipped: no machine code for this dataset/year.
    UnknownVariable {
        name: String,
        dataset: String,
        year: u16,
    },

    /// A variable batch exhausted its fetch retries; those variables are
    /// absent from the result.
    FetchFailed { variables: Vec<String>, cause: String },

    /// Source unit dropped: absent from the crosswalk.
    UncoveredGeography { geo_id: String },

    /// Source unit's allocation weights do not sum to 1.0.
    CoverageLoss { geo_id: String, weight_sum: f64 },

    /// Median combined by interpolation; affected rows carry
    /// `approximate = true`.
    ApproximateMedian { variable: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UnknownVariable {
                name,
                dataset,
                year,
            } => write!(f, "variable '{}' unavailable in {} ({}), skipped", name, dataset, year),
            Diagnostic::FetchFailed { variables, cause } => {
                write!(f, "fetch failed for [{}]: {}", variables.join(", "), cause)
            }
            Diagnostic::UncoveredGeography { geo_id } => {
                write!(f, "source unit {} not in crosswalk, dropped", geo_id)
            }
            Diagnostic::CoverageLoss { geo_id, weight_sum } => write!(
                f,
                "source unit {} allocation weights sum to {:.4}",
                geo_id, weight_sum
            ),
            Diagnostic::ApproximateMedian { variable } => {
                write!(f, "median '{}' combined by interpolation (approximate)", variable)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_the_unit() {
        let diag = Diagnostic::CoverageLoss {
            geo_id: "42101000100".to_string(),
            weight_sum: 0.82,
        };
        let rendered = diag.to_string();
        assert!(rendered.contains("42101000100"));
        assert!(rendered.contains("0.82"));
    }
}
