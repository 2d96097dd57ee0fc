//! Aggregation: crosswalk join and statistically valid combination
//!
//! `rules` holds the combination math (sums with root-sum-of-squares
//! margins, recomputed ratios, interpolated medians); `engine` drives the
//! join/group/combine pass over a whole observation set.

pub mod engine;
pub mod rules;

pub use engine::{aggregate, AggregateOutput, VariablePlan};
pub use rules::{combine_sum, moe_for_ratio, weighted_median, Contribution, MoePolicy};
