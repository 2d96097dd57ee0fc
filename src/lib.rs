//! censusflow: survey tabulation retrieval and re-aggregation
//!
//! Fetches ACS/decennial-style tabulations published at fine geographic
//! units (tracts, block groups) and recombines them onto custom target
//! geographies (planning districts, council districts), propagating
//! margins of error through every aggregation step.
//!
//! ## Architecture
//!
//! ```text
//! VariableCatalog ──resolve──▶ variable batches
//!      ↓
//! Pipeline::run()
//!      ↓
//! CensusApiClient (shared rate limit · retry · response cache)
//!      ↓
//! Observations ──▶ Crosswalk join ──▶ aggregate() ──▶ ResultTable
//! ```
//!
//! The result table always distinguishes "zero value" from "no data"
//! from "approximate value"; recoverable degradations (skipped
//! variables, uncovered geographies, interpolated medians) travel in
//! the diagnostic stream rather than as errors.

pub mod aggregate;
pub mod api;
pub mod config;
pub mod crosswalk;
pub mod error;
pub mod pipeline;
pub mod types;
pub mod variables;

pub use aggregate::{MoePolicy, VariablePlan};
pub use api::{CensusApiClient, MemoryResponseCache, ResponseCache, SqliteResponseCache, TabularSource};
pub use config::{Config, RetryPolicy};
pub use crosswalk::{Crosswalk, CrosswalkRecord};
pub use error::{Error, Result};
pub use pipeline::{CancelToken, DatasetRequest, Diagnostic, Pipeline, ResultTable, RunState};
pub use types::{
    AggregatedResult, Coverage, DatasetDescriptor, GeoLevel, GeoScope, Observation,
};
pub use variables::{CombinationRule, ValueType, VariableCatalog, VariableDef, Vintage};
