//! Core data model shared across the pipeline
//!
//! Everything downstream of the fetcher speaks these types; raw API
//! response shapes never leak past `api::response`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Geography level at which the source data is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeoLevel {
    Tract,
    BlockGroup,
    County,
}

impl GeoLevel {
    /// Value for the API's `for=` clause.
    pub fn for_clause(&self) -> &'static str {
        match self {
            GeoLevel::Tract => "tract",
            GeoLevel::BlockGroup => "block group",
            GeoLevel::County => "county",
        }
    }

    /// Geography component columns the API appends to each row, in the
    /// order they concatenate into a full geographic identifier.
    pub fn id_columns(&self) -> &'static [&'static str] {
        match self {
            GeoLevel::Tract => &["state", "county", "tract"],
            GeoLevel::BlockGroup => &["state", "county", "tract", "block group"],
            GeoLevel::County => &["state", "county"],
        }
    }
}

impl fmt::Display for GeoLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.for_clause())
    }
}

/// Geographic scope restricting which source units a request covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeoScope {
    /// State FIPS code, e.g. "42".
    pub state: String,
    /// County FIPS code, e.g. "101". None fetches the whole state.
    pub county: Option<String>,
}

impl GeoScope {
    pub fn state(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            county: None,
        }
    }

    pub fn county(state: impl Into<String>, county: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            county: Some(county.into()),
        }
    }

    /// Value for the API's `in=` clause.
    pub fn in_clause(&self) -> String {
        match &self.county {
            Some(county) => format!("state:{} county:{}", self.state, county),
            None => format!("state:{}", self.state),
        }
    }
}

/// Identifies a unique API product. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    /// Dataset path under the API base, e.g. "acs/acs5".
    pub dataset: String,
    /// Survey vintage year.
    pub year: u16,
    /// Source geography level the tabulation is published at.
    pub geo_level: GeoLevel,
    /// Geographic scope of the request.
    pub scope: GeoScope,
    /// Inclusive year span this product is published for, when known.
    /// Requests outside the span are rejected up front.
    pub available_years: Option<(u16, u16)>,
    /// Machine codes this product exposes, when known. Codes outside the
    /// set resolve like unknown variables.
    pub available_variables: Option<BTreeSet<String>>,
}

impl DatasetDescriptor {
    pub fn new(dataset: impl Into<String>, year: u16, geo_level: GeoLevel, scope: GeoScope) -> Self {
        Self {
            dataset: dataset.into(),
            year,
            geo_level,
            scope,
            available_years: None,
            available_variables: None,
        }
    }

    pub fn with_available_years(mut self, first: u16, last: u16) -> Self {
        self.available_years = Some((first, last));
        self
    }

    pub fn with_available_variables(mut self, codes: impl IntoIterator<Item = String>) -> Self {
        self.available_variables = Some(codes.into_iter().collect());
        self
    }
}

impl fmt::Display for DatasetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} @ {} ({})",
            self.dataset,
            self.year,
            self.geo_level,
            self.scope.in_clause()
        )
    }
}

/// One fetched value: a source unit's estimate for one logical variable.
///
/// `estimate` is None when the API returned a suppression sentinel for the
/// cell; `moe` is None when the variable carries no margin-of-error field
/// or the margin itself was suppressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub geo_id: String,
    pub variable: String,
    pub estimate: Option<f64>,
    pub moe: Option<f64>,
}

/// Whether a target unit received any contributing source data.
///
/// Distinct from the numeric value being zero: a covered target with all
/// zero contributions reports `Covered` with estimate 0.0, an uncovered
/// target reports `None` with estimate null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Coverage {
    Covered,
    None,
}

/// One combined value for one target unit and one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub target_id: String,
    pub variable: String,
    pub estimate: Option<f64>,
    pub moe: Option<f64>,
    /// True when the combination rule cannot reproduce the statistic
    /// exactly (median interpolation).
    pub approximate: bool,
    pub coverage: Coverage,
}
