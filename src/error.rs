//! Error taxonomy for the retrieval-and-aggregation pipeline
//!
//! Fatal conditions live here; recoverable conditions (coverage loss,
//! approximate medians, skipped variables in non-strict mode) travel as
//! [`crate::pipeline::Diagnostic`] values instead.

use std::fmt;

/// Errors surfaced by the fetcher, cache, resolver, and orchestrator.
#[derive(Debug)]
pub enum Error {
    /// Transient failure that survived every retry attempt.
    /// Fatal to the request that raised it, not to the whole run.
    Fetch { cause: String, attempts: u32 },

    /// Permanent request failure (non-429 4xx, malformed response,
    /// out-of-range year). Never retried.
    InvalidRequest(String),

    /// No machine code is registered for this logical variable in the
    /// requested dataset/year. Recoverable unless strict mode is set.
    UnknownVariable {
        name: String,
        dataset: String,
        year: u16,
    },

    /// Crosswalk construction failure (empty table, weight out of range).
    Crosswalk(String),

    /// The run exceeded its overall deadline.
    Timeout { elapsed_ms: u64 },

    /// The run was cancelled via its cancellation token.
    Cancelled,

    /// Response cache backend failure.
    Cache(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Fetch { cause, attempts } => {
                write!(f, "fetch failed after {} attempts: {}", attempts, cause)
            }
            Error::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
            Error::UnknownVariable {
                name,
                dataset,
                year,
            } => write!(
                f,
                "no code for variable '{}' in {} ({})",
                name, dataset, year
            ),
            Error::Crosswalk(msg) => write!(f, "crosswalk error: {}", msg),
            Error::Timeout { elapsed_ms } => {
                write!(f, "run timed out after {}ms", elapsed_ms)
            }
            Error::Cancelled => write!(f, "run cancelled"),
            Error::Cache(msg) => write!(f, "cache error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Cache(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Cache(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
