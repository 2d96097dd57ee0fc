//! Pipeline configuration from environment variables

use std::env;
use std::time::Duration;

/// Retry policy for transient fetch failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1).
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub backoff_base_ms: u64,
    /// Ceiling on any single backoff delay.
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

/// Configuration for the fetch-and-aggregate pipeline
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// API key passed as the `key` query parameter. Optional: the Census
    /// API serves unkeyed requests at a reduced quota.
    pub api_key: Option<String>,

    /// Base URL of the statistical API.
    pub api_base: String,

    /// Path to the SQLite response cache file.
    pub cache_path: String,

    /// Minimum spacing between outgoing requests, shared across workers.
    pub min_request_interval: Duration,

    /// Retry policy for transient failures.
    pub retry: RetryPolicy,

    /// Per-attempt HTTP timeout.
    pub fetch_timeout: Duration,

    /// Overall deadline for a single pipeline run.
    pub run_timeout: Duration,

    /// Upper bound on concurrent fetch workers.
    pub max_concurrent_fetches: usize,

    /// Variable codes per API request (the Census API caps `get=` lists).
    pub batch_size: usize,

    /// Fail the run on unresolvable variables instead of skipping them.
    pub strict_variables: bool,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `CENSUSFLOW_API_KEY` (default: none)
    /// - `CENSUSFLOW_API_BASE` (default: https://api.census.gov/data)
    /// - `CENSUSFLOW_CACHE_PATH` (default: censusflow_cache.db)
    /// - `CENSUSFLOW_MIN_REQUEST_INTERVAL_MS` (default: 250)
    /// - `CENSUSFLOW_MAX_ATTEMPTS` (default: 4)
    /// - `CENSUSFLOW_BACKOFF_BASE_MS` (default: 500)
    /// - `CENSUSFLOW_BACKOFF_MAX_MS` (default: 30000)
    /// - `CENSUSFLOW_FETCH_TIMEOUT_MS` (default: 10000)
    /// - `CENSUSFLOW_RUN_TIMEOUT_MS` (default: 300000)
    /// - `CENSUSFLOW_MAX_CONCURRENT_FETCHES` (default: 4)
    /// - `CENSUSFLOW_BATCH_SIZE` (default: 48)
    /// - `CENSUSFLOW_STRICT_VARIABLES` (default: false)
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            api_key: env::var("CENSUSFLOW_API_KEY").ok(),

            api_base: env::var("CENSUSFLOW_API_BASE")
                .unwrap_or_else(|_| "https://api.census.gov/data".to_string()),

            cache_path: env::var("CENSUSFLOW_CACHE_PATH")
                .unwrap_or_else(|_| "censusflow_cache.db".to_string()),

            min_request_interval: Duration::from_millis(env_u64(
                "CENSUSFLOW_MIN_REQUEST_INTERVAL_MS",
                250,
            )),

            retry: RetryPolicy {
                max_attempts: env_u64("CENSUSFLOW_MAX_ATTEMPTS", 4) as u32,
                backoff_base_ms: env_u64("CENSUSFLOW_BACKOFF_BASE_MS", 500),
                backoff_max_ms: env_u64("CENSUSFLOW_BACKOFF_MAX_MS", 30_000),
            },

            fetch_timeout: Duration::from_millis(env_u64("CENSUSFLOW_FETCH_TIMEOUT_MS", 10_000)),

            run_timeout: Duration::from_millis(env_u64("CENSUSFLOW_RUN_TIMEOUT_MS", 300_000)),

            max_concurrent_fetches: env_u64("CENSUSFLOW_MAX_CONCURRENT_FETCHES", 4) as usize,

            batch_size: env_u64("CENSUSFLOW_BATCH_SIZE", 48) as usize,

            strict_variables: env::var("CENSUSFLOW_STRICT_VARIABLES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.census.gov/data".to_string(),
            cache_path: "censusflow_cache.db".to_string(),
            min_request_interval: Duration::from_millis(250),
            retry: RetryPolicy::default(),
            fetch_timeout: Duration::from_secs(10),
            run_timeout: Duration::from_secs(300),
            max_concurrent_fetches: 4,
            batch_size: 48,
            strict_variables: false,
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
