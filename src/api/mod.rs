//! Statistical API access: client, pacing, retry, and response cache
//!
//! ```text
//! TableRequest → ResponseCache (hit?) → RateLimiter → ApiTransport
//!                                             ↑ retry via ExponentialBackoff
//! raw payload → response::parse_table → Vec<Observation>
//! ```

pub mod backoff;
pub mod cache;
pub mod client;
pub mod rate_limit;
pub mod response;

pub use backoff::ExponentialBackoff;
pub use cache::{CacheEntry, MemoryResponseCache, ResponseCache, SqliteResponseCache};
pub use client::{ApiTransport, CensusApiClient, HttpResponse, TableRequest, TabularSource};
pub use rate_limit::RateLimiter;
