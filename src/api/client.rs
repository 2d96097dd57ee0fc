//! Rate-limited statistical API client
//!
//! Issues tabulation requests against the survey API, pacing every
//! outgoing call through a shared [`RateLimiter`], retrying transient
//! failures (network errors, 5xx, 429) with exponential backoff, and
//! short-circuiting repeat requests through the response cache. Permanent
//! failures (other 4xx, responses that do not match the request) fail
//! immediately without retry.
//!
//! Two seams keep the client testable without a network:
//! - [`ApiTransport`] scripts the HTTP layer,
//! - [`TabularSource`] is what the orchestrator consumes, so whole-client
//!   substitutes are possible in pipeline tests.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::api::backoff::ExponentialBackoff;
use crate::api::cache::ResponseCache;
use crate::api::rate_limit::RateLimiter;
use crate::api::response;
use crate::config::{Config, RetryPolicy};
use crate::error::{Error, Result};
use crate::pipeline::CancelToken;
use crate::types::{DatasetDescriptor, Observation};
use crate::variables::ResolvedVariable;

/// One tabulation request: a dataset product plus a batch of machine
/// codes to pull in a single API call.
#[derive(Debug, Clone)]
pub struct TableRequest {
    pub descriptor: DatasetDescriptor,
    /// Estimate and margin codes, sorted and deduplicated.
    pub codes: Vec<String>,
}

impl TableRequest {
    pub fn new(descriptor: DatasetDescriptor, variables: &[ResolvedVariable]) -> Self {
        let mut codes: Vec<String> = variables
            .iter()
            .flat_map(|v| {
                std::iter::once(v.code.clone()).chain(v.moe_code.clone())
            })
            .collect();
        codes.sort();
        codes.dedup();
        Self { descriptor, codes }
    }

    /// Deterministic content address: the same product, geography, and
    /// variable set always map to the same key regardless of the order
    /// variables were requested in.
    pub fn cache_key(&self) -> String {
        let canonical = format!(
            "{}|{}|{}|{}|{}",
            self.descriptor.dataset,
            self.descriptor.year,
            self.descriptor.geo_level,
            self.descriptor.scope.in_clause(),
            self.codes.join(",")
        );
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }
}

/// Raw HTTP response as the client sees it.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// HTTP seam. The production transport is reqwest; tests script
/// responses. `Err` means a network-level failure (always transient).
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn get(&self, url: &str) -> std::result::Result<HttpResponse, String>;
}

/// reqwest-backed transport with a per-attempt timeout.
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidRequest(format!("http client construction: {}", e)))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ApiTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> std::result::Result<HttpResponse, String> {
        let resp = self.http.get(url).send().await.map_err(|e| e.to_string())?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| e.to_string())?;
        Ok(HttpResponse { status, body })
    }
}

/// Fetch seam consumed by the orchestrator.
#[async_trait]
pub trait TabularSource: Send + Sync {
    /// Fetch one batch of resolved variables for every source unit in
    /// the descriptor's scope.
    async fn fetch(
        &self,
        descriptor: &DatasetDescriptor,
        variables: &[ResolvedVariable],
        cancel: &CancelToken,
    ) -> Result<Vec<Observation>>;
}

enum AttemptOutcome {
    Success(String),
    Transient(String),
    Permanent(String),
}

/// Statistical API client with rate limiting, retry, and caching.
pub struct CensusApiClient {
    transport: Arc<dyn ApiTransport>,
    cache: Arc<dyn ResponseCache>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    api_base: String,
    api_key: Option<String>,
    bypass_cache: bool,
}

impl CensusApiClient {
    pub fn new(config: &Config, cache: Arc<dyn ResponseCache>) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(config.fetch_timeout)?);
        Ok(Self::with_transport(transport, cache, config))
    }

    /// Construct over a scripted transport. This is the test entry point
    /// and also what keeps concurrent runs isolated: each client carries
    /// its own limiter and retry policy, no global session state.
    pub fn with_transport(
        transport: Arc<dyn ApiTransport>,
        cache: Arc<dyn ResponseCache>,
        config: &Config,
    ) -> Self {
        Self {
            transport,
            cache,
            limiter: Arc::new(RateLimiter::new(config.min_request_interval)),
            retry: config.retry,
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            bypass_cache: false,
        }
    }

    /// Force refetching even when a cached payload exists. The fresh
    /// payload still will not overwrite the cached one unless the key was
    /// invalidated first.
    pub fn bypass_cache(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }

    fn request_url(&self, request: &TableRequest) -> String {
        let descriptor = &request.descriptor;
        let mut url = format!(
            "{}/{}/{}?get={}&for={}:*&in={}",
            self.api_base,
            descriptor.year,
            descriptor.dataset,
            request.codes.join(","),
            encode(descriptor.geo_level.for_clause()),
            encode(&descriptor.scope.in_clause()),
        );
        if let Some(key) = &self.api_key {
            url.push_str("&key=");
            url.push_str(key);
        }
        url
    }

    /// Fetch one raw payload, consulting the cache first.
    pub async fn fetch_table(&self, request: &TableRequest, cancel: &CancelToken) -> Result<String> {
        let key = request.cache_key();

        if !self.bypass_cache {
            if let Some(entry) = self.cache.get(&key).await? {
                log::debug!(
                    "cache hit for {} ({} codes)",
                    request.descriptor,
                    request.codes.len()
                );
                return Ok(entry.payload);
            }
        }

        let url = self.request_url(request);
        let mut backoff = ExponentialBackoff::from_policy(&self.retry);

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            self.limiter.acquire().await;

            match self.attempt(&url).await {
                AttemptOutcome::Success(body) => {
                    // Only fully received payloads reach the cache; a
                    // cancelled or failed attempt writes nothing.
                    self.cache.put(&key, &body).await?;
                    log::debug!("fetched {} ({} bytes)", request.descriptor, body.len());
                    return Ok(body);
                }
                AttemptOutcome::Permanent(cause) => {
                    log::error!("permanent fetch failure for {}: {}", request.descriptor, cause);
                    return Err(Error::InvalidRequest(cause));
                }
                AttemptOutcome::Transient(cause) => {
                    log::warn!("transient fetch failure for {}: {}", request.descriptor, cause);
                    if backoff.sleep().await.is_err() {
                        return Err(Error::Fetch {
                            cause,
                            attempts: backoff.attempts_made() + 1,
                        });
                    }
                }
            }
        }
    }

    async fn attempt(&self, url: &str) -> AttemptOutcome {
        match self.transport.get(url).await {
            Ok(resp) if (200..300).contains(&resp.status) => AttemptOutcome::Success(resp.body),
            Ok(resp) if resp.status == 429 || resp.status >= 500 => {
                AttemptOutcome::Transient(format!("status {}", resp.status))
            }
            Ok(resp) => AttemptOutcome::Permanent(format!(
                "status {}: {}",
                resp.status,
                truncate(&resp.body, 200)
            )),
            Err(cause) => AttemptOutcome::Transient(cause),
        }
    }
}

#[async_trait]
impl TabularSource for CensusApiClient {
    async fn fetch(
        &self,
        descriptor: &DatasetDescriptor,
        variables: &[ResolvedVariable],
        cancel: &CancelToken,
    ) -> Result<Vec<Observation>> {
        let request = TableRequest::new(descriptor.clone(), variables);
        let payload = self.fetch_table(&request, cancel).await?;
        response::parse_table(&payload, variables, descriptor.geo_level)
    }
}

fn encode(value: &str) -> String {
    value.replace(' ', "%20")
}

fn truncate(body: &str, limit: usize) -> &str {
    match body.char_indices().nth(limit) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
