//! Full-stack fetch tests: pipeline over the real client with a
//! scripted HTTP transport and a shared response cache.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use censusflow::api::{ApiTransport, HttpResponse, ResponseCache};
use censusflow::{
    CensusApiClient, Config, Crosswalk, CrosswalkRecord, DatasetDescriptor, DatasetRequest,
    GeoLevel, GeoScope, MemoryResponseCache, Pipeline, RetryPolicy, VariableCatalog,
};

const POPULATION_TABLE: &str = r#"[
    ["B01003_001E","B01003_001M","state","county","tract"],
    ["1000","50","42","101","000100"],
    ["2000","70","42","101","000200"]
]"#;

/// Transport that always serves the canned table and counts calls.
struct CountingTransport {
    calls: AtomicUsize,
}

impl CountingTransport {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ApiTransport for CountingTransport {
    async fn get(&self, _url: &str) -> Result<HttpResponse, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(HttpResponse {
            status: 200,
            body: POPULATION_TABLE.to_string(),
        })
    }
}

fn quick_config() -> Config {
    Config {
        min_request_interval: std::time::Duration::from_millis(1),
        retry: RetryPolicy {
            max_attempts: 2,
            backoff_base_ms: 1,
            backoff_max_ms: 2,
        },
        ..Config::default()
    }
}

fn descriptor() -> DatasetDescriptor {
    DatasetDescriptor::new(
        "acs/acs5",
        2019,
        GeoLevel::Tract,
        GeoScope::county("42", "101"),
    )
}

fn tract_crosswalk() -> Arc<Crosswalk> {
    Arc::new(
        Crosswalk::from_records(vec![
            CrosswalkRecord::new("42101000100", "D1", 1.0),
            CrosswalkRecord::new("42101000200", "D1", 1.0),
        ])
        .unwrap(),
    )
}

#[tokio::test]
async fn test_repeat_run_hits_cache_with_zero_network_calls() {
    let transport = Arc::new(CountingTransport::new());
    let cache = Arc::new(MemoryResponseCache::new());
    let client = CensusApiClient::with_transport(
        Arc::clone(&transport) as Arc<dyn ApiTransport>,
        Arc::clone(&cache) as Arc<dyn ResponseCache>,
        &quick_config(),
    );
    let pipeline = Pipeline::new(
        Arc::new(client),
        VariableCatalog::builtin(),
        tract_crosswalk(),
        quick_config(),
    );

    let request = DatasetRequest::new(descriptor(), ["total_population"]);

    let first = pipeline.run(&request).await.unwrap();
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

    let second = pipeline.run(&request).await.unwrap();
    // Identical request: the cache answers, the network stays quiet.
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

    assert_eq!(first.rows, second.rows);
    let d1 = &first.rows[0];
    assert_eq!(d1.target_id, "D1");
    assert_eq!(d1.estimate, Some(3000.0));
}

#[tokio::test]
async fn test_bypass_cache_refetches() {
    let transport = Arc::new(CountingTransport::new());
    let cache = Arc::new(MemoryResponseCache::new());
    let client = CensusApiClient::with_transport(
        Arc::clone(&transport) as Arc<dyn ApiTransport>,
        Arc::clone(&cache) as Arc<dyn ResponseCache>,
        &quick_config(),
    )
    .bypass_cache(true);
    let pipeline = Pipeline::new(
        Arc::new(client),
        VariableCatalog::builtin(),
        tract_crosswalk(),
        quick_config(),
    );

    let request = DatasetRequest::new(descriptor(), ["total_population"]);
    pipeline.run(&request).await.unwrap();
    pipeline.run(&request).await.unwrap();

    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cache_shared_across_clients() {
    let cache = Arc::new(MemoryResponseCache::new());

    let first_transport = Arc::new(CountingTransport::new());
    let first = CensusApiClient::with_transport(
        Arc::clone(&first_transport) as Arc<dyn ApiTransport>,
        Arc::clone(&cache) as Arc<dyn ResponseCache>,
        &quick_config(),
    );
    let pipeline = Pipeline::new(
        Arc::new(first),
        VariableCatalog::builtin(),
        tract_crosswalk(),
        quick_config(),
    );
    let request = DatasetRequest::new(descriptor(), ["total_population"]);
    pipeline.run(&request).await.unwrap();

    // A second client over the same cache never reaches its transport.
    let second_transport = Arc::new(CountingTransport::new());
    let second = CensusApiClient::with_transport(
        Arc::clone(&second_transport) as Arc<dyn ApiTransport>,
        Arc::clone(&cache) as Arc<dyn ResponseCache>,
        &quick_config(),
    );
    let pipeline = Pipeline::new(
        Arc::new(second),
        VariableCatalog::builtin(),
        tract_crosswalk(),
        quick_config(),
    );
    pipeline.run(&request).await.unwrap();

    assert_eq!(first_transport.calls.load(Ordering::SeqCst), 1);
    assert_eq!(second_transport.calls.load(Ordering::SeqCst), 0);
}
