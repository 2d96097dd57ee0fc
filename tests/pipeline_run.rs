//! End-to-end pipeline tests over a mock tabular source
//!
//! These exercise the orchestrator's stage sequencing and failure
//! isolation without a network: the mock source answers from a canned
//! observation set and can be scripted to fail specific variables.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use censusflow::api::TabularSource;
use censusflow::error::{Error, Result};
use censusflow::{
    CancelToken, Config, Coverage, Crosswalk, CrosswalkRecord, DatasetDescriptor, DatasetRequest,
    Diagnostic, GeoLevel, GeoScope, Observation, Pipeline, VariableCatalog,
};
use censusflow::variables::ResolvedVariable;

/// Scriptable in-memory source.
struct MockSource {
    observations: Vec<Observation>,
    fail_variables: Vec<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockSource {
    fn new(observations: Vec<Observation>) -> Self {
        Self {
            observations,
            fail_variables: Vec::new(),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing(mut self, variable: &str) -> Self {
        self.fail_variables.push(variable.to_string());
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl TabularSource for MockSource {
    async fn fetch(
        &self,
        _descriptor: &DatasetDescriptor,
        variables: &[ResolvedVariable],
        cancel: &CancelToken,
    ) -> Result<Vec<Observation>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if variables
            .iter()
            .any(|v| self.fail_variables.contains(&v.logical))
        {
            return Err(Error::Fetch {
                cause: "scripted outage".to_string(),
                attempts: 4,
            });
        }

        let requested: HashSet<&str> = variables.iter().map(|v| v.logical.as_str()).collect();
        Ok(self
            .observations
            .iter()
            .filter(|o| requested.contains(o.variable.as_str()))
            .cloned()
            .collect())
    }
}

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn obs(geo_id: &str, variable: &str, estimate: f64, moe: f64) -> Observation {
    Observation {
        geo_id: geo_id.to_string(),
        variable: variable.to_string(),
        estimate: Some(estimate),
        moe: Some(moe),
    }
}

fn descriptor(year: u16) -> DatasetDescriptor {
    DatasetDescriptor::new(
        "acs/acs5",
        year,
        GeoLevel::Tract,
        GeoScope::county("42", "101"),
    )
}

/// Three tracts feeding two districts; tract T3 splits 60/40.
fn district_crosswalk() -> Arc<Crosswalk> {
    Arc::new(
        Crosswalk::from_records(vec![
            CrosswalkRecord::new("T1", "D1", 1.0),
            CrosswalkRecord::new("T2", "D2", 1.0),
            CrosswalkRecord::new("T3", "D1", 0.6),
            CrosswalkRecord::new("T3", "D2", 0.4),
        ])
        .unwrap(),
    )
}

fn pipeline_over(source: MockSource, config: Config) -> Pipeline {
    Pipeline::new(
        Arc::new(source),
        VariableCatalog::builtin(),
        district_crosswalk(),
        config,
    )
}

fn row<'a>(
    table: &'a censusflow::ResultTable,
    target: &str,
    variable: &str,
) -> &'a censusflow::AggregatedResult {
    table
        .rows
        .iter()
        .find(|r| r.target_id == target && r.variable == variable)
        .unwrap_or_else(|| panic!("no row for {target}/{variable}"))
}

#[tokio::test]
async fn test_full_run_aggregates_to_districts() {
    init_logs();
    let source = MockSource::new(vec![
        obs("T1", "total_population", 1000.0, 50.0),
        obs("T2", "total_population", 2000.0, 70.0),
        obs("T3", "total_population", 500.0, 30.0),
    ]);
    let pipeline = pipeline_over(source, Config::default());

    let request = DatasetRequest::new(descriptor(2019), ["total_population"]);
    let table = pipeline.run(&request).await.unwrap();

    let d1 = row(&table, "D1", "total_population");
    assert!((d1.estimate.unwrap() - 1300.0).abs() < 1e-9);
    let expected_moe = (50.0_f64.powi(2) + (0.6 * 30.0_f64).powi(2)).sqrt();
    assert!((d1.moe.unwrap() - expected_moe).abs() < 1e-9);
    assert_eq!(d1.coverage, Coverage::Covered);

    let d2 = row(&table, "D2", "total_population");
    assert!((d2.estimate.unwrap() - 2200.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_ratio_variable_pulls_leaves_and_recomputes() {
    let source = MockSource::new(vec![
        obs("T1", "below_poverty", 100.0, 20.0),
        obs("T1", "poverty_universe", 1000.0, 40.0),
        obs("T2", "below_poverty", 50.0, 10.0),
        obs("T2", "poverty_universe", 400.0, 25.0),
        obs("T3", "below_poverty", 30.0, 8.0),
        obs("T3", "poverty_universe", 200.0, 15.0),
    ]);
    let pipeline = pipeline_over(source, Config::default());

    let request = DatasetRequest::new(descriptor(2019), ["poverty_rate"]);
    let table = pipeline.run(&request).await.unwrap();

    // Only the requested ratio appears; its leaves stay hidden.
    assert!(table.rows.iter().all(|r| r.variable == "poverty_rate"));

    let d1 = row(&table, "D1", "poverty_rate");
    // D1: below = 100 + 0.6*30 = 118, universe = 1000 + 0.6*200 = 1120.
    let expected = 100.0 * 118.0 / 1120.0;
    assert!((d1.estimate.unwrap() - expected).abs() < 1e-9);
    assert!(d1.moe.is_some());
}

#[tokio::test]
async fn test_unknown_variable_skipped_in_non_strict_mode() {
    // B23025 has no 2009 vintage, so unemployment_rate cannot resolve.
    let source = MockSource::new(vec![
        obs("T1", "total_population", 1000.0, 50.0),
        obs("T2", "total_population", 2000.0, 70.0),
        obs("T3", "total_population", 500.0, 30.0),
    ]);
    let pipeline = pipeline_over(source, Config::default());

    let request = DatasetRequest::new(
        descriptor(2009),
        ["total_population", "unemployment_rate"],
    );
    let table = pipeline.run(&request).await.unwrap();

    assert!(table.rows.iter().any(|r| r.variable == "total_population"));
    assert!(!table.rows.iter().any(|r| r.variable == "unemployment_rate"));
    assert!(table.diagnostics.iter().any(|d| matches!(
        d,
        Diagnostic::UnknownVariable { name, year: 2009, .. } if name == "unemployment_rate"
    )));
}

#[tokio::test]
async fn test_unknown_variable_fails_in_strict_mode() {
    let source = MockSource::new(Vec::new());
    let config = Config {
        strict_variables: true,
        ..Config::default()
    };
    let pipeline = pipeline_over(source, config);

    let request = DatasetRequest::new(descriptor(2009), ["unemployment_rate"]);
    let err = pipeline.run(&request).await.unwrap_err();

    assert!(matches!(err, Error::UnknownVariable { year: 2009, .. }));
}

#[tokio::test]
async fn test_fetch_failure_isolated_to_its_batch() {
    init_logs();
    let source = MockSource::new(vec![
        obs("T1", "total_population", 1000.0, 50.0),
        obs("T2", "total_population", 2000.0, 70.0),
        obs("T3", "total_population", 500.0, 30.0),
    ])
    .failing("households");
    // batch_size 1 puts each variable in its own request.
    let config = Config {
        batch_size: 1,
        ..Config::default()
    };
    let pipeline = pipeline_over(source, config);

    let request = DatasetRequest::new(descriptor(2019), ["total_population", "households"]);
    let table = pipeline.run(&request).await.unwrap();

    assert!(table.rows.iter().any(|r| r.variable == "total_population"));
    assert!(!table.rows.iter().any(|r| r.variable == "households"));
    assert!(table.diagnostics.iter().any(|d| matches!(
        d,
        Diagnostic::FetchFailed { variables, .. } if variables.contains(&"households".to_string())
    )));
}

#[tokio::test]
async fn test_out_of_range_year_is_invalid_request() {
    let source = MockSource::new(Vec::new());
    let pipeline = Pipeline::new(
        Arc::new(source),
        VariableCatalog::builtin(),
        district_crosswalk(),
        Config::default(),
    );

    let descriptor = descriptor(2030).with_available_years(2009, 2023);
    let request = DatasetRequest::new(descriptor, ["total_population"]);
    let err = pipeline.run(&request).await.unwrap_err();

    assert!(matches!(err, Error::InvalidRequest(_)));
}

#[tokio::test]
async fn test_run_timeout_fails_the_run() {
    let source = MockSource::new(vec![obs("T1", "total_population", 1000.0, 50.0)])
        .slow(Duration::from_millis(200));
    let config = Config {
        run_timeout: Duration::from_millis(20),
        ..Config::default()
    };
    let pipeline = pipeline_over(source, config);

    let request = DatasetRequest::new(descriptor(2019), ["total_population"]);
    let err = pipeline.run(&request).await.unwrap_err();

    assert!(matches!(err, Error::Timeout { .. }));
}

#[tokio::test]
async fn test_cancellation_aborts_the_run() {
    let source = MockSource::new(vec![obs("T1", "total_population", 1000.0, 50.0)]);
    let pipeline = pipeline_over(source, Config::default());

    let cancel = CancelToken::new();
    cancel.cancel();

    let request = DatasetRequest::new(descriptor(2019), ["total_population"]);
    let err = pipeline.run_with_cancel(&request, &cancel).await.unwrap_err();

    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test]
async fn test_target_without_contributions_reports_no_data() {
    // Source data never mentions T2, so district D2 receives only the
    // T3 split and D3 (fed by nothing) reports no data at all.
    let crosswalk = Arc::new(
        Crosswalk::from_records(vec![
            CrosswalkRecord::new("T1", "D1", 1.0),
            CrosswalkRecord::new("T9", "D3", 1.0),
        ])
        .unwrap(),
    );
    let source = MockSource::new(vec![obs("T1", "total_population", 1000.0, 50.0)]);
    let pipeline = Pipeline::new(
        Arc::new(source),
        VariableCatalog::builtin(),
        crosswalk,
        Config::default(),
    );

    let request = DatasetRequest::new(descriptor(2019), ["total_population"]);
    let table = pipeline.run(&request).await.unwrap();

    let d3 = row(&table, "D3", "total_population");
    assert_eq!(d3.estimate, None);
    assert_eq!(d3.coverage, Coverage::None);

    let d1 = row(&table, "D1", "total_population");
    assert_eq!(d1.estimate, Some(1000.0));
    assert_eq!(d1.coverage, Coverage::Covered);
}

#[tokio::test]
async fn test_duplicate_request_variables_fetch_once() {
    let source = Arc::new(MockSource::new(vec![obs(
        "T1",
        "total_population",
        1000.0,
        50.0,
    )]));
    let pipeline = Pipeline::new(
        Arc::clone(&source) as Arc<dyn TabularSource>,
        VariableCatalog::builtin(),
        district_crosswalk(),
        Config::default(),
    );

    let request = DatasetRequest::new(
        descriptor(2019),
        ["total_population", "total_population", "total_population"],
    );
    let table = pipeline.run(&request).await.unwrap();

    // Mentions coalesce into a single request and one row per target.
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    let mentions = table
        .rows
        .iter()
        .filter(|r| r.variable == "total_population")
        .count();
    assert_eq!(mentions, 2);
}
