//! Pipeline orchestrator
//!
//! Drives one request through resolve → fetch → crosswalk-join →
//! aggregate. Recoverable failures (unknown variables in non-strict
//! runs, exhausted fetch retries for one batch) are absorbed inside
//! their stage and reported through the diagnostic stream; invalid
//! requests, run timeouts, and cancellation fail the whole run.
//!
//! Fetches for independent variable batches run concurrently on a
//! bounded worker pool, all paced by the client's shared rate limiter.
//! Aggregation starts only after every batch has completed, since partial
//! data would silently under-count target units.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::aggregate::{aggregate, VariablePlan};
use crate::api::{TableRequest, TabularSource};
use crate::config::Config;
use crate::crosswalk::Crosswalk;
use crate::error::{Error, Result};
use crate::pipeline::{CancelToken, Diagnostic};
use crate::types::{AggregatedResult, DatasetDescriptor, Observation};
use crate::variables::{CombinationRule, ResolvedVariable, VariableCatalog};

/// Stages of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    ResolvingVariables,
    Fetching,
    Crosswalking,
    Aggregating,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Pending => "PENDING",
            RunState::ResolvingVariables => "RESOLVING_VARIABLES",
            RunState::Fetching => "FETCHING",
            RunState::Crosswalking => "CROSSWALKING",
            RunState::Aggregating => "AGGREGATING",
            RunState::Done => "DONE",
            RunState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// One pipeline request: a dataset product and the logical variables to
/// aggregate from it.
#[derive(Debug, Clone)]
pub struct DatasetRequest {
    pub descriptor: DatasetDescriptor,
    pub variables: Vec<String>,
}

impl DatasetRequest {
    pub fn new(
        descriptor: DatasetDescriptor,
        variables: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            descriptor,
            variables: variables.into_iter().map(Into::into).collect(),
        }
    }
}

/// Aggregated rows plus the diagnostic stream for one completed run.
#[derive(Debug)]
pub struct ResultTable {
    pub rows: Vec<AggregatedResult>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Orchestrates fetch-and-aggregate runs against one crosswalk.
///
/// Each run owns its intermediate tables; the only state shared between
/// concurrent runs is the response cache behind the source, whose writes
/// are idempotent.
pub struct Pipeline {
    source: Arc<dyn TabularSource>,
    catalog: VariableCatalog,
    crosswalk: Arc<Crosswalk>,
    config: Config,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn TabularSource>,
        catalog: VariableCatalog,
        crosswalk: Arc<Crosswalk>,
        config: Config,
    ) -> Self {
        Self {
            source,
            catalog,
            crosswalk,
            config,
        }
    }

    /// Run to completion or failure. The sole entry point surrounding
    /// tooling consumes.
    pub async fn run(&self, request: &DatasetRequest) -> Result<ResultTable> {
        self.run_with_cancel(request, &CancelToken::new()).await
    }

    /// Run with an external cancellation token, under the configured
    /// run-level deadline.
    pub async fn run_with_cancel(
        &self,
        request: &DatasetRequest,
        cancel: &CancelToken,
    ) -> Result<ResultTable> {
        let started = Instant::now();
        log_stage(RunState::Pending);
        log::info!(
            "run started: {} ({} variables)",
            request.descriptor,
            request.variables.len()
        );

        let outcome =
            tokio::time::timeout(self.config.run_timeout, self.execute(request, cancel)).await;

        match outcome {
            Ok(Ok(table)) => {
                log_stage(RunState::Done);
                log::info!(
                    "run done: {} rows, {} diagnostics in {}ms",
                    table.rows.len(),
                    table.diagnostics.len(),
                    started.elapsed().as_millis()
                );
                Ok(table)
            }
            Ok(Err(err)) => {
                log_stage(RunState::Failed);
                log::error!("run failed: {}", err);
                Err(err)
            }
            Err(_) => {
                let err = Error::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
                log_stage(RunState::Failed);
                log::error!("run failed: {}", err);
                Err(err)
            }
        }
    }

    async fn execute(&self, request: &DatasetRequest, cancel: &CancelToken) -> Result<ResultTable> {
        log_stage(RunState::ResolvingVariables);
        if let Some((first, last)) = request.descriptor.available_years {
            if !(first..=last).contains(&request.descriptor.year) {
                return Err(Error::InvalidRequest(format!(
                    "year {} outside {}'s available span {}-{}",
                    request.descriptor.year, request.descriptor.dataset, first, last
                )));
            }
        }
        let (mut plan, fetch_vars, mut diagnostics) = self.resolve_variables(request)?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        log_stage(RunState::Fetching);
        let (observations, fetch_diags, failed) = self
            .fetch_all(&request.descriptor, fetch_vars, cancel)
            .await?;
        diagnostics.extend(fetch_diags);
        if !failed.is_empty() {
            // Variables whose data never arrived are absent from the
            // result, as are ratios depending on them.
            plan.retain(|p| match &p.combination {
                CombinationRule::Ratio {
                    numerator,
                    denominator,
                    ..
                } => !failed.contains(numerator) && !failed.contains(denominator),
                _ => !failed.contains(&p.name),
            });
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        log_stage(RunState::Crosswalking);
        diagnostics.extend(self.crosswalk.warnings().iter().cloned());
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        log_stage(RunState::Aggregating);
        let output = aggregate(&observations, &self.crosswalk, &plan);
        diagnostics.extend(output.diagnostics);

        Ok(ResultTable {
            rows: output.rows,
            diagnostics,
        })
    }

    /// Resolve the requested logical variables against the dataset
    /// vintage. Ratio variables pull their numerator and denominator in
    /// as hidden plan entries so recomputation is always possible.
    fn resolve_variables(
        &self,
        request: &DatasetRequest,
    ) -> Result<(Vec<VariablePlan>, Vec<ResolvedVariable>, Vec<Diagnostic>)> {
        let descriptor = &request.descriptor;
        let mut plan: Vec<VariablePlan> = Vec::new();
        let mut fetch: BTreeMap<String, ResolvedVariable> = BTreeMap::new();
        let mut diagnostics = Vec::new();

        for name in &request.variables {
            // A leaf already planned hidden (as a ratio dependency)
            // becomes visible when requested directly.
            if let Some(existing) = plan.iter_mut().find(|p| p.name == *name) {
                existing.emit = true;
                continue;
            }

            let combination = match self.catalog.get(name) {
                Some(def) => def.combination.clone(),
                None => {
                    self.skip_unknown(name, descriptor, &mut diagnostics)?;
                    continue;
                }
            };

            match combination {
                CombinationRule::Ratio {
                    numerator,
                    denominator,
                    scale,
                } => {
                    let leaves = (
                        self.resolve_leaf(&numerator, descriptor),
                        self.resolve_leaf(&denominator, descriptor),
                    );
                    match leaves {
                        (Ok(num), Ok(den)) => {
                            for leaf in [num, den] {
                                if !plan.iter().any(|p| p.name == leaf.logical) {
                                    plan.push(
                                        VariablePlan::new(
                                            leaf.logical.clone(),
                                            leaf.combination.clone(),
                                        )
                                        .hidden(),
                                    );
                                }
                                fetch.entry(leaf.logical.clone()).or_insert(leaf);
                            }
                            plan.push(VariablePlan::new(
                                name.clone(),
                                CombinationRule::Ratio {
                                    numerator,
                                    denominator,
                                    scale,
                                },
                            ));
                        }
                        _ => self.skip_unknown(name, descriptor, &mut diagnostics)?,
                    }
                }
                rule => match self.resolve_leaf(name, descriptor) {
                    Ok(resolved) => {
                        plan.push(VariablePlan::new(name.clone(), rule));
                        fetch.entry(name.clone()).or_insert(resolved);
                    }
                    Err(_) => self.skip_unknown(name, descriptor, &mut diagnostics)?,
                },
            }
        }

        Ok((plan, fetch.into_values().collect(), diagnostics))
    }

    fn resolve_leaf(&self, name: &str, descriptor: &DatasetDescriptor) -> Result<ResolvedVariable> {
        let resolved = self
            .catalog
            .resolve(name, &descriptor.dataset, descriptor.year)?;
        if let Some(available) = &descriptor.available_variables {
            if !available.contains(&resolved.code) {
                return Err(Error::UnknownVariable {
                    name: name.to_string(),
                    dataset: descriptor.dataset.clone(),
                    year: descriptor.year,
                });
            }
        }
        Ok(resolved)
    }

    /// Unknown variable: strict runs abort, non-strict runs record a
    /// diagnostic and keep going.
    fn skip_unknown(
        &self,
        name: &str,
        descriptor: &DatasetDescriptor,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<()> {
        if self.config.strict_variables {
            return Err(Error::UnknownVariable {
                name: name.to_string(),
                dataset: descriptor.dataset.clone(),
                year: descriptor.year,
            });
        }
        log::warn!(
            "variable '{}' unavailable in {} ({}), skipped",
            name,
            descriptor.dataset,
            descriptor.year
        );
        diagnostics.push(Diagnostic::UnknownVariable {
            name: name.to_string(),
            dataset: descriptor.dataset.clone(),
            year: descriptor.year,
        });
        Ok(())
    }

    /// Fetch every variable batch on a bounded worker pool.
    ///
    /// Batches sharing a cache key are coalesced before dispatch, so the
    /// same request is never in flight twice within a run. Returns the
    /// merged observations, fetch diagnostics, and the names of
    /// variables whose batch exhausted its retries.
    async fn fetch_all(
        &self,
        descriptor: &DatasetDescriptor,
        variables: Vec<ResolvedVariable>,
        cancel: &CancelToken,
    ) -> Result<(Vec<Observation>, Vec<Diagnostic>, HashSet<String>)> {
        let batch_size = self.config.batch_size.max(1);
        let mut batches: Vec<Vec<ResolvedVariable>> = Vec::new();
        let mut seen_keys = HashSet::new();
        for chunk in variables.chunks(batch_size) {
            let key = TableRequest::new(descriptor.clone(), chunk).cache_key();
            if seen_keys.insert(key) {
                batches.push(chunk.to_vec());
            }
        }

        let mut observations = Vec::new();
        let mut diagnostics = Vec::new();
        let mut failed = HashSet::new();

        let limit = self.config.max_concurrent_fetches.max(1);
        let mut pending = batches.into_iter();
        let mut workers: JoinSet<(Vec<String>, Result<Vec<Observation>>)> = JoinSet::new();

        for _ in 0..limit {
            match pending.next() {
                Some(batch) => self.spawn_fetch(&mut workers, descriptor, batch, cancel),
                None => break,
            }
        }

        // Barrier: every batch completes before aggregation may start.
        while let Some(joined) = workers.join_next().await {
            let (names, result) = joined.map_err(|e| Error::Fetch {
                cause: format!("fetch worker panicked: {}", e),
                attempts: 0,
            })?;

            match result {
                Ok(fetched) => observations.extend(fetched),
                Err(Error::Fetch { cause, attempts }) => {
                    log::error!(
                        "batch [{}] failed after {} attempts: {}",
                        names.join(", "),
                        attempts,
                        cause
                    );
                    failed.extend(names.iter().cloned());
                    diagnostics.push(Diagnostic::FetchFailed {
                        variables: names,
                        cause,
                    });
                }
                Err(fatal) => return Err(fatal),
            }

            if let Some(batch) = pending.next() {
                self.spawn_fetch(&mut workers, descriptor, batch, cancel);
            }
        }

        Ok((observations, diagnostics, failed))
    }

    fn spawn_fetch(
        &self,
        workers: &mut JoinSet<(Vec<String>, Result<Vec<Observation>>)>,
        descriptor: &DatasetDescriptor,
        batch: Vec<ResolvedVariable>,
        cancel: &CancelToken,
    ) {
        let source = Arc::clone(&self.source);
        let descriptor = descriptor.clone();
        let cancel = cancel.clone();
        workers.spawn(async move {
            let names: Vec<String> = batch.iter().map(|v| v.logical.clone()).collect();
            let result = source.fetch(&descriptor, &batch, &cancel).await;
            (names, result)
        });
    }
}

fn log_stage(state: RunState) {
    log::debug!("pipeline stage: {}", state);
}
