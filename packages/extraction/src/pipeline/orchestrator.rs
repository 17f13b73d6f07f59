//! Orchestrator - runs companies through load, extract, aggregate, persist.
//!
//! Companies run as independent tasks. Within a company, table patterns are
//! tried first; chunk calls for every indicator group the patterns did not
//! settle run concurrently up to `chunk_concurrency`, and aggregation waits
//! for all of them. Middling-confidence results get one verification call
//! before they are stored.
//!
//! # Example
//!
//! ```rust,ignore
//! use csrd_extraction::{CompanyJob, IndicatorCatalog, MemoryStore, Orchestrator};
//!
//! let orchestrator = Orchestrator::new(extractor, Arc::new(MemoryStore::new()), catalog);
//! let report = orchestrator
//!     .run(vec![CompanyJob::new("Acme", 2024, "data/raw/acme_2024.pdf")])
//!     .await;
//! println!("{}", report);
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ExtractionError, FailureKind, LoadError, LoadResult};
use crate::loader::load_document;
use crate::pipeline::aggregate::{aggregate, FailureLog};
use crate::pipeline::chunk::chunk_pages;
use crate::pipeline::events::{CompanyState, CompanyTracker, ProgressEvent, ProgressHub};
use crate::pipeline::patterns::scan_table_patterns;
use crate::pipeline::relevance::select_relevant_pages;
use crate::pipeline::report::{ChunkFailure, CompanyOutcome, RowFailure, RunReport};
use crate::pipeline::retry::{with_retry, RetryError};
use crate::pipeline::verify::{apply_verification, needs_verification, verification_excerpt};
use crate::traits::{
    extractor::{ExtractionRequest, Extractor, Verification, VerificationRequest},
    store::ResultStore,
};
use crate::types::{
    catalog::{IndicatorCatalog, IndicatorGroup},
    config::PipelineConfig,
    observation::{AggregatedResult, Observation},
    page::{DocumentChunk, PageText},
    summary::{CompanySummary, RunRecord},
};

/// One company's document to process.
#[derive(Debug, Clone)]
pub struct CompanyJob {
    pub company: String,
    pub report_year: i32,
    pub document: PathBuf,
}

impl CompanyJob {
    pub fn new(company: impl Into<String>, report_year: i32, document: impl Into<PathBuf>) -> Self {
        Self {
            company: company.into(),
            report_year,
            document: document.into(),
        }
    }
}

/// Result of one chunk call.
struct ChunkResult {
    group: usize,
    chunk: DocumentChunk,
    outcome: Result<Vec<Observation>, (FailureKind, String)>,
}

/// Drives extraction runs.
///
/// Cheap to clone; clones share the extractor, store, catalog, progress hub
/// and cancellation token.
#[derive(Clone)]
pub struct Orchestrator {
    extractor: Arc<dyn Extractor>,
    store: Arc<dyn ResultStore>,
    catalog: Arc<IndicatorCatalog>,
    config: PipelineConfig,
    progress: ProgressHub,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        store: Arc<dyn ResultStore>,
        catalog: Arc<IndicatorCatalog>,
    ) -> Self {
        Self {
            extractor,
            store,
            catalog,
            config: PipelineConfig::default(),
            progress: ProgressHub::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Publish progress to an existing hub.
    pub fn with_progress(mut self, progress: ProgressHub) -> Self {
        self.progress = progress;
        self
    }

    /// Use an external cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn progress(&self) -> &ProgressHub {
        &self.progress
    }

    pub fn catalog(&self) -> &Arc<IndicatorCatalog> {
        &self.catalog
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run every job concurrently and wait for all of them.
    ///
    /// Never fails as a whole: each company's failure is captured in its
    /// outcome.
    pub async fn run(&self, jobs: Vec<CompanyJob>) -> RunReport {
        info!(companies = jobs.len(), indicators = self.catalog.len(), "Starting extraction run");

        let mut tasks = JoinSet::new();
        for (idx, job) in jobs.iter().cloned().enumerate() {
            let this = self.clone();
            tasks.spawn(async move { (idx, this.run_company(job).await) });
        }

        let mut outcomes: Vec<Option<CompanyOutcome>> = vec![None; jobs.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, outcome)) => outcomes[idx] = Some(outcome),
                Err(e) => error!(error = %e, "Company task panicked"),
            }
        }

        let outcomes: Vec<CompanyOutcome> = outcomes
            .into_iter()
            .zip(&jobs)
            .map(|(outcome, job)| {
                outcome.unwrap_or_else(|| {
                    CompanyOutcome::failed(&job.company, job.report_year, "company task panicked")
                })
            })
            .collect();

        let report = RunReport {
            outcomes,
            confidence_threshold: self.config.confidence_threshold,
        };

        self.progress.publish(ProgressEvent::RunFinished {
            companies: report.outcomes.len(),
            succeeded: report.succeeded(),
            failed: report.failed(),
        });
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Extraction run complete"
        );

        report
    }

    /// Process a single company end to end.
    pub async fn run_company(&self, job: CompanyJob) -> CompanyOutcome {
        let company = job.company.as_str();
        let year = job.report_year;
        let mut tracker = CompanyTracker::new(company, year, self.progress.clone());
        let run = RunRecord::start(company, year, self.catalog.len());
        self.record_run(&run).await;

        // Loading
        tracker.transition(CompanyState::Loading, Some(job.document.display().to_string()));
        let pages = match self.load_pages(job.document.clone()).await {
            Ok(pages) => pages,
            Err(e) => {
                error!(company = company, error = %e, "Failed to load document");
                return self.fail(&mut tracker, run, &job, e.to_string()).await;
            }
        };
        info!(company = company, pages = pages.len(), "Document loaded");

        if self.cancel.is_cancelled() {
            return self.fail(&mut tracker, run, &job, "cancelled").await;
        }

        let pattern_observations = if self.config.pattern_scan {
            scan_table_patterns(&pages, self.catalog.indicators(), company, year)
        } else {
            Vec::new()
        };
        if !pattern_observations.is_empty() {
            info!(company = company, hits = pattern_observations.len(), "Table patterns matched");
        }

        // Extracting
        let settled: HashSet<&str> = pattern_observations
            .iter()
            .map(|o| o.indicator_id.as_str())
            .collect();
        let groups = self.model_groups(&settled);
        let work = self.plan_chunks(&groups, &pages);
        tracker.transition(CompanyState::Extracting, Some(format!("{} chunks", work.len())));

        let chunk_results = self.extract_chunks(&job, &groups, work).await;

        if self.cancel.is_cancelled() {
            warn!(company = company, "Cancelled before aggregation, discarding results");
            return self.fail(&mut tracker, run, &job, "cancelled").await;
        }

        // Aggregating
        tracker.transition(CompanyState::Aggregating, None);
        let mut observations = pattern_observations;
        let mut failures = FailureLog::new();
        let mut failed_chunks = Vec::new();

        for result in chunk_results {
            let group = &groups[result.group];
            match result.outcome {
                Ok(obs) => observations.extend(obs),
                Err((reason, error)) => {
                    failures.record(group.indicators.iter().map(|d| d.id.as_str()), reason);
                    failed_chunks.push(ChunkFailure {
                        group: group.category,
                        chunk: result.chunk.index,
                        pages: result.chunk.label(),
                        reason,
                        error,
                    });
                }
            }
        }

        let mut results = aggregate(company, year, &self.catalog, observations, &failures);
        if self.config.verify_low_confidence {
            self.verify_results(&job, &pages, &mut results).await;
        }
        drop(pages);

        // Persisting
        tracker.transition(CompanyState::Persisting, None);
        let (rows_written, failed_rows) = self.persist(&results).await;

        if rows_written == 0 && !results.is_empty() {
            let mut outcome = self
                .fail(&mut tracker, run, &job, "no result rows could be stored")
                .await;
            outcome.results = results;
            outcome.failed_chunks = failed_chunks;
            outcome.failed_rows = failed_rows;
            return outcome;
        }

        let summary = match self.store.summary(company, year).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(company = company, error = %e, "Failed to read summary, using in-memory results");
                CompanySummary::from_rows(company, year, results.iter().map(|r| (r.value, r.confidence)))
            }
        };

        self.record_run(&run.complete(&summary)).await;
        tracker.transition(CompanyState::Done, None);
        self.progress.publish(ProgressEvent::CompanyFinished {
            company: company.to_string(),
            report_year: year,
            state: CompanyState::Done,
            summary: Some(summary.clone()),
        });

        info!(
            company = company,
            extracted = summary.extracted_count,
            total = summary.total_indicators,
            accuracy = summary.accuracy_percent,
            failed_chunks = failed_chunks.len(),
            failed_rows = failed_rows.len(),
            "Company complete"
        );

        CompanyOutcome {
            company: company.to_string(),
            report_year: year,
            state: CompanyState::Done,
            summary: Some(summary),
            results,
            failed_chunks,
            failed_rows,
            rows_written,
            error: None,
        }
    }

    /// Load and decode the document on the blocking pool.
    async fn load_pages(&self, path: PathBuf) -> LoadResult<Vec<PageText>> {
        let display = path.clone();
        tokio::task::spawn_blocking(move || load_document(&path).map(|pages| pages.collect()))
            .await
            .map_err(|e| LoadError::Invalid {
                path: display,
                reason: format!("loader task failed: {}", e),
            })?
    }

    /// Catalog groups without the indicators the table patterns settled.
    fn model_groups(&self, settled: &HashSet<&str>) -> Vec<IndicatorGroup> {
        self.catalog
            .groups()
            .into_iter()
            .filter_map(|mut group| {
                group.indicators.retain(|d| !settled.contains(d.id.as_str()));
                (!group.indicators.is_empty()).then_some(group)
            })
            .collect()
    }

    /// Select and chunk pages for every group.
    fn plan_chunks(&self, groups: &[IndicatorGroup], pages: &[PageText]) -> Vec<(usize, DocumentChunk)> {
        let mut work = Vec::new();

        for (idx, group) in groups.iter().enumerate() {
            let selected;
            let group_pages = if self.config.relevance_filter {
                selected = select_relevant_pages(pages, &group.indicators, self.config.max_pages_per_group);
                &selected[..]
            } else {
                pages
            };

            let chunks = chunk_pages(
                group_pages,
                self.config.max_chunk_chars,
                self.config.max_pages_per_chunk,
            );
            debug!(
                group = %group.category,
                pages = group_pages.len(),
                chunks = chunks.len(),
                "Planned chunks"
            );
            work.extend(chunks.into_iter().map(|c| (idx, c)));
        }

        work
    }

    /// Run all chunk calls with bounded concurrency and wait for every one.
    ///
    /// Results come back in plan order (group, then chunk index) whatever
    /// order the calls finish in, so aggregation ties resolve the same way on
    /// every run.
    async fn extract_chunks(
        &self,
        job: &CompanyJob,
        groups: &[IndicatorGroup],
        work: Vec<(usize, DocumentChunk)>,
    ) -> Vec<ChunkResult> {
        let calls: Vec<_> = work
            .into_iter()
            .map(|(group_idx, chunk)| async move {
                let outcome = self.extract_chunk(job, &groups[group_idx], &chunk).await;
                ChunkResult {
                    group: group_idx,
                    chunk,
                    outcome,
                }
            })
            .collect();

        stream::iter(calls)
            .buffered(self.config.chunk_concurrency.max(1))
            .collect()
            .await
    }

    async fn extract_chunk(
        &self,
        job: &CompanyJob,
        group: &IndicatorGroup,
        chunk: &DocumentChunk,
    ) -> Result<Vec<Observation>, (FailureKind, String)> {
        let request = ExtractionRequest {
            company: &job.company,
            report_year: job.report_year,
            indicators: &group.indicators,
            chunk,
        };
        let label = format!("{} {} {}", job.company, group.category, chunk.label());
        let timeout = self.config.call_timeout;

        let request = &request;
        let result = with_retry(&self.config.retry, &self.cancel, &label, move |attempt| {
            async move {
                debug!(
                    company = request.company,
                    group = %group.category,
                    chunk = chunk.index,
                    attempt = attempt,
                    "Calling extractor"
                );
                match tokio::time::timeout(timeout, self.extractor.extract(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(ExtractionError::Timeout(timeout)),
                }
            }
        })
        .await;

        match result {
            Ok(observations) => {
                self.progress.publish(ProgressEvent::ChunkCompleted {
                    company: job.company.clone(),
                    group: group.category.to_string(),
                    chunk: chunk.index,
                    observations: observations.len(),
                });
                Ok(observations)
            }
            Err(e) => {
                let (kind, message) = match e {
                    RetryError::Cancelled => (FailureKind::Cancelled, "cancelled".to_string()),
                    RetryError::Fatal(err) => (err.kind(), err.to_string()),
                    RetryError::Exhausted { attempts, last } => {
                        (last.kind(), format!("{} (after {} attempts)", last, attempts))
                    }
                };
                warn!(
                    company = %job.company,
                    group = %group.category,
                    chunk = chunk.index,
                    error = %message,
                    "Chunk failed"
                );
                self.progress.publish(ProgressEvent::ChunkFailed {
                    company: job.company.clone(),
                    group: group.category.to_string(),
                    chunk: chunk.index,
                    reason: kind,
                    error: message.clone(),
                });
                Err((kind, message))
            }
        }
    }

    /// Re-check results whose confidence sits in the verification band.
    ///
    /// A failed verification leaves the result as aggregated.
    async fn verify_results(
        &self,
        job: &CompanyJob,
        pages: &[PageText],
        results: &mut [AggregatedResult],
    ) {
        let checks: Vec<_> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| needs_verification(r))
            .filter_map(|(idx, r)| {
                let def = self.catalog.get(&r.indicator_id)?;
                let value = r.value?;
                let unit = r.unit.clone();
                let excerpt = verification_excerpt(pages, def, r.source_page);
                Some(async move {
                    let request = VerificationRequest {
                        company: &job.company,
                        report_year: job.report_year,
                        indicator: def,
                        value,
                        unit: &unit,
                        excerpt: &excerpt,
                    };
                    (idx, self.verify_one(&request).await)
                })
            })
            .collect();
        if checks.is_empty() {
            return;
        }
        debug!(company = %job.company, values = checks.len(), "Verifying low-confidence values");

        let verdicts: Vec<(usize, Option<Verification>)> = stream::iter(checks)
            .buffered(self.config.chunk_concurrency.max(1))
            .collect()
            .await;

        for (idx, verdict) in verdicts {
            let Some(verdict) = verdict else { continue };
            let result = &mut results[idx];
            let Some(def) = self.catalog.get(&result.indicator_id) else {
                continue;
            };
            let before = result.confidence;
            apply_verification(result, def, &verdict);
            info!(
                company = %job.company,
                indicator_id = %result.indicator_id,
                verified = verdict.verified,
                confidence_before = before,
                confidence = result.confidence,
                "Verified value"
            );
        }
    }

    async fn verify_one(&self, request: &VerificationRequest<'_>) -> Option<Verification> {
        let label = format!("{} verify {}", request.company, request.indicator.id);
        let timeout = self.config.call_timeout;

        let result = with_retry(&self.config.retry, &self.cancel, &label, move |_| async move {
            match tokio::time::timeout(timeout, self.extractor.verify(request)).await {
                Ok(result) => result,
                Err(_) => Err(ExtractionError::Timeout(timeout)),
            }
        })
        .await;

        match result {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(
                    company = request.company,
                    indicator_id = %request.indicator.id,
                    error = %e,
                    "Verification failed, keeping value"
                );
                None
            }
        }
    }

    /// Upsert every row independently. Returns (rows written, failures).
    ///
    /// Runs to completion even if the run is cancelled meanwhile.
    async fn persist(&self, results: &[AggregatedResult]) -> (usize, Vec<RowFailure>) {
        let no_cancel = CancellationToken::new();
        let mut written = 0;
        let mut failed = Vec::new();

        for result in results {
            let label = format!("upsert {} {}", result.company, result.indicator_id);
            match with_retry(&self.config.persist_retry, &no_cancel, &label, |_| self.store.upsert(result)).await {
                Ok(()) => written += 1,
                Err(e) => {
                    error!(
                        company = %result.company,
                        indicator_id = %result.indicator_id,
                        error = %e,
                        "Failed to store result"
                    );
                    failed.push(RowFailure {
                        indicator_id: result.indicator_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        (written, failed)
    }

    /// Store a run record; failures are logged and ignored.
    async fn record_run(&self, run: &RunRecord) {
        if let Err(e) = self.store.record_run(run).await {
            warn!(company = %run.company, error = %e, "Failed to record run");
        }
    }

    async fn fail(
        &self,
        tracker: &mut CompanyTracker,
        run: RunRecord,
        job: &CompanyJob,
        error: impl Into<String>,
    ) -> CompanyOutcome {
        let error = error.into();
        self.record_run(&run.fail(error.clone())).await;
        tracker.transition(CompanyState::Failed, Some(error.clone()));
        self.progress.publish(ProgressEvent::CompanyFinished {
            company: job.company.clone(),
            report_year: job.report_year,
            state: CompanyState::Failed,
            summary: None,
        });
        CompanyOutcome::failed(&job.company, job.report_year, error)
    }
}
