//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the extraction library
//! without making real model calls or touching a database.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::{ExtractionError, PersistenceError, PersistenceResult, Result};
use crate::pipeline::parse_model_reply;
use crate::traits::{
    extractor::{ExtractionRequest, Extractor, Verification, VerificationRequest},
    store::ResultStore,
};
use crate::types::{
    observation::{AggregatedResult, Observation},
    summary::{CompanySummary, RunRecord},
};

/// How a scripted chunk failure behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Return `ExtractionError::Timeout`
    Timeout,
    /// Return `ExtractionError::InvalidReply`
    InvalidSchema,
    /// Return `ExtractionError::Service`
    ModelError,
    /// Never answer (exercises call timeouts and cancellation)
    Hang,
}

#[derive(Debug, Clone)]
struct ScriptedFailure {
    mode: MockFailure,
    /// Fail only this many times, then behave normally
    times: Option<u32>,
}

#[derive(Debug, Clone)]
struct ScriptedObservation {
    indicator_id: String,
    value: Option<f64>,
    unit: String,
    confidence: f64,
    notes: Option<String>,
    /// Report the scripted page as `source_page`
    paged: bool,
}

#[derive(Debug, Clone)]
enum ScriptedVerdict {
    Answer(Verification),
    Fail,
}

/// Record of a call made to the mock extractor.
#[derive(Debug, Clone)]
pub struct MockExtractorCall {
    pub company: String,
    pub report_year: i32,
    pub pages: Vec<u32>,
    pub indicator_ids: Vec<String>,
}

/// Record of a verification request made to the mock extractor.
#[derive(Debug, Clone)]
pub struct MockVerificationCall {
    pub company: String,
    pub indicator_id: String,
    pub value: f64,
    pub excerpt: String,
}

/// A deterministic extractor for tests.
///
/// Observations and failures are scripted per page: a chunk containing a
/// scripted page returns that page's observations (for indicators in the
/// request) or fails the way the page is scripted to fail.
#[derive(Default, Clone)]
pub struct MockExtractor {
    /// Observations by page
    observations: Arc<RwLock<HashMap<u32, Vec<ScriptedObservation>>>>,

    /// Raw replies by page, run through the real reply parser
    raw_replies: Arc<RwLock<HashMap<u32, String>>>,

    /// Failures by page
    failures: Arc<RwLock<HashMap<u32, ScriptedFailure>>>,

    /// Failed attempts so far, by page
    attempts: Arc<RwLock<HashMap<u32, u32>>>,

    /// Artificial latency per call
    delay: Option<Duration>,

    /// Extra latency for calls whose chunk contains the page
    page_delays: Arc<RwLock<HashMap<u32, Duration>>>,

    /// Verdicts by indicator id
    verdicts: Arc<RwLock<HashMap<String, ScriptedVerdict>>>,

    /// Call tracking for assertions
    calls: Arc<RwLock<Vec<MockExtractorCall>>>,
    verification_calls: Arc<RwLock<Vec<MockVerificationCall>>>,

    /// Extract calls currently running, and the most seen at once
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

/// Counts a call as in flight until dropped.
struct InFlight<'a> {
    current: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(current: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { current }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockExtractor {
    /// Create a mock that finds nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `value` for `indicator_id` on `page`.
    pub fn with_observation(
        self,
        page: u32,
        indicator_id: impl Into<String>,
        value: Option<f64>,
        confidence: f64,
    ) -> Self {
        self.push_observation(
            page,
            ScriptedObservation {
                indicator_id: indicator_id.into(),
                value,
                unit: String::new(),
                confidence,
                notes: None,
                paged: true,
            },
        );
        self
    }

    /// Report `value` for chunks containing `page`, without a source page.
    pub fn with_unpaged_observation(
        self,
        page: u32,
        indicator_id: impl Into<String>,
        value: Option<f64>,
        confidence: f64,
    ) -> Self {
        self.push_observation(
            page,
            ScriptedObservation {
                indicator_id: indicator_id.into(),
                value,
                unit: String::new(),
                confidence,
                notes: None,
                paged: false,
            },
        );
        self
    }

    /// Like `with_observation`, with an explicit unit and notes.
    pub fn with_detailed_observation(
        self,
        page: u32,
        indicator_id: impl Into<String>,
        value: Option<f64>,
        unit: impl Into<String>,
        confidence: f64,
        notes: impl Into<String>,
    ) -> Self {
        self.push_observation(
            page,
            ScriptedObservation {
                indicator_id: indicator_id.into(),
                value,
                unit: unit.into(),
                confidence,
                notes: Some(notes.into()),
                paged: true,
            },
        );
        self
    }

    /// Answer chunks containing `page` with a raw model reply.
    pub fn with_raw_reply(self, page: u32, reply: impl Into<String>) -> Self {
        self.raw_replies.write().unwrap().insert(page, reply.into());
        self
    }

    /// Fail every call whose chunk contains `page`.
    pub fn fail_page(self, page: u32, mode: MockFailure) -> Self {
        self.failures
            .write()
            .unwrap()
            .insert(page, ScriptedFailure { mode, times: None });
        self
    }

    /// Fail the first `times` calls whose chunk contains `page`.
    pub fn fail_page_times(self, page: u32, mode: MockFailure, times: u32) -> Self {
        self.failures.write().unwrap().insert(
            page,
            ScriptedFailure {
                mode,
                times: Some(times),
            },
        );
        self
    }

    /// Add latency to every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Add latency to calls whose chunk contains `page`.
    pub fn with_page_delay(self, page: u32, delay: Duration) -> Self {
        self.page_delays.write().unwrap().insert(page, delay);
        self
    }

    /// Answer verification of `indicator_id` with `verdict`.
    pub fn with_verification(self, indicator_id: impl Into<String>, verdict: Verification) -> Self {
        self.verdicts
            .write()
            .unwrap()
            .insert(indicator_id.into(), ScriptedVerdict::Answer(verdict));
        self
    }

    /// Fail every verification of `indicator_id` with a service error.
    pub fn fail_verification(self, indicator_id: impl Into<String>) -> Self {
        self.verdicts
            .write()
            .unwrap()
            .insert(indicator_id.into(), ScriptedVerdict::Fail);
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockExtractorCall> {
        self.calls.read().unwrap().clone()
    }

    /// Get all verification requests made to this mock.
    pub fn verifications(&self) -> Vec<MockVerificationCall> {
        self.verification_calls.read().unwrap().clone()
    }

    /// Most extract calls that were running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Clear call history and failure counters.
    pub fn clear_calls(&self) {
        self.calls.write().unwrap().clear();
        self.verification_calls.write().unwrap().clear();
        self.attempts.write().unwrap().clear();
    }

    fn push_observation(&self, page: u32, obs: ScriptedObservation) {
        self.observations
            .write()
            .unwrap()
            .entry(page)
            .or_default()
            .push(obs);
    }

    /// The failure to apply to this call, if any, counting the attempt.
    fn take_failure(&self, pages: &[u32]) -> Option<MockFailure> {
        let failures = self.failures.read().unwrap();
        let mut attempts = self.attempts.write().unwrap();

        for page in pages {
            let Some(failure) = failures.get(page) else {
                continue;
            };
            let count = attempts.entry(*page).or_insert(0);
            match failure.times {
                Some(times) if *count >= times => continue,
                _ => {
                    *count += 1;
                    return Some(failure.mode);
                }
            }
        }
        None
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(&self, request: &ExtractionRequest<'_>) -> Result<Vec<Observation>> {
        let pages: Vec<u32> = request.chunk.pages.iter().map(|p| p.page_number).collect();
        self.calls.write().unwrap().push(MockExtractorCall {
            company: request.company.to_string(),
            report_year: request.report_year,
            pages: pages.clone(),
            indicator_ids: request.indicators.iter().map(|d| d.id.clone()).collect(),
        });

        let _in_flight = InFlight::enter(&self.in_flight, &self.peak_in_flight);

        let page_delay = {
            let page_delays = self.page_delays.read().unwrap();
            pages.iter().filter_map(|p| page_delays.get(p).copied()).max()
        };
        if let Some(delay) = self.delay.into_iter().chain(page_delay).reduce(|a, b| a + b) {
            tokio::time::sleep(delay).await;
        }

        if let Some(mode) = self.take_failure(&pages) {
            return match mode {
                MockFailure::Timeout => Err(ExtractionError::Timeout(Duration::from_secs(120))),
                MockFailure::InvalidSchema => {
                    Err(ExtractionError::InvalidReply("mock: not JSON".into()))
                }
                MockFailure::ModelError => Err(ExtractionError::Service("mock: 503".into())),
                MockFailure::Hang => {
                    std::future::pending::<()>().await;
                    Err(ExtractionError::Cancelled)
                }
            };
        }

        let mut results = Vec::new();

        let raw = {
            let raw_replies = self.raw_replies.read().unwrap();
            pages
                .iter()
                .filter_map(|p| raw_replies.get(p).cloned())
                .collect::<Vec<_>>()
        };
        for reply in raw {
            results.extend(parse_model_reply(&reply, request)?);
        }

        let wanted: HashSet<&str> = request.indicators.iter().map(|d| d.id.as_str()).collect();
        let observations = self.observations.read().unwrap();
        for page in &pages {
            for scripted in observations.get(page).into_iter().flatten() {
                if !wanted.contains(scripted.indicator_id.as_str()) {
                    continue;
                }
                let mut obs = Observation::new(
                    request.company,
                    request.report_year,
                    scripted.indicator_id.clone(),
                    scripted.value,
                    scripted.unit.clone(),
                    scripted.confidence,
                );
                if scripted.paged {
                    obs.source_page = Some(*page);
                }
                obs.notes = scripted.notes.clone();
                results.push(obs);
            }
        }

        Ok(results)
    }

    async fn verify(&self, request: &VerificationRequest<'_>) -> Result<Option<Verification>> {
        self.verification_calls.write().unwrap().push(MockVerificationCall {
            company: request.company.to_string(),
            indicator_id: request.indicator.id.clone(),
            value: request.value,
            excerpt: request.excerpt.to_string(),
        });

        let verdict = self.verdicts.read().unwrap().get(&request.indicator.id).cloned();
        match verdict {
            Some(ScriptedVerdict::Answer(verdict)) => Ok(Some(verdict)),
            Some(ScriptedVerdict::Fail) => Err(ExtractionError::Service("mock: verifier down".into())),
            None => Ok(None),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// A store wrapper that makes chosen rows fail.
///
/// Delegates everything else to the inner store.
pub struct FailingStore<S> {
    inner: S,
    /// Indicator ids that always fail with a constraint error
    permanent: RwLock<HashSet<String>>,
    /// Indicator ids that fail with a connection error this many more times
    transient: RwLock<HashMap<String, u32>>,
    /// Upsert attempts, by indicator id
    attempts: RwLock<HashMap<String, u32>>,
}

impl<S: ResultStore> FailingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            permanent: RwLock::new(HashSet::new()),
            transient: RwLock::new(HashMap::new()),
            attempts: RwLock::new(HashMap::new()),
        }
    }

    /// Reject every upsert for `indicator_id`.
    pub fn fail_indicator(self, indicator_id: impl Into<String>) -> Self {
        self.permanent.write().unwrap().insert(indicator_id.into());
        self
    }

    /// Fail the first `times` upserts for `indicator_id` with a transient error.
    pub fn fail_indicator_times(self, indicator_id: impl Into<String>, times: u32) -> Self {
        self.transient
            .write()
            .unwrap()
            .insert(indicator_id.into(), times);
        self
    }

    /// Upsert attempts made for `indicator_id`.
    pub fn attempts(&self, indicator_id: &str) -> u32 {
        self.attempts
            .read()
            .unwrap()
            .get(indicator_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: ResultStore> ResultStore for FailingStore<S> {
    async fn upsert(&self, result: &AggregatedResult) -> PersistenceResult<()> {
        *self
            .attempts
            .write()
            .unwrap()
            .entry(result.indicator_id.clone())
            .or_insert(0) += 1;

        if self.permanent.read().unwrap().contains(&result.indicator_id) {
            return Err(PersistenceError::Constraint(format!(
                "mock: rejected {}",
                result.indicator_id
            )));
        }

        {
            let mut transient = self.transient.write().unwrap();
            if let Some(remaining) = transient.get_mut(&result.indicator_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(PersistenceError::Connection("mock: connection reset".into()));
                }
            }
        }

        self.inner.upsert(result).await
    }

    async fn summary(&self, company: &str, report_year: i32) -> PersistenceResult<CompanySummary> {
        self.inner.summary(company, report_year).await
    }

    async fn results(
        &self,
        company: Option<&str>,
        report_year: Option<i32>,
    ) -> PersistenceResult<Vec<AggregatedResult>> {
        self.inner.results(company, report_year).await
    }

    async fn summaries(&self) -> PersistenceResult<Vec<CompanySummary>> {
        self.inner.summaries().await
    }

    async fn low_confidence(&self, threshold: f64) -> PersistenceResult<Vec<AggregatedResult>> {
        self.inner.low_confidence(threshold).await
    }

    async fn delete_company(&self, company: &str, report_year: Option<i32>) -> PersistenceResult<u64> {
        self.inner.delete_company(company, report_year).await
    }

    async fn record_run(&self, run: &RunRecord) -> PersistenceResult<()> {
        self.inner.record_run(run).await
    }

    async fn runs(&self, limit: usize) -> PersistenceResult<Vec<RunRecord>> {
        self.inner.runs(limit).await
    }
}
