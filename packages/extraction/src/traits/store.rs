//! Storage trait for aggregated results.

use async_trait::async_trait;

use crate::error::PersistenceResult;
use crate::types::{
    observation::AggregatedResult,
    summary::{CompanySummary, RunRecord},
};

/// Durable store of aggregated results keyed by
/// (company, report_year, indicator_id).
///
/// Every call is its own statement, so one failing row never takes its
/// siblings with it.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert or replace the row for the result's key.
    async fn upsert(&self, result: &AggregatedResult) -> PersistenceResult<()>;

    /// Statistics for one company and year.
    async fn summary(&self, company: &str, report_year: i32) -> PersistenceResult<CompanySummary>;

    /// Stored rows, ordered by company then indicator id.
    async fn results(
        &self,
        company: Option<&str>,
        report_year: Option<i32>,
    ) -> PersistenceResult<Vec<AggregatedResult>>;

    /// Summaries for every stored (company, report_year), ordered by company.
    async fn summaries(&self) -> PersistenceResult<Vec<CompanySummary>>;

    /// Rows with confidence below `threshold`, lowest first.
    async fn low_confidence(&self, threshold: f64) -> PersistenceResult<Vec<AggregatedResult>>;

    /// Remove a company's rows, for one year or all years. Returns rows removed.
    async fn delete_company(&self, company: &str, report_year: Option<i32>) -> PersistenceResult<u64>;

    /// Insert or update a run record.
    async fn record_run(&self, run: &RunRecord) -> PersistenceResult<()>;

    /// Recorded runs, newest first.
    async fn runs(&self, limit: usize) -> PersistenceResult<Vec<RunRecord>>;
}
