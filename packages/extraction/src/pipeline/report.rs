//! End-of-run reporting.

use std::fmt;

use serde::Serialize;

use crate::error::FailureKind;
use crate::pipeline::events::CompanyState;
use crate::types::{
    indicator::Category,
    observation::{AggregatedResult, ResultStatus},
    summary::CompanySummary,
};

/// A chunk whose model call failed after retries.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkFailure {
    pub group: Category,
    pub chunk: usize,
    pub pages: String,
    pub reason: FailureKind,
    pub error: String,
}

/// A result row the store refused.
#[derive(Debug, Clone, Serialize)]
pub struct RowFailure {
    pub indicator_id: String,
    pub error: String,
}

/// What happened to one company.
#[derive(Debug, Clone, Serialize)]
pub struct CompanyOutcome {
    pub company: String,
    pub report_year: i32,
    pub state: CompanyState,
    pub summary: Option<CompanySummary>,

    /// Aggregated results, one per catalog indicator (empty if the company
    /// failed before aggregation)
    pub results: Vec<AggregatedResult>,

    pub failed_chunks: Vec<ChunkFailure>,
    pub failed_rows: Vec<RowFailure>,

    /// Successful upserts
    pub rows_written: usize,

    /// Why the company failed, if it did
    pub error: Option<String>,
}

impl CompanyOutcome {
    pub(crate) fn failed(company: &str, report_year: i32, error: impl Into<String>) -> Self {
        Self {
            company: company.to_string(),
            report_year,
            state: CompanyState::Failed,
            summary: None,
            results: Vec::new(),
            failed_chunks: Vec::new(),
            failed_rows: Vec::new(),
            rows_written: 0,
            error: Some(error.into()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == CompanyState::Done
    }

    /// Indicators without a value and why.
    pub fn not_extracted(&self) -> impl Iterator<Item = (&str, ResultStatus)> {
        self.results
            .iter()
            .filter(|r| !r.is_extracted())
            .map(|r| (r.indicator_id.as_str(), r.status))
    }

    /// Extracted results below `threshold` confidence.
    pub fn low_confidence(&self, threshold: f64) -> impl Iterator<Item = &AggregatedResult> {
        self.results
            .iter()
            .filter(move |r| r.is_extracted() && r.confidence < threshold)
    }
}

/// Outcome of a whole run, in job order.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcomes: Vec<CompanyOutcome>,

    /// Threshold used to flag results for review
    pub confidence_threshold: f64,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn outcome(&self, company: &str) -> Option<&CompanyOutcome> {
        self.outcomes.iter().find(|o| o.company == company)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Extraction run: {} companies, {} succeeded, {} failed",
            self.outcomes.len(),
            self.succeeded(),
            self.failed()
        )?;

        for outcome in &self.outcomes {
            writeln!(f)?;
            match (&outcome.summary, &outcome.error) {
                (Some(s), _) => writeln!(
                    f,
                    "{} ({}): {}/{} extracted ({:.1}%), avg confidence {:.3}",
                    outcome.company,
                    outcome.report_year,
                    s.extracted_count,
                    s.total_indicators,
                    s.accuracy_percent,
                    s.avg_confidence
                )?,
                (None, Some(err)) => {
                    writeln!(f, "{} ({}): FAILED: {}", outcome.company, outcome.report_year, err)?
                }
                (None, None) => writeln!(f, "{} ({}): {}", outcome.company, outcome.report_year, outcome.state)?,
            }

            for (id, status) in outcome.not_extracted() {
                writeln!(f, "  not extracted {}: {}", id, status)?;
            }
            for r in outcome.low_confidence(self.confidence_threshold) {
                writeln!(f, "  low confidence {}: {:.2}", r.indicator_id, r.confidence)?;
            }
            for c in &outcome.failed_chunks {
                writeln!(f, "  failed chunk {} #{} ({}): {}", c.group, c.chunk, c.pages, c.reason_str())?;
            }
            for r in &outcome.failed_rows {
                writeln!(f, "  failed row {}: {}", r.indicator_id, r.error)?;
            }
        }

        Ok(())
    }
}

impl ChunkFailure {
    fn reason_str(&self) -> &'static str {
        match self.reason {
            FailureKind::Timeout => "timeout",
            FailureKind::InvalidSchema => "invalid schema",
            FailureKind::ModelError => "model error",
            FailureKind::Cancelled => "cancelled",
        }
    }
}
