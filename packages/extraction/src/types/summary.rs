//! Summary types - per-company statistics and run records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Extraction statistics for one (company, report_year).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanySummary {
    pub company: String,
    pub report_year: i32,
    pub total_indicators: usize,

    /// Rows with a non-null value
    pub extracted_count: usize,

    /// Mean confidence over all rows, 3 decimals
    pub avg_confidence: f64,

    /// `extracted_count / total_indicators * 100`, 1 decimal
    pub accuracy_percent: f64,
}

impl CompanySummary {
    /// Build a summary from raw counts, applying the rounding rules.
    pub fn new(
        company: impl Into<String>,
        report_year: i32,
        total_indicators: usize,
        extracted_count: usize,
        avg_confidence: f64,
    ) -> Self {
        let accuracy_percent = if total_indicators == 0 {
            0.0
        } else {
            round_to(extracted_count as f64 / total_indicators as f64 * 100.0, 1)
        };

        let avg_confidence = if total_indicators == 0 || !avg_confidence.is_finite() {
            0.0
        } else {
            round_to(avg_confidence, 3)
        };

        Self {
            company: company.into(),
            report_year,
            total_indicators,
            extracted_count,
            avg_confidence,
            accuracy_percent,
        }
    }

    /// Summarize a set of rows for the same company and year.
    pub fn from_rows(
        company: impl Into<String>,
        report_year: i32,
        rows: impl IntoIterator<Item = (Option<f64>, f64)>,
    ) -> Self {
        let (mut total, mut extracted, mut confidence_sum) = (0usize, 0usize, 0.0f64);
        for (value, confidence) in rows {
            total += 1;
            if value.is_some() {
                extracted += 1;
            }
            confidence_sum += confidence;
        }

        let avg = if total == 0 { 0.0 } else { confidence_sum / total as f64 };
        Self::new(company, report_year, total, extracted, avg)
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Lifecycle of a recorded run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Audit record of one company's extraction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub company: String,
    pub report_year: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub total_indicators: usize,
    pub successful_extractions: usize,
    pub avg_confidence: Option<f64>,
    pub error_message: Option<String>,
}

impl RunRecord {
    /// Start a new run record.
    pub fn start(company: impl Into<String>, report_year: i32, total_indicators: usize) -> Self {
        Self {
            id: Uuid::now_v7(),
            company: company.into(),
            report_year,
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Running,
            total_indicators,
            successful_extractions: 0,
            avg_confidence: None,
            error_message: None,
        }
    }

    /// Mark completed with the final summary.
    pub fn complete(mut self, summary: &CompanySummary) -> Self {
        self.completed_at = Some(Utc::now());
        self.status = RunStatus::Completed;
        self.successful_extractions = summary.extracted_count;
        self.avg_confidence = Some(summary.avg_confidence);
        self
    }

    /// Mark failed with a message.
    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.completed_at = Some(Utc::now());
        self.status = RunStatus::Failed;
        self.error_message = Some(message.into());
        self
    }
}
