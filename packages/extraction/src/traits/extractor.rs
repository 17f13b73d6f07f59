//! Extractor trait - one model call per chunk.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{indicator::IndicatorDefinition, observation::Observation, page::DocumentChunk};

/// Everything a single extraction call needs.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionRequest<'a> {
    pub company: &'a str,
    pub report_year: i32,

    /// Indicators to look for in this call (one group)
    pub indicators: &'a [IndicatorDefinition],

    pub chunk: &'a DocumentChunk,
}

/// A second look at one extracted value.
#[derive(Debug, Clone, Copy)]
pub struct VerificationRequest<'a> {
    pub company: &'a str,
    pub report_year: i32,
    pub indicator: &'a IndicatorDefinition,
    pub value: f64,
    pub unit: &'a str,

    /// Rendered pages around the value
    pub excerpt: &'a str,
}

/// Verdict on a verified value.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    /// The value belongs to the indicator and year
    pub verified: bool,

    /// Replacement value, when the checker read a different one
    pub correct_value: Option<f64>,
    pub correct_unit: Option<String>,
    pub confidence: Option<f64>,
    pub reason: String,
}

/// Turns a document chunk into observations for a set of indicators.
///
/// Implementations wrap a specific model provider and own prompting and
/// reply validation. Partial answers are fine: indicators absent from the
/// reply simply produce no observation.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract observations from one chunk.
    ///
    /// Errors are retryable unless `ExtractionError::is_retryable` says
    /// otherwise.
    async fn extract(&self, request: &ExtractionRequest<'_>) -> Result<Vec<Observation>>;

    /// Re-check one value against its surrounding pages.
    ///
    /// `Ok(None)` means the extractor does not verify; the value is kept
    /// as is.
    async fn verify(&self, _request: &VerificationRequest<'_>) -> Result<Option<Verification>> {
        Ok(None)
    }

    /// Provider name for logs.
    fn name(&self) -> &str {
        "extractor"
    }
}
