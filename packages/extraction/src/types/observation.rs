//! Observations from the model and the aggregated, persisted results.

use serde::{Deserialize, Serialize};

use crate::types::indicator::IndicatorDefinition;

/// One candidate value for an indicator, reported for one chunk.
///
/// Transient: consumed by the aggregator, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub company: String,
    pub report_year: i32,
    pub indicator_id: String,

    /// Reported value, `None` when the model found the indicator but no number
    pub value: Option<f64>,

    pub unit: String,

    /// Self-reported confidence, always in [0, 1]
    pub confidence: f64,

    /// Page the value was read from
    pub source_page: Option<u32>,

    pub notes: Option<String>,
}

impl Observation {
    /// Create an observation; `confidence` is sanitized into [0, 1].
    pub fn new(
        company: impl Into<String>,
        report_year: i32,
        indicator_id: impl Into<String>,
        value: Option<f64>,
        unit: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            company: company.into(),
            report_year,
            indicator_id: indicator_id.into(),
            value,
            unit: unit.into(),
            confidence: sanitize_confidence(confidence),
            source_page: None,
            notes: None,
        }
    }

    pub fn with_source_page(mut self, page: u32) -> Self {
        self.source_page = Some(page);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Clamp a reported confidence: anything outside [0, 1] or non-finite is 0.
pub fn sanitize_confidence(confidence: f64) -> f64 {
    if confidence.is_finite() && (0.0..=1.0).contains(&confidence) {
        confidence
    } else {
        0.0
    }
}

/// Outcome of aggregation for one indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// A value was found
    Extracted,
    /// Every chunk answered, none reported a value
    NotMentioned,
    /// At least one chunk for this indicator timed out
    Timeout,
    /// At least one chunk returned an unusable reply
    InvalidSchema,
    /// The model service failed for at least one chunk
    ModelError,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extracted => "extracted",
            Self::NotMentioned => "not_mentioned",
            Self::Timeout => "timeout",
            Self::InvalidSchema => "invalid_schema",
            Self::ModelError => "model_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "extracted" => Some(Self::Extracted),
            "not_mentioned" => Some(Self::NotMentioned),
            "timeout" => Some(Self::Timeout),
            "invalid_schema" => Some(Self::InvalidSchema),
            "model_error" => Some(Self::ModelError),
            _ => None,
        }
    }

    pub fn is_extracted(&self) -> bool {
        matches!(self, Self::Extracted)
    }
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single best result for (company, report_year, indicator_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub company: String,
    pub report_year: i32,
    pub indicator_id: String,
    pub indicator_name: String,
    pub value: Option<f64>,
    pub unit: String,
    pub confidence: f64,
    pub source_page: Option<u32>,
    pub notes: Option<String>,
    pub status: ResultStatus,
}

impl AggregatedResult {
    /// Result for an indicator nothing usable was found for.
    pub fn not_extracted(
        company: impl Into<String>,
        report_year: i32,
        indicator: &IndicatorDefinition,
        status: ResultStatus,
    ) -> Self {
        Self {
            company: company.into(),
            report_year,
            indicator_id: indicator.id.clone(),
            indicator_name: indicator.name.clone(),
            value: None,
            unit: indicator.expected_unit.clone(),
            confidence: 0.0,
            source_page: None,
            notes: None,
            status,
        }
    }

    /// Result taken from the winning observation.
    pub fn from_observation(observation: Observation, indicator: &IndicatorDefinition) -> Self {
        let status = if observation.value.is_some() {
            ResultStatus::Extracted
        } else {
            ResultStatus::NotMentioned
        };

        let unit = if observation.unit.trim().is_empty() {
            indicator.expected_unit.clone()
        } else {
            observation.unit
        };

        Self {
            company: observation.company,
            report_year: observation.report_year,
            indicator_id: observation.indicator_id,
            indicator_name: indicator.name.clone(),
            value: observation.value,
            unit,
            confidence: sanitize_confidence(observation.confidence),
            source_page: observation.source_page,
            notes: observation.notes,
            status,
        }
    }

    pub fn is_extracted(&self) -> bool {
        self.value.is_some()
    }

    /// Put a note in front of the existing notes.
    pub fn prepend_note(&mut self, note: &str) {
        self.notes = Some(match self.notes.take() {
            Some(existing) if !existing.is_empty() => format!("{} {}", note, existing),
            _ => note.to_string(),
        });
    }

    /// Append a line to the notes.
    pub fn push_note(&mut self, note: &str) {
        self.notes = Some(match self.notes.take() {
            Some(existing) if !existing.is_empty() => format!("{}; {}", existing, note),
            _ => note.to_string(),
        });
    }
}
