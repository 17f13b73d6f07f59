//! Second-pass verification of middling-confidence values.
//!
//! A value the model was unsure about (confidence strictly between 0.3 and
//! 0.75) is sent back with the pages around it. A confirmed correction
//! replaces the value; a rejection costs 0.2 confidence, floored at 0.2.

use serde_json::Value;
use tracing::warn;

use crate::error::{ExtractionError, Result};
use crate::pipeline::parse::strip_code_fence;
use crate::pipeline::relevance::select_relevant_pages;
use crate::traits::extractor::Verification;
use crate::types::{
    indicator::IndicatorDefinition,
    observation::{sanitize_confidence, AggregatedResult},
    page::{DocumentChunk, PageText},
};

/// Values with confidence strictly inside this band are verified.
pub const VERIFY_BAND: (f64, f64) = (0.3, 0.75);

const UNVERIFIED_PENALTY: f64 = 0.2;
const UNVERIFIED_FLOOR: f64 = 0.2;

/// Excerpt budget for one verification call.
pub const MAX_EXCERPT_CHARS: usize = 20_000;

/// Pages used when the value has no source page.
const EXCERPT_PAGES: usize = 3;

/// Whether a result is worth a second look.
pub fn needs_verification(result: &AggregatedResult) -> bool {
    result.value.is_some() && result.confidence > VERIFY_BAND.0 && result.confidence < VERIFY_BAND.1
}

/// Pages around the value: its source page and both neighbours, or the
/// best-scoring pages for the indicator when the page is unknown.
pub fn verification_excerpt(
    pages: &[PageText],
    indicator: &IndicatorDefinition,
    source_page: Option<u32>,
) -> String {
    let selected: Vec<PageText> = match source_page {
        Some(page) => pages
            .iter()
            .filter(|p| {
                p.page_number.saturating_add(1) >= page && p.page_number <= page.saturating_add(1)
            })
            .cloned()
            .collect(),
        None => select_relevant_pages(pages, std::slice::from_ref(indicator), EXCERPT_PAGES),
    };

    DocumentChunk::new(0, selected)
        .render()
        .chars()
        .take(MAX_EXCERPT_CHARS)
        .collect()
}

/// Fold a verdict into the result.
pub fn apply_verification(
    result: &mut AggregatedResult,
    indicator: &IndicatorDefinition,
    verdict: &Verification,
) {
    if verdict.verified {
        // confirmed without a value: nothing to change
        let Some(value) = verdict.correct_value else {
            return;
        };
        result.value = Some(value);
        if let Some(confidence) = verdict.confidence {
            result.confidence = sanitize_confidence(confidence);
        }
        result.prepend_note(&format!("Verified: {}.", verdict.reason));
        match indicator.expected_range {
            Some((min, max)) if !indicator.in_expected_range(value) => {
                result.push_note(&format!(
                    "WARNING: value {} outside expected range [{}, {}]",
                    value, min, max
                ));
            }
            _ => {}
        }
    } else {
        result.confidence = (result.confidence - UNVERIFIED_PENALTY).max(UNVERIFIED_FLOOR);
        result.prepend_note(&format!("Verification uncertain: {}.", verdict.reason));
    }
}

/// Parse a verification reply.
///
/// `verified` is required; the other fields are optional and a non-numeric
/// `correct_value` counts as absent.
pub fn parse_verification_reply(reply: &str) -> Result<Verification> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return Err(ExtractionError::EmptyReply);
    }

    let json: Value = serde_json::from_str(trimmed)
        .or_else(|_| serde_json::from_str(strip_code_fence(trimmed)))
        .map_err(|e| ExtractionError::InvalidReply(format!("not JSON: {}", e)))?;
    let Value::Object(obj) = json else {
        return Err(ExtractionError::InvalidReply(
            "verification reply is not an object".to_string(),
        ));
    };

    let verified = match obj.get("verified") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => true,
        Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => false,
        _ => {
            return Err(ExtractionError::InvalidReply(
                "verification reply has no boolean verified".to_string(),
            ))
        }
    };

    let correct_value = obj.get("correct_value").and_then(number);
    if obj.get("correct_value").is_some_and(|v| !v.is_null()) && correct_value.is_none() {
        warn!("Ignoring non-numeric correct_value in verification reply");
    }

    Ok(Verification {
        verified,
        correct_value,
        correct_unit: obj
            .get("correct_unit")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(String::from),
        confidence: obj.get("confidence").and_then(number),
        reason: obj
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string(),
    })
}

fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.replace([',', ' '], "").parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::indicator::Category;
    use crate::types::observation::ResultStatus;

    fn def() -> IndicatorDefinition {
        IndicatorDefinition::new("S1", "Total Employees", Category::Social, "FTE")
            .with_search_terms(["headcount"])
            .with_expected_range(1_000.0, 500_000.0)
    }

    fn result(value: f64, confidence: f64) -> AggregatedResult {
        let mut r = AggregatedResult::not_extracted("Acme", 2024, &def(), ResultStatus::Extracted);
        r.value = Some(value);
        r.confidence = confidence;
        r.notes = Some("table p4".to_string());
        r
    }

    fn verdict(verified: bool, correct_value: Option<f64>, confidence: Option<f64>) -> Verification {
        Verification {
            verified,
            correct_value,
            correct_unit: None,
            confidence,
            reason: "checked".to_string(),
        }
    }

    #[test]
    fn test_band_is_exclusive() {
        assert!(needs_verification(&result(5000.0, 0.5)));
        assert!(!needs_verification(&result(5000.0, 0.3)));
        assert!(!needs_verification(&result(5000.0, 0.75)));

        let mut empty = result(5000.0, 0.5);
        empty.value = None;
        assert!(!needs_verification(&empty));
    }

    #[test]
    fn test_confirmed_correction_replaces_value() {
        let mut r = result(5000.0, 0.5);
        apply_verification(&mut r, &def(), &verdict(true, Some(5200.0), Some(0.9)));

        assert_eq!(r.value, Some(5200.0));
        assert_eq!(r.confidence, 0.9);
        assert_eq!(r.notes.as_deref(), Some("Verified: checked. table p4"));
    }

    #[test]
    fn test_confirmation_without_value_changes_nothing() {
        let mut r = result(5000.0, 0.5);
        apply_verification(&mut r, &def(), &verdict(true, None, Some(0.9)));
        assert_eq!(r, result(5000.0, 0.5));
    }

    #[test]
    fn test_rejection_lowers_confidence_with_floor() {
        let mut r = result(5000.0, 0.5);
        apply_verification(&mut r, &def(), &verdict(false, None, None));
        assert!((r.confidence - 0.3).abs() < 1e-9);
        assert_eq!(r.value, Some(5000.0));
        assert!(r.notes.as_deref().unwrap().starts_with("Verification uncertain: checked."));

        let mut low = result(5000.0, 0.35);
        apply_verification(&mut low, &def(), &verdict(false, None, None));
        assert_eq!(low.confidence, 0.2);
    }

    #[test]
    fn test_corrected_value_out_of_range_is_flagged() {
        let mut r = result(5000.0, 0.5);
        apply_verification(&mut r, &def(), &verdict(true, Some(12.0), None));
        assert_eq!(r.confidence, 0.5);
        assert!(r.notes.as_deref().unwrap().contains("outside expected range"));
    }

    #[test]
    fn test_parse_reply() {
        let v = parse_verification_reply(
            r#"```json
{"verified": true, "correct_value": "5,200", "correct_unit": "FTE", "confidence": 0.9, "reason": "headcount table"}
```"#,
        )
        .unwrap();
        assert!(v.verified);
        assert_eq!(v.correct_value, Some(5200.0));
        assert_eq!(v.correct_unit.as_deref(), Some("FTE"));
        assert_eq!(v.reason, "headcount table");

        let v = parse_verification_reply(r#"{"verified": false, "correct_value": null}"#).unwrap();
        assert!(!v.verified);
        assert_eq!(v.correct_value, None);
        assert_eq!(v.confidence, None);

        assert!(parse_verification_reply(r#"{"confidence": 0.9}"#).is_err());
        assert!(parse_verification_reply("maybe").is_err());
    }

    #[test]
    fn test_excerpt_uses_neighbouring_pages() {
        let pages: Vec<PageText> = (1..=6).map(|n| PageText::new(n, format!("text {}", n))).collect();

        let excerpt = verification_excerpt(&pages, &def(), Some(4));
        assert!(excerpt.contains("=== PAGE 3 ==="));
        assert!(excerpt.contains("=== PAGE 5 ==="));
        assert!(!excerpt.contains("=== PAGE 2 ==="));
        assert!(!excerpt.contains("=== PAGE 6 ==="));
    }
}
