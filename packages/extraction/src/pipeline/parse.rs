//! Strict validation of model replies.
//!
//! A reply that is not JSON is an error (retryable). Inside a valid reply,
//! individual records that break the schema are dropped and logged; they
//! never fail the chunk.

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{ExtractionError, Result};
use crate::traits::extractor::ExtractionRequest;
use crate::types::observation::{sanitize_confidence, Observation};

const REQUIRED_FIELDS: [&str; 5] = ["indicator_id", "value", "unit", "confidence", "source_page"];

/// Parse a raw model reply into observations for `request`.
pub fn parse_model_reply(reply: &str, request: &ExtractionRequest<'_>) -> Result<Vec<Observation>> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return Err(ExtractionError::EmptyReply);
    }

    let json: Value = serde_json::from_str(trimmed)
        .or_else(|_| serde_json::from_str(strip_code_fence(trimmed)))
        .map_err(|e| ExtractionError::InvalidReply(format!("not JSON: {}", e)))?;

    let records = match json {
        Value::Array(records) => records,
        Value::Object(mut obj) => match obj.remove("observations") {
            Some(Value::Array(records)) => records,
            Some(other) => {
                return Err(ExtractionError::InvalidReply(format!(
                    "observations is not an array: {}",
                    type_name(&other)
                )))
            }
            None => {
                return Err(ExtractionError::InvalidReply(
                    "missing observations array".to_string(),
                ))
            }
        },
        other => {
            return Err(ExtractionError::InvalidReply(format!(
                "expected object or array, got {}",
                type_name(&other)
            )))
        }
    };

    let observations = records
        .into_iter()
        .enumerate()
        .filter_map(|(i, record)| match parse_record(record, request) {
            Ok(obs) => Some(obs),
            Err(reason) => {
                warn!(
                    company = request.company,
                    chunk = request.chunk.index,
                    record = i,
                    reason = %reason,
                    "Dropping invalid observation"
                );
                None
            }
        })
        .collect();

    Ok(observations)
}

/// Remove a surrounding Markdown code fence, if any.
pub fn strip_code_fence(s: &str) -> &str {
    s.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```JSON")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

fn parse_record(record: Value, request: &ExtractionRequest<'_>) -> std::result::Result<Observation, String> {
    let obj = match record {
        Value::Object(obj) => obj,
        other => return Err(format!("record is {}, not an object", type_name(&other))),
    };

    for field in REQUIRED_FIELDS {
        if !obj.contains_key(field) {
            return Err(format!("missing field {}", field));
        }
    }

    let indicator_id = match obj.get("indicator_id") {
        Some(Value::String(id)) => id.trim().to_string(),
        _ => return Err("indicator_id is not a string".to_string()),
    };
    if !request.indicators.iter().any(|d| d.id == indicator_id) {
        return Err(format!("unknown indicator_id {}", indicator_id));
    }

    let value = match obj.get("value") {
        Some(Value::Null) => None,
        Some(v) => Some(parse_number(v).ok_or_else(|| format!("non-numeric value for {}", indicator_id))?),
        None => None,
    };

    let unit = match obj.get("unit") {
        Some(Value::String(unit)) => unit.trim().to_string(),
        Some(Value::Null) => String::new(),
        _ => return Err(format!("unit is not a string for {}", indicator_id)),
    };

    let raw_confidence = obj
        .get("confidence")
        .and_then(parse_number)
        .ok_or_else(|| format!("non-numeric confidence for {}", indicator_id))?;
    let confidence = sanitize_confidence(raw_confidence);
    if confidence != raw_confidence {
        warn!(
            company = request.company,
            indicator_id = %indicator_id,
            confidence = raw_confidence,
            "Confidence outside [0, 1], recording 0"
        );
    }

    let source_page = parse_source_page(&obj, &indicator_id, request)?;

    let notes = match obj.get("notes") {
        Some(Value::String(n)) if !n.trim().is_empty() => Some(n.trim().to_string()),
        _ => None,
    };

    Ok(Observation {
        company: request.company.to_string(),
        report_year: request.report_year,
        indicator_id,
        value,
        unit,
        confidence,
        source_page,
        notes,
    })
}

fn parse_source_page(
    obj: &Map<String, Value>,
    indicator_id: &str,
    request: &ExtractionRequest<'_>,
) -> std::result::Result<Option<u32>, String> {
    let page = match obj.get("source_page") {
        None | Some(Value::Null) => return Ok(None),
        Some(v) => parse_number(v)
            .filter(|n| n.fract() == 0.0 && *n >= 1.0 && *n <= u32::MAX as f64)
            .map(|n| n as u32)
            .ok_or_else(|| format!("invalid source_page for {}", indicator_id))?,
    };

    if !request.chunk.contains_page(page) {
        warn!(
            company = request.company,
            indicator_id = indicator_id,
            source_page = page,
            chunk = %request.chunk.label(),
            "source_page outside chunk, clearing"
        );
        return Ok(None);
    }

    Ok(Some(page))
}

/// Accept JSON numbers and numeric strings like "15 000" or "4,128".
fn parse_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| !matches!(c, ',' | '\u{a0}' | '\u{202f}') && !c.is_whitespace())
                .collect();
            cleaned.parse::<f64>().ok()?
        }
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::indicator::{Category, IndicatorDefinition};
    use crate::types::page::{DocumentChunk, PageText};

    fn fixture() -> (Vec<IndicatorDefinition>, DocumentChunk) {
        let defs = vec![
            IndicatorDefinition::new("E1", "Scope 1", Category::Environmental, "tCO2e"),
            IndicatorDefinition::new("E5", "Energy", Category::Environmental, "MWh"),
        ];
        let chunk = DocumentChunk::new(0, vec![PageText::new(4, "a"), PageText::new(5, "b")]);
        (defs, chunk)
    }

    fn request<'a>(defs: &'a [IndicatorDefinition], chunk: &'a DocumentChunk) -> ExtractionRequest<'a> {
        ExtractionRequest {
            company: "Acme",
            report_year: 2024,
            indicators: defs,
            chunk,
        }
    }

    #[test]
    fn test_parses_object_reply() {
        let (defs, chunk) = fixture();
        let reply = r#"{"observations": [
            {"indicator_id": "E1", "value": 1200.5, "unit": "tCO2e", "confidence": 0.9, "source_page": 5, "notes": "table 3"},
            {"indicator_id": "E5", "value": null, "unit": "MWh", "confidence": 0.2, "source_page": null}
        ]}"#;

        let obs = parse_model_reply(reply, &request(&defs, &chunk)).unwrap();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].value, Some(1200.5));
        assert_eq!(obs[0].source_page, Some(5));
        assert_eq!(obs[0].notes.as_deref(), Some("table 3"));
        assert_eq!(obs[0].company, "Acme");
        assert_eq!(obs[1].value, None);
    }

    #[test]
    fn test_accepts_fenced_array() {
        let (defs, chunk) = fixture();
        let reply = "```json\n[{\"indicator_id\": \"E1\", \"value\": \"15 000\", \"unit\": \"tCO2e\", \"confidence\": 1, \"source_page\": 4}]\n```";

        let obs = parse_model_reply(reply, &request(&defs, &chunk)).unwrap();
        assert_eq!(obs[0].value, Some(15000.0));
    }

    #[test]
    fn test_drops_invalid_records() {
        let (defs, chunk) = fixture();
        let reply = r#"[
            {"indicator_id": "E1", "value": 1, "unit": "t", "confidence": 0.5},
            {"indicator_id": "X9", "value": 1, "unit": "t", "confidence": 0.5, "source_page": 4},
            {"indicator_id": "E1", "value": "about a lot", "unit": "t", "confidence": 0.5, "source_page": 4},
            "garbage",
            {"indicator_id": "E5", "value": "4,128", "unit": "MWh", "confidence": 0.7, "source_page": 4}
        ]"#;

        let obs = parse_model_reply(reply, &request(&defs, &chunk)).unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].indicator_id, "E5");
        assert_eq!(obs[0].value, Some(4128.0));
    }

    #[test]
    fn test_out_of_range_confidence_and_page() {
        let (defs, chunk) = fixture();
        let reply = r#"[{"indicator_id": "E1", "value": 3, "unit": "t", "confidence": 1.7, "source_page": 99}]"#;

        let obs = parse_model_reply(reply, &request(&defs, &chunk)).unwrap();
        assert_eq!(obs[0].confidence, 0.0);
        assert_eq!(obs[0].source_page, None);
    }

    #[test]
    fn test_unparseable_replies_are_errors() {
        let (defs, chunk) = fixture();
        let req = request(&defs, &chunk);

        assert!(matches!(parse_model_reply("   ", &req), Err(ExtractionError::EmptyReply)));
        assert!(matches!(
            parse_model_reply("I could not find anything", &req),
            Err(ExtractionError::InvalidReply(_))
        ));
        assert!(matches!(
            parse_model_reply(r#"{"results": []}"#, &req),
            Err(ExtractionError::InvalidReply(_))
        ));
    }

    #[test]
    fn test_partial_reply_is_valid() {
        let (defs, chunk) = fixture();
        let obs = parse_model_reply(r#"{"observations": []}"#, &request(&defs, &chunk)).unwrap();
        assert!(obs.is_empty());
    }
}
