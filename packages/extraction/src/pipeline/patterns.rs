//! Regex fast path over the raw pages.
//!
//! Many reports state the headline figures in a predictable table row
//! ("Scope 1 ... 12,345 tCO2e"). Each indicator's `table_patterns` are tried
//! before any model call; a confirmed hit becomes an observation at a fixed
//! confidence and the indicator is left out of the model prompts.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use crate::types::{
    catalog::compile_pattern,
    indicator::IndicatorDefinition,
    observation::Observation,
    page::PageText,
};

lazy_static! {
    static ref KILOTONNES: Regex = Regex::new(r"(?i)\bkt").unwrap();
}

/// Confidence given to a pattern hit.
pub const PATTERN_CONFIDENCE: f64 = 0.85;

/// Characters of surrounding text checked for a search term.
const CONTEXT_CHARS: usize = 150;

/// Search terms that must appear near a match (the first few are the most
/// specific).
const CONTEXT_TERMS: usize = 5;

const NOTE_CHARS: usize = 200;

/// A confirmed pattern match.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternHit {
    pub value: f64,
    pub page: u32,
    /// Text around the match
    pub excerpt: String,
}

/// Scan `pages` for every indicator that has table patterns.
///
/// Returns at most one observation per indicator, in catalog order.
pub fn scan_table_patterns(
    pages: &[PageText],
    indicators: &[IndicatorDefinition],
    company: &str,
    report_year: i32,
) -> Vec<Observation> {
    indicators
        .iter()
        .filter_map(|def| {
            let hit = find_pattern_value(pages, def)?;
            debug!(
                company = company,
                indicator_id = %def.id,
                value = hit.value,
                page = hit.page,
                "Pattern hit"
            );
            let excerpt: String = hit.excerpt.chars().take(NOTE_CHARS).collect();
            Some(
                Observation::new(
                    company,
                    report_year,
                    def.id.clone(),
                    Some(hit.value),
                    def.expected_unit.clone(),
                    PATTERN_CONFIDENCE,
                )
                .with_source_page(hit.page)
                .with_notes(format!("Regex extraction: {}", excerpt)),
            )
        })
        .collect()
}

/// First confirmed value for one indicator.
///
/// Patterns are tried in order, each over every page. A captured number is
/// accepted when it is not a bare year (unless the indicator is a year),
/// lies inside the expected range and one of the indicator's leading search
/// terms appears near the match. Kilotonne figures are scaled to tonnes for
/// tonne-denominated indicators.
pub fn find_pattern_value(pages: &[PageText], def: &IndicatorDefinition) -> Option<PatternHit> {
    if def.table_patterns.is_empty() {
        return None;
    }

    let terms: Vec<String> = def
        .search_terms
        .iter()
        .take(CONTEXT_TERMS)
        .map(|t| t.to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    let tonnes = def.expected_unit.to_lowercase().starts_with('t');

    for pattern in &def.table_patterns {
        let re = match compile_pattern(pattern) {
            Ok(re) => re,
            Err(e) => {
                warn!(indicator_id = %def.id, error = %e, "Skipping invalid table pattern");
                continue;
            }
        };

        for page in pages {
            for caps in re.captures_iter(&page.content) {
                let Some(whole) = caps.get(0) else { continue };

                for group in caps.iter().skip(1).flatten() {
                    let Some(mut value) = parse_captured_number(group.as_str()) else {
                        continue;
                    };
                    if !def.is_year_valued() && looks_like_year(value) {
                        continue;
                    }
                    if tonnes && KILOTONNES.is_match(whole.as_str()) {
                        value *= 1000.0;
                    }
                    if !def.in_expected_range(value) {
                        continue;
                    }

                    let excerpt = surrounding(&page.content, whole.start(), whole.end());
                    let lower = excerpt.to_lowercase();
                    if !terms.iter().any(|t| lower.contains(t.as_str())) {
                        continue;
                    }

                    return Some(PatternHit {
                        value,
                        page: page.page_number,
                        excerpt: excerpt.split_whitespace().collect::<Vec<_>>().join(" "),
                    });
                }
            }
        }
    }

    None
}

/// Read "12 345", "4,128" or "3.5" as a number; anything else is not a value.
fn parse_captured_number(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty()
        || !raw
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_whitespace() || c == ',' || c == '.')
    {
        return None;
    }
    let cleaned: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn looks_like_year(value: f64) -> bool {
    value.fract() == 0.0 && (2010.0..=2030.0).contains(&value)
}

/// The match plus up to `CONTEXT_CHARS` characters either side.
fn surrounding(content: &str, start: usize, end: usize) -> &str {
    let from = content[..start]
        .char_indices()
        .rev()
        .nth(CONTEXT_CHARS - 1)
        .map_or(0, |(i, _)| i);
    let to = content[end..]
        .char_indices()
        .nth(CONTEXT_CHARS)
        .map_or(content.len(), |(i, _)| end + i);
    content[from..to].trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::catalog::IndicatorCatalog;
    use crate::types::indicator::Category;

    fn scope1() -> IndicatorDefinition {
        IndicatorDefinition::new("E1", "Scope 1 GHG Emissions", Category::Environmental, "tCO2e")
            .with_search_terms(["scope 1", "direct emissions"])
            .with_table_patterns([
                r"scope\s*1.*?(\d[\d\s,\.]+)\s*(tco2|tonnes|ktco2)",
                r"(\d{2,3})\s*ktco2e",
            ])
            .with_expected_range(100.0, 1_000_000.0)
    }

    #[test]
    fn test_table_row_is_found() {
        let pages = vec![
            PageText::new(1, "Introduction"),
            PageText::new(2, "| Scope 1 emissions | 12,345 tCO2e | 11,900 tCO2e |"),
        ];
        let hit = find_pattern_value(&pages, &scope1()).unwrap();

        assert_eq!(hit.value, 12345.0);
        assert_eq!(hit.page, 2);
        assert!(hit.excerpt.contains("Scope 1 emissions"));
    }

    #[test]
    fn test_years_are_not_values() {
        let pages = vec![PageText::new(1, "Scope 1 2024 tCO2e reporting")];
        assert!(find_pattern_value(&pages, &scope1()).is_none());

        let target = IndicatorDefinition::new("E7", "Net Zero Target Year", Category::Environmental, "year")
            .with_search_terms(["net zero"])
            .with_table_patterns([r"net\s*zero.*?(20[3-5]\d)"])
            .with_expected_range(2025.0, 2100.0);
        let pages = vec![PageText::new(4, "We commit to net zero by 2050.")];
        assert_eq!(find_pattern_value(&pages, &target).unwrap().value, 2050.0);
    }

    #[test]
    fn test_kilotonnes_are_scaled() {
        let pages = vec![PageText::new(3, "Direct emissions fell to 576 ktCO2e, scope 1 only.")];
        let hit = find_pattern_value(&pages, &scope1()).unwrap();
        assert_eq!(hit.value, 576_000.0);
    }

    #[test]
    fn test_out_of_range_and_missing_context_are_skipped() {
        // below the range
        let pages = vec![PageText::new(1, "Scope 1: 12 tonnes")];
        assert!(find_pattern_value(&pages, &scope1()).is_none());

        // no search term near the number
        let def = scope1().with_table_patterns([r"(\d{2,3})\s*ktco2e"]);
        let pages = vec![PageText::new(1, "Our footprint was 250 ktCO2e.")];
        assert!(find_pattern_value(&pages, &def).is_none());
    }

    #[test]
    fn test_scan_builds_observations() {
        let catalog = IndicatorCatalog::builtin();
        let pages = vec![
            PageText::new(7, "Gross Scope 1 GHG emissions: 48 200 tCO2e in 2024."),
            PageText::new(9, "We aim for net zero by 2050 across operations."),
        ];

        let obs = scan_table_patterns(&pages, catalog.indicators(), "Acme", 2024);
        let e1 = obs.iter().find(|o| o.indicator_id == "E1").unwrap();
        assert_eq!(e1.value, Some(48200.0));
        assert_eq!(e1.confidence, PATTERN_CONFIDENCE);
        assert_eq!(e1.source_page, Some(7));
        assert_eq!(e1.unit, "tCO2e");
        assert!(e1.notes.as_deref().unwrap().starts_with("Regex extraction: "));

        let e7 = obs.iter().find(|o| o.indicator_id == "E7").unwrap();
        assert_eq!(e7.value, Some(2050.0));
    }

    #[test]
    fn test_parse_captured_number() {
        assert_eq!(parse_captured_number(" 15 000 "), Some(15000.0));
        assert_eq!(parse_captured_number("4,128.5"), Some(4128.5));
        assert_eq!(parse_captured_number("1.2.3"), None);
        assert_eq!(parse_captured_number("12a"), None);
        assert_eq!(parse_captured_number(", "), None);
    }
}
