//! LLM prompts for indicator extraction.

use crate::traits::extractor::{ExtractionRequest, VerificationRequest};

/// System prompt shared by every extraction call.
pub const SYSTEM_PROMPT: &str = "You are an expert ESG data analyst extracting quantitative \
sustainability indicators from corporate sustainability reports. You answer with JSON only \
and never invent values that are not stated in the provided pages.";

/// Rules and output contract appended to every extraction prompt.
const EXTRACTION_RULES: &str = r#"## EXTRACTION RULES

1. Only report values for the reporting year {year} (or FY{year}). If a table has several years, read the {year} column.
2. Tables use "|" as a column separator. Match the row label to the indicator and the column header to the year.
3. Values may use commas, dots or spaces as thousand separators ("15,000", "15 000"). Report plain numbers.
4. Report the value in the unit it is stated in and give that unit. Do not convert.
5. For Scope 2 emissions prefer market-based over location-based figures.
6. Years, page numbers and reference codes are not values.
7. Report group-level totals, not subsidiary figures.

## CONFIDENCE

- 1.0: value stated explicitly with the exact indicator name for {year}
- 0.85-0.95: value found with clear context but different wording
- 0.6-0.8: value requires interpretation or calculation
- 0.3-0.5: value is estimated or unclear
- Omit the indicator entirely if it is not in these pages

## OUTPUT FORMAT (JSON only, no explanation)

{"observations": [{"indicator_id": "<id>", "value": <number or null>, "unit": "<unit>", "confidence": <0.0-1.0>, "source_page": <page number or null>, "notes": "<where it was found>"}]}

Every object must contain indicator_id, value, unit, confidence and source_page.
source_page is the number from the "=== PAGE n ===" marker above the value."#;

/// Build the user prompt for one chunk and one indicator group.
pub fn build_extraction_prompt(request: &ExtractionRequest<'_>) -> String {
    let mut indicators = String::new();
    indicators.push_str("| id | name | expected unit | look for |\n|---|---|---|---|\n");
    for def in request.indicators {
        let terms = def
            .search_terms
            .iter()
            .take(6)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        indicators.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            def.id, def.name, def.expected_unit, terms
        ));
    }

    let rules = EXTRACTION_RULES.replace("{year}", &request.report_year.to_string());

    format!(
        "Extract the following indicators from {company}'s {year} sustainability report.\n\n\
         ## INDICATORS\n\n{indicators}\n\
         ## DOCUMENT PAGES ({label})\n\n{pages}\n\n\
         {rules}",
        company = request.company,
        year = request.report_year,
        indicators = indicators,
        label = request.chunk.label(),
        pages = request.chunk.render(),
        rules = rules,
    )
}

/// Build the prompt that re-checks one extracted value.
pub fn build_verification_prompt(request: &VerificationRequest<'_>) -> String {
    let def = request.indicator;
    let range = match def.expected_range {
        Some((min, max)) => format!("{} to {}", min, max),
        None => "N/A".to_string(),
    };

    format!(
        "Verify this extracted ESG value for {company}:\n\n\
         INDICATOR: {name} ({id})\n\
         EXTRACTED VALUE: {value} {unit}\n\
         EXPECTED RANGE: {range} {expected_unit}\n\n\
         DOCUMENT EXCERPT:\n{excerpt}\n\n\
         VERIFICATION TASK:\n\
         1. Find the value {value} (or a close variant) in the excerpt\n\
         2. Confirm it is the indicator \"{name}\"\n\
         3. Confirm it is for the reporting year {year}\n\
         4. Check the unit\n\n\
         OUTPUT (JSON only):\n\
         {{\"verified\": <true/false>, \"correct_value\": <number or null if wrong>, \
         \"correct_unit\": \"<unit>\", \"confidence\": <0.0-1.0>, \"reason\": \"<short explanation>\"}}",
        company = request.company,
        name = def.name,
        id = def.id,
        value = request.value,
        unit = request.unit,
        range = range,
        expected_unit = def.expected_unit,
        excerpt = request.excerpt,
        year = request.report_year,
    )
}
