//! Keyword relevance scoring for page preselection.
//!
//! Sending every page of a 300-page report for every indicator group is
//! slow and noisy. Pages are scored against the group's search terms and
//! section hints and only the best ones are chunked.

use lazy_static::lazy_static;
use regex::Regex;

use crate::types::{indicator::IndicatorDefinition, page::PageText};

lazy_static! {
    static ref LONG_NUMBER: Regex = Regex::new(r"\d{3,}").unwrap();
}

const TERM_SCORE: u32 = 10;
const PHRASE_BONUS: u32 = 5;
const HINT_SCORE: u32 = 3;
const TABLE_BONUS: u32 = 15;
const NUMBERS_BONUS: u32 = 5;

/// Score one page against a set of indicators.
pub fn score_page(content: &str, indicators: &[IndicatorDefinition]) -> u32 {
    let lower = content.to_lowercase();
    let padded = format!(" {} ", lower);
    let mut score = 0;

    for def in indicators {
        for term in &def.search_terms {
            let term = term.to_lowercase();
            if term.is_empty() || !lower.contains(&term) {
                continue;
            }
            score += TERM_SCORE;
            if padded.contains(&format!(" {} ", term)) {
                score += PHRASE_BONUS;
            }
        }

        for hint in &def.section_hints {
            let hint = hint.to_lowercase();
            if !hint.is_empty() && lower.contains(&hint) {
                score += HINT_SCORE;
            }
        }
    }

    // Markdown tables
    if content.matches('|').count() > 10 {
        score += TABLE_BONUS;
    }

    if LONG_NUMBER.find_iter(content).count() > 5 {
        score += NUMBERS_BONUS;
    }

    score
}

/// Keep the `max_pages` best-scoring pages, returned in page order.
///
/// Pages scoring zero are dropped. When nothing scores at all the input is
/// returned unchanged, so a document in an unexpected language still gets
/// read.
pub fn select_relevant_pages(
    pages: &[PageText],
    indicators: &[IndicatorDefinition],
    max_pages: usize,
) -> Vec<PageText> {
    let mut scored: Vec<(u32, &PageText)> = pages
        .iter()
        .map(|p| (score_page(&p.content, indicators), p))
        .filter(|(score, _)| *score > 0)
        .collect();

    if scored.is_empty() {
        return pages.to_vec();
    }

    // Stable: equal scores keep document order
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.truncate(max_pages.max(1));

    let mut selected: Vec<PageText> = scored.into_iter().map(|(_, p)| p.clone()).collect();
    selected.sort_by_key(|p| p.page_number);
    selected
}
