//! Page chunking - group consecutive pages under a size budget.

use tracing::debug;

use crate::types::page::{DocumentChunk, PageText};

/// Group pages into chunks of at most `max_chars` characters and
/// `max_pages` pages, preserving order.
///
/// Pages without text are skipped. A single page over `max_chars` becomes
/// its own chunk, truncated to the budget.
pub fn chunk_pages(pages: &[PageText], max_chars: usize, max_pages: usize) -> Vec<DocumentChunk> {
    let max_chars = max_chars.max(1);
    let max_pages = max_pages.max(1);

    let mut chunks = Vec::new();
    let mut current: Vec<PageText> = Vec::new();
    let mut current_chars = 0;

    for page in pages.iter().filter(|p| p.has_text()) {
        let mut page = page.clone();
        let mut chars = page.char_len();

        if chars > max_chars {
            debug!(
                page = page.page_number,
                chars = chars,
                max_chars = max_chars,
                "Truncating oversized page"
            );
            page.content = truncate_chars(&page.content, max_chars);
            chars = max_chars;
        }

        let full = !current.is_empty()
            && (current_chars + chars > max_chars || current.len() >= max_pages);
        if full {
            chunks.push(DocumentChunk::new(chunks.len(), std::mem::take(&mut current)));
            current_chars = 0;
        }

        current_chars += chars;
        current.push(page);
    }

    if !current.is_empty() {
        chunks.push(DocumentChunk::new(chunks.len(), current));
    }

    chunks
}

/// First `max` characters of `s`, cut on a char boundary.
fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: u32, len: usize) -> PageText {
        PageText::new(n, "x".repeat(len))
    }

    #[test]
    fn test_groups_under_char_budget() {
        let pages = vec![page(1, 40), page(2, 40), page(3, 40)];
        let chunks = chunk_pages(&pages, 100, 10);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].pages.len(), 2);
        assert_eq!(chunks[1].first_page(), Some(3));
        assert_eq!(chunks[1].index, 1);
    }

    #[test]
    fn test_page_budget() {
        let pages: Vec<_> = (1..=5).map(|n| page(n, 1)).collect();
        let chunks = chunk_pages(&pages, 1000, 2);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].pages.len(), 1);
    }

    #[test]
    fn test_oversized_page_truncated() {
        let pages = vec![page(1, 10), PageText::new(2, "é".repeat(50)), page(3, 10)];
        let chunks = chunk_pages(&pages, 20, 10);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].pages[0].char_len(), 20);
    }

    #[test]
    fn test_skips_empty_pages() {
        let pages = vec![PageText::new(1, ""), page(2, 5), PageText::new(3, "  ")];
        let chunks = chunk_pages(&pages, 100, 10);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].label(), "page 2");
        assert!(chunk_pages(&[], 100, 10).is_empty());
    }
}
