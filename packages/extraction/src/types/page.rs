//! Page types - extracted page text and the chunks sent to the model.

use serde::{Deserialize, Serialize};

/// Text of a single document page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    /// 1-based page number within the source document
    pub page_number: u32,

    /// Extracted text (may be empty for image-only pages)
    pub content: String,
}

impl PageText {
    pub fn new(page_number: u32, content: impl Into<String>) -> Self {
        Self {
            page_number,
            content: content.into(),
        }
    }

    /// Whether the page carries any non-whitespace text.
    pub fn has_text(&self) -> bool {
        !self.content.trim().is_empty()
    }

    /// Character count of the content.
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// Ordered run of consecutive pages; the unit of one model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChunk {
    /// Position of the chunk within its indicator group
    pub index: usize,

    /// Pages in document order, never empty
    pub pages: Vec<PageText>,
}

impl DocumentChunk {
    pub fn new(index: usize, pages: Vec<PageText>) -> Self {
        Self { index, pages }
    }

    pub fn first_page(&self) -> Option<u32> {
        self.pages.first().map(|p| p.page_number)
    }

    pub fn last_page(&self) -> Option<u32> {
        self.pages.last().map(|p| p.page_number)
    }

    /// Whether `page` is one of the pages in this chunk.
    pub fn contains_page(&self, page: u32) -> bool {
        self.pages.iter().any(|p| p.page_number == page)
    }

    /// Total characters across pages.
    pub fn char_len(&self) -> usize {
        self.pages.iter().map(PageText::char_len).sum()
    }

    /// Render the chunk for a prompt, marking every page boundary so the
    /// model can report `source_page`.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.char_len() + self.pages.len() * 24);
        for page in &self.pages {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&format!("=== PAGE {} ===\n", page.page_number));
            out.push_str(page.content.trim());
        }
        out
    }

    /// Short label for logs, e.g. `pages 3-7`.
    pub fn label(&self) -> String {
        match (self.first_page(), self.last_page()) {
            (Some(a), Some(b)) if a == b => format!("page {}", a),
            (Some(a), Some(b)) => format!("pages {}-{}", a, b),
            _ => "empty chunk".to_string(),
        }
    }
}
