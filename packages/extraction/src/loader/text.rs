//! Preprocessed text documents (`---PAGE BREAK---` separated).

use std::path::Path;

use crate::error::{LoadError, LoadResult};
use crate::types::page::PageText;

/// Marker between pages in preprocessed documents.
pub const PAGE_BREAK: &str = "---PAGE BREAK---";

/// Pages of a preprocessed text document.
pub struct TextPages {
    pages: std::vec::IntoIter<String>,
    next_page: u32,
    total: usize,
}

impl TextPages {
    /// Read the file; page splitting happens up front, it is cheap.
    pub fn open(path: &Path) -> LoadResult<Self> {
        let raw = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8(raw).map_err(|e| LoadError::Invalid {
            path: path.to_path_buf(),
            reason: format!("not valid UTF-8: {}", e),
        })?;

        Ok(Self::from_text(&text))
    }

    /// Split already-loaded text into pages.
    pub fn from_text(text: &str) -> Self {
        let pages: Vec<String> = if text.trim().is_empty() {
            Vec::new()
        } else {
            text.split(PAGE_BREAK).map(|p| p.trim().to_string()).collect()
        };
        let total = pages.len();

        Self {
            pages: pages.into_iter(),
            next_page: 1,
            total,
        }
    }

    pub fn page_count(&self) -> usize {
        self.total
    }
}

impl Iterator for TextPages {
    type Item = PageText;

    fn next(&mut self) -> Option<PageText> {
        let content = self.pages.next()?;
        let page = PageText::new(self.next_page, content);
        self.next_page += 1;
        Some(page)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.pages.size_hint()
    }
}
