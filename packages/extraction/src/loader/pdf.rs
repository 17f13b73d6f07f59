//! PDF documents via `lopdf`.

use std::path::{Path, PathBuf};

use lopdf::Document;
use tracing::warn;

use crate::error::{LoadError, LoadResult};
use crate::types::page::PageText;

/// Pages of a PDF, decoded one at a time as they are pulled.
pub struct PdfPages {
    path: PathBuf,
    document: Document,
    page_numbers: std::vec::IntoIter<u32>,
    total: usize,
}

impl PdfPages {
    /// Parse the document structure. Page text is not decoded yet.
    pub fn open(path: &Path) -> LoadResult<Self> {
        let document = Document::load(path).map_err(|e| LoadError::Invalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        // get_pages is keyed by 1-based page number, already ordered
        let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        let total = page_numbers.len();

        Ok(Self {
            path: path.to_path_buf(),
            document,
            page_numbers: page_numbers.into_iter(),
            total,
        })
    }

    pub fn page_count(&self) -> usize {
        self.total
    }
}

impl Iterator for PdfPages {
    type Item = PageText;

    fn next(&mut self) -> Option<PageText> {
        let page_number = self.page_numbers.next()?;

        let content = match self.document.extract_text(&[page_number]) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    page = page_number,
                    error = %e,
                    "Failed to extract page text, keeping empty page"
                );
                String::new()
            }
        };

        Some(PageText::new(page_number, content))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.page_numbers.size_hint()
    }
}
