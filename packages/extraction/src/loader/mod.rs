//! Document loading - source file to a lazy sequence of pages.
//!
//! Loading is blocking (file IO and PDF decoding); async callers should run
//! it on the blocking pool.

pub mod pdf;
pub mod text;

use std::path::Path;

use crate::error::{LoadError, LoadResult};
use crate::types::page::PageText;

pub use pdf::PdfPages;
pub use text::TextPages;

/// Lazy, single-pass iterator over a document's pages, in page order.
pub enum Pages {
    Pdf(PdfPages),
    Text(TextPages),
}

impl Iterator for Pages {
    type Item = PageText;

    fn next(&mut self) -> Option<PageText> {
        match self {
            Self::Pdf(pages) => pages.next(),
            Self::Text(pages) => pages.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            Self::Pdf(pages) => pages.size_hint(),
            Self::Text(pages) => pages.size_hint(),
        }
    }
}

impl Pages {
    /// Total pages in the document, pulled or not.
    pub fn page_count(&self) -> usize {
        match self {
            Self::Pdf(pages) => pages.page_count(),
            Self::Text(pages) => pages.page_count(),
        }
    }
}

/// Open a document and return its pages.
///
/// `.pdf` files are decoded per page on demand; `.md` and `.txt` files are
/// preprocessed text with pages separated by `---PAGE BREAK---`.
pub fn load_document(path: impl AsRef<Path>) -> LoadResult<Pages> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(LoadError::NotFound {
            path: path.to_path_buf(),
        });
    }
    if !path.is_file() {
        return Err(LoadError::Invalid {
            path: path.to_path_buf(),
            reason: "not a regular file".to_string(),
        });
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("pdf") => PdfPages::open(path).map(Pages::Pdf),
        Some("md") | Some("txt") | Some("markdown") => TextPages::open(path).map(Pages::Text),
        _ => Err(LoadError::Unsupported {
            path: path.to_path_buf(),
        }),
    }
}
