//! Sustainability Indicator Extraction Library
//!
//! Extracts a fixed catalog of ESG indicators from corporate sustainability
//! reports with a language model, keeps the single best value per indicator
//! and stores it for comparison across companies.
//!
//! # Design Philosophy
//!
//! - The model reads, the library decides: replies are validated strictly
//!   and anything unusable is dropped, never guessed
//! - One row per (company, year, indicator), always, including the
//!   indicators nothing was found for
//! - A failed chunk, row or company never takes its siblings down
//! - Re-running is idempotent
//!
//! # Usage
//!
//! ```rust,ignore
//! use csrd_extraction::{CompanyJob, IndicatorCatalog, MemoryStore, Orchestrator};
//! use csrd_extraction::testing::MockExtractor;
//!
//! let extractor = MockExtractor::new().with_observation(12, "E1", Some(1234.0), 0.95);
//! let orchestrator = Orchestrator::new(
//!     Arc::new(extractor),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(IndicatorCatalog::builtin()),
//! );
//!
//! let report = orchestrator
//!     .run(vec![CompanyJob::new("Acme", 2024, "data/raw/acme_2024.pdf")])
//!     .await;
//! println!("{}", report);
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Core trait abstractions (Extractor, ResultStore)
//! - [`types`] - Catalog, pages, observations, results and summaries
//! - [`loader`] - PDF and text document loading
//! - [`pipeline`] - Chunking, extraction, aggregation and orchestration
//! - [`stores`] - Storage implementations (MemoryStore, SqliteStore)
//! - [`export`] - CSV export
//! - [`testing`] - Mock implementations for testing

pub mod error;
pub mod export;
pub mod loader;
pub mod pipeline;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

#[cfg(feature = "openai")]
pub mod ai;

// Re-export core types at crate root
pub use error::{
    CatalogError, ExportError, ExtractionError, FailureKind, LoadError, PersistenceError,
};
pub use traits::{
    extractor::{ExtractionRequest, Extractor, Verification, VerificationRequest},
    store::ResultStore,
};
pub use types::{
    catalog::{IndicatorCatalog, IndicatorGroup},
    config::PipelineConfig,
    indicator::{Category, IndicatorDefinition},
    observation::{AggregatedResult, Observation, ResultStatus},
    page::{DocumentChunk, PageText},
    summary::{CompanySummary, RunRecord, RunStatus},
};

pub use loader::{load_document, Pages};

// Re-export pipeline components
pub use pipeline::{
    // Orchestration
    CompanyJob, Orchestrator,
    // Progress
    CompanyState, ProgressEvent, ProgressHub,
    // Reporting
    ChunkFailure, CompanyOutcome, RowFailure, RunReport,
    // Building blocks
    aggregate, apply_verification, chunk_pages, parse_model_reply, parse_verification_reply,
    scan_table_patterns, select_relevant_pages, RetryPolicy,
};

pub use export::{export_csv, to_csv};

// Re-export stores
pub use stores::MemoryStore;

#[cfg(feature = "sqlite")]
pub use stores::SqliteStore;

#[cfg(feature = "openai")]
pub use ai::OpenAiExtractor;

// Re-export testing utilities
pub use testing::{FailingStore, MockExtractor, MockFailure};
