//! Extraction pipeline - the core of the library.
//!
//! The pipeline orchestrates:
//! - A regex fast path over the raw pages
//! - Relevance preselection of pages per indicator group
//! - Chunking under a size budget
//! - Model calls with timeout, retry and bounded concurrency
//! - Strict reply validation
//! - Aggregation to one best result per indicator
//! - A verification pass over middling-confidence values
//! - Isolated per-row persistence and progress reporting

pub mod aggregate;
pub mod chunk;
pub mod events;
pub mod orchestrator;
pub mod parse;
pub mod patterns;
pub mod prompts;
pub mod relevance;
pub mod report;
pub mod retry;
pub mod verify;

pub use aggregate::{aggregate, FailureLog};
pub use chunk::chunk_pages;
pub use events::{CompanyState, CompanyTracker, ProgressEvent, ProgressHub};
pub use orchestrator::{CompanyJob, Orchestrator};
pub use parse::{parse_model_reply, strip_code_fence};
pub use patterns::{find_pattern_value, scan_table_patterns, PatternHit, PATTERN_CONFIDENCE};
pub use prompts::{build_extraction_prompt, build_verification_prompt, SYSTEM_PROMPT};
pub use relevance::{score_page, select_relevant_pages};
pub use report::{ChunkFailure, CompanyOutcome, RowFailure, RunReport};
pub use retry::{with_retry, RetryError, RetryPolicy, Retryable};
pub use verify::{
    apply_verification, needs_verification, parse_verification_reply, verification_excerpt,
};
