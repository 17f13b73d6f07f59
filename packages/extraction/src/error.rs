//! Typed errors for the extraction library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling. Each pipeline stage has its
//! own error so the orchestrator can decide what is fatal, what is retried
//! and what is isolated.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while turning a source document into pages.
///
/// Fatal for the company being processed, never for its siblings.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The path does not exist
    #[error("document not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// The file exists but is not a readable document
    #[error("invalid document {}: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },

    /// No loader handles this file type
    #[error("unsupported document type: {}", path.display())]
    Unsupported { path: PathBuf },

    /// Reading the file failed
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by a model call for one chunk.
///
/// Everything except `Cancelled` and `Config` is retryable.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The call exceeded its bounded wait
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    /// Transport failure or non-success response from the model service
    #[error("model service error: {0}")]
    Service(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The reply could not be parsed into the expected schema
    #[error("invalid model reply: {0}")]
    InvalidReply(String),

    /// The model returned no content at all
    #[error("empty model reply")]
    EmptyReply,

    /// Operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Client misconfiguration (missing key, bad URL)
    #[error("config error: {0}")]
    Config(String),
}

impl ExtractionError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::Config(_))
    }

    /// Coarse classification used for end-of-run reporting.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) => FailureKind::Timeout,
            Self::InvalidReply(_) | Self::EmptyReply => FailureKind::InvalidSchema,
            Self::Cancelled => FailureKind::Cancelled,
            Self::Service(_) | Self::Config(_) => FailureKind::ModelError,
        }
    }
}

/// Why a chunk produced no observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    InvalidSchema,
    ModelError,
    Cancelled,
}

/// Errors raised by the durable store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// A uniqueness, check or not-null constraint rejected the row
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The store could not be reached
    #[error("connection failed: {0}")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Any other query failure
    #[error("query failed: {0}")]
    Query(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A stored row could not be decoded
    #[error("corrupt row: {0}")]
    Decode(String),
}

impl PersistenceError {
    /// Constraint and decode failures will fail again; the rest may not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Query(_))
    }
}

/// Errors raised while loading the indicator catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog: {0}")]
    Parse(String),

    #[error("duplicate indicator id: {0}")]
    DuplicateId(String),

    #[error("indicator definition is missing a {field}")]
    MissingField { field: &'static str },

    #[error("invalid table pattern for {id}: {reason}")]
    InvalidPattern { id: String, reason: String },

    #[error("catalog contains no indicators")]
    Empty,
}

/// Errors raised while writing the CSV export.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read results: {0}")]
    Store(#[from] PersistenceError),
}

/// Result type alias for document loading.
pub type LoadResult<T> = std::result::Result<T, LoadError>;

/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractionError>;

/// Result type alias for store operations.
pub type PersistenceResult<T> = std::result::Result<T, PersistenceError>;

/// Result type alias for catalog operations.
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;
