//! Configuration for the extraction pipeline.

use std::time::Duration;

use crate::pipeline::retry::RetryPolicy;

/// Tunables for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Character budget for one chunk.
    ///
    /// A single page over budget is truncated. Default: 40000.
    pub max_chunk_chars: usize,

    /// Page budget for one chunk. Default: 10.
    pub max_pages_per_chunk: usize,

    /// Model calls in flight per company. Default: 4.
    pub chunk_concurrency: usize,

    /// Retry policy for model calls.
    pub retry: RetryPolicy,

    /// Retry policy for row upserts.
    pub persist_retry: RetryPolicy,

    /// Bounded wait for one model call. Default: 120s.
    pub call_timeout: Duration,

    /// Preselect pages per indicator group by keyword relevance.
    ///
    /// Default: true.
    pub relevance_filter: bool,

    /// Try each indicator's table patterns before calling the model.
    ///
    /// Indicators with a confirmed pattern hit are left out of the model
    /// prompts. Default: true.
    pub pattern_scan: bool,

    /// Ask the model to re-check values with middling confidence.
    ///
    /// Default: true.
    pub verify_low_confidence: bool,

    /// Pages kept per group when the relevance filter is on. Default: 20.
    pub max_pages_per_group: usize,

    /// Results below this confidence are flagged for review. Default: 0.6.
    pub confidence_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 40_000,
            max_pages_per_chunk: 10,
            chunk_concurrency: 4,
            retry: RetryPolicy::default(),
            persist_retry: RetryPolicy::new(3)
                .with_backoff(Duration::from_millis(200), Duration::from_secs(2)),
            call_timeout: Duration::from_secs(120),
            relevance_filter: true,
            pattern_scan: true,
            verify_low_confidence: true,
            max_pages_per_group: 20,
            confidence_threshold: 0.6,
        }
    }
}

impl PipelineConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_chunk_chars(mut self, chars: usize) -> Self {
        self.max_chunk_chars = chars.max(1);
        self
    }

    pub fn with_max_pages_per_chunk(mut self, pages: usize) -> Self {
        self.max_pages_per_chunk = pages.max(1);
        self
    }

    pub fn with_chunk_concurrency(mut self, concurrency: usize) -> Self {
        self.chunk_concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_persist_retry(mut self, retry: RetryPolicy) -> Self {
        self.persist_retry = retry;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Enable or disable relevance filtering.
    pub fn with_relevance_filter(mut self, enabled: bool) -> Self {
        self.relevance_filter = enabled;
        self
    }

    pub fn with_pattern_scan(mut self, enabled: bool) -> Self {
        self.pattern_scan = enabled;
        self
    }

    pub fn with_verification(mut self, enabled: bool) -> Self {
        self.verify_low_confidence = enabled;
        self
    }

    pub fn with_max_pages_per_group(mut self, pages: usize) -> Self {
        self.max_pages_per_group = pages.max(1);
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold.clamp(0.0, 1.0);
        self
    }
}
