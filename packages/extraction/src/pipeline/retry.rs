//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first (at least 1)
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Wait before attempt `attempt + 1`, doubling each time and capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Anything that knows whether another attempt could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for crate::error::ExtractionError {
    fn is_retryable(&self) -> bool {
        crate::error::ExtractionError::is_retryable(self)
    }
}

impl Retryable for crate::error::PersistenceError {
    fn is_retryable(&self) -> bool {
        crate::error::PersistenceError::is_retryable(self)
    }
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error
    Exhausted { attempts: u32, last: E },
    /// A non-retryable error ended the loop early
    Fatal(E),
    /// The token was cancelled while waiting
    Cancelled,
}

impl<E> RetryError<E> {
    /// The underlying error, if any.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::Fatal(e) => Some(e),
            Self::Cancelled => None,
        }
    }
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted { attempts, last } => {
                write!(f, "gave up after {} attempts: {}", attempts, last)
            }
            Self::Fatal(e) => write!(f, "{}", e),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Run `op` until it succeeds, fails fatally, runs out of attempts or
/// `cancel` fires.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            outcome = op(attempt) => outcome,
        };

        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !error.is_retryable() {
            return Err(RetryError::Fatal(error));
        }
        if attempt >= max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: error,
            });
        }

        let delay = policy.backoff(attempt);
        warn!(
            label = label,
            attempt = attempt,
            max_attempts = max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Attempt failed, retrying..."
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
