//! Progress events and the per-company state machine.
//!
//! Events are fire-and-forget: publishing with no subscribers is a no-op
//! and a slow subscriber lags rather than blocking the pipeline.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::FailureKind;
use crate::types::summary::CompanySummary;

/// Where a company is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanyState {
    Loading,
    Extracting,
    Aggregating,
    Persisting,
    Done,
    Failed,
}

impl CompanyState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// States advance strictly in order; `Failed` is reachable from any
    /// non-terminal state.
    pub fn can_transition_to(&self, next: CompanyState) -> bool {
        use CompanyState::*;
        matches!(
            (self, next),
            (Loading, Extracting)
                | (Extracting, Aggregating)
                | (Aggregating, Persisting)
                | (Persisting, Done)
        ) || (!self.is_terminal() && next == Failed)
    }
}

impl std::fmt::Display for CompanyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Loading => "loading",
            Self::Extracting => "extracting",
            Self::Aggregating => "aggregating",
            Self::Persisting => "persisting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Discrete progress notifications, serialized with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    StateChanged {
        company: String,
        report_year: i32,
        from: Option<CompanyState>,
        to: CompanyState,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    ChunkCompleted {
        company: String,
        group: String,
        chunk: usize,
        observations: usize,
    },
    ChunkFailed {
        company: String,
        group: String,
        chunk: usize,
        reason: FailureKind,
        error: String,
    },
    CompanyFinished {
        company: String,
        report_year: i32,
        state: CompanyState,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<CompanySummary>,
    },
    RunFinished {
        companies: usize,
        succeeded: usize,
        failed: usize,
    },
}

impl ProgressEvent {
    /// The serde tag, used as the SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::ChunkCompleted { .. } => "chunk_completed",
            Self::ChunkFailed { .. } => "chunk_failed",
            Self::CompanyFinished { .. } => "company_finished",
            Self::RunFinished { .. } => "run_finished",
        }
    }
}

/// In-process broadcast of progress events.
///
/// Cloneable; every clone publishes to the same subscribers.
#[derive(Clone)]
pub struct ProgressHub {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressHub {
    /// Create a hub with default capacity (256 events).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. No-op if no subscribers.
    pub fn publish(&self, event: ProgressEvent) {
        // Ignore send errors (no active receivers)
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks one company's state and reports each transition to the hub.
pub struct CompanyTracker {
    company: String,
    report_year: i32,
    state: Option<CompanyState>,
    hub: ProgressHub,
}

impl CompanyTracker {
    pub fn new(company: impl Into<String>, report_year: i32, hub: ProgressHub) -> Self {
        Self {
            company: company.into(),
            report_year,
            state: None,
            hub,
        }
    }

    pub fn state(&self) -> Option<CompanyState> {
        self.state
    }

    /// Move to `next`, publishing the transition.
    ///
    /// Returns false (and changes nothing) for an illegal transition.
    pub fn transition(&mut self, next: CompanyState, detail: Option<String>) -> bool {
        let legal = match self.state {
            None => next == CompanyState::Loading,
            Some(current) => current.can_transition_to(next),
        };
        if !legal {
            tracing::error!(
                company = %self.company,
                from = ?self.state,
                to = %next,
                "Illegal state transition"
            );
            return false;
        }

        self.hub.publish(ProgressEvent::StateChanged {
            company: self.company.clone(),
            report_year: self.report_year,
            from: self.state,
            to: next,
            detail,
        });
        self.state = Some(next);
        true
    }
}
