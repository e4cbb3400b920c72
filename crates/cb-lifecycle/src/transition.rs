use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single recorded move from one state to another. Kept as a history list
/// on the owning task/session record so a stuck task can be diagnosed after
/// the fact without re-deriving it from object-store timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition<S> {
    pub from: S,
    pub to: S,
    pub at: DateTime<Utc>,
    pub detail: Option<String>,
}

impl<S: Clone> StateTransition<S> {
    pub fn new(from: S, to: S, at: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            at,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// A state transition was attempted that the lifecycle graph does not
/// permit (invariant: task states move forward only, never backward).
#[derive(Debug, Error)]
#[error("invalid transition from {from} to {to}: states move forward only")]
pub struct TransitionError {
    pub from: String,
    pub to: String,
}
