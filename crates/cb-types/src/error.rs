//! Shared error model.
//!
//! Every crate in the workspace surfaces failures through this enum (or wraps
//! it via `#[from]`/`#[source]`) so callers see one consistent vocabulary
//! regardless of which component raised the error, per the error kinds
//! enumerated in the specification's error handling design.

use thiserror::Error;

/// A typed, contextual error shared across all cloudburst components.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration failed validation (programmer error, never retried).
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The caller is about to exceed a provider-imposed concurrency quota.
    /// Advisory: wave scheduling engages instead of this escalating.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The container service refused to launch one or more tasks.
    #[error("launch rejected: {reason} ({detail})")]
    LaunchRejected { reason: String, detail: String },

    /// An object-store key, container task, or other resource was absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// A conditional write lost the compare-and-swap race.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// A transient fault exhausted its retry budget.
    #[error("transient failure after retries: {0}")]
    Transient(String),

    /// An operation exceeded its configured deadline.
    #[error("timed out: {0}")]
    TimedOut(String),

    /// A task's result envelope carried `error = true`.
    #[error("task failed: {message}")]
    TaskFailed {
        message: String,
        stdout: Option<String>,
    },

    /// An invariant the system assumes can never be violated was violated.
    #[error("fatal invariant violation: {0}")]
    Fatal(String),
}

impl Error {
    /// Kinds that the retry policy is allowed to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// `PreconditionFailed` is expected to be handled locally by CAS/claim
    /// protocols and must never be allowed to escalate past them.
    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, Error::PreconditionFailed(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
