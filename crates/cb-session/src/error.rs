//! Error model for the detached session core.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(Uuid),

    /// Reattach refused: the session's absolute deadline has passed (B5).
    #[error("session {session_id} expired at {deadline}")]
    Expired {
        session_id: Uuid,
        deadline: DateTime<Utc>,
    },

    /// Manifest CAS update lost the race more times than the retry budget
    /// allows (§4.4 manifest CAS update).
    #[error("manifest update for session {session_id} exhausted retry budget after {attempts} attempts")]
    ManifestContention { session_id: Uuid, attempts: u32 },

    #[error(transparent)]
    ObjectStore(#[from] cb_object_store::ObjectStoreError),

    #[error(transparent)]
    ContainerService(#[from] cb_container_service::ContainerServiceError),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("task {task_id} failed: {message}")]
    TaskFailed { task_id: Uuid, message: String },

    #[error("timed out: {0}")]
    TimedOut(String),

    /// Wiring failures from facade-level collaborators the session core
    /// itself never touches (the task-definition cache, the pool manager).
    #[error("{0}")]
    Other(String),
}

impl From<cb_codec::CodecError> for SessionError {
    fn from(e: cb_codec::CodecError) -> Self {
        SessionError::Codec(e.to_string())
    }
}

/// Bridges to the workspace-shared error vocabulary for callers (the root
/// crate's CLI, `cb-worker`) that only want to handle one `Error` type.
impl From<SessionError> for cb_types::Error {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound(id) => cb_types::Error::NotFound(id.to_string()),
            SessionError::Expired { session_id, deadline } => {
                cb_types::Error::Fatal(format!("session {session_id} expired at {deadline}"))
            }
            SessionError::ManifestContention { session_id, attempts } => {
                cb_types::Error::Transient(format!("manifest CAS for {session_id} exhausted after {attempts} attempts"))
            }
            SessionError::ObjectStore(e) if e.is_retryable() => cb_types::Error::Transient(e.to_string()),
            SessionError::ObjectStore(e) => cb_types::Error::Fatal(e.to_string()),
            SessionError::ContainerService(e) if e.is_retryable() => cb_types::Error::Transient(e.to_string()),
            SessionError::ContainerService(cb_container_service::ContainerServiceError::LaunchRejected {
                reason,
                detail,
            }) => cb_types::Error::LaunchRejected { reason, detail },
            SessionError::ContainerService(e) => cb_types::Error::Fatal(e.to_string()),
            SessionError::Codec(msg) => cb_types::Error::Fatal(msg),
            SessionError::TaskFailed { message, .. } => cb_types::Error::TaskFailed { message, stdout: None },
            SessionError::TimedOut(msg) => cb_types::Error::TimedOut(msg),
            SessionError::Other(msg) => cb_types::Error::Fatal(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
