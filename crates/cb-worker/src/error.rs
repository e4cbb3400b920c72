//! Worker runtime errors. Reserved for infrastructure failures: a
//! malformed bootstrap envelope, or the object store itself misbehaving.
//! Evaluation failures never surface here — they're folded into the
//! `ResultEnvelope` the evaluator produces (§4.7 item 5).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    ObjectStore(#[from] cb_object_store::ObjectStoreError),

    #[error(transparent)]
    Session(#[from] cb_session::SessionError),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("bootstrap envelope for task {0} carries no session_id")]
    MissingSessionId(uuid::Uuid),
}

impl From<cb_codec::CodecError> for WorkerError {
    fn from(e: cb_codec::CodecError) -> Self {
        WorkerError::Codec(e.to_string())
    }
}

impl From<WorkerError> for cb_types::Error {
    fn from(e: WorkerError) -> Self {
        match e {
            WorkerError::ObjectStore(e) if e.is_retryable() => cb_types::Error::Transient(e.to_string()),
            WorkerError::ObjectStore(e) => cb_types::Error::Fatal(e.to_string()),
            WorkerError::Session(e) => e.into(),
            WorkerError::Codec(msg) => cb_types::Error::Fatal(msg),
            WorkerError::MissingSessionId(id) => {
                cb_types::Error::Fatal(format!("bootstrap envelope for {id} carries no session_id"))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;
