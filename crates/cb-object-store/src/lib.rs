//! Object store client: the `Put`/`Get`/`Head`/`List`/`Delete` surface every
//! other component in the workspace talks to, plus the conditional-put
//! (`IfMatch` ETag precondition) that the detached session core's claim
//! protocol and manifest CAS depend on.
//!
//! The trait is implemented twice: [`s3::S3ObjectStore`] against a real
//! bucket, and [`memory::InMemoryObjectStore`] for tests. Both share one
//! retry-wrapped contract so callers never need to know which they're
//! talking to.

pub mod memory;
pub mod s3;

use async_trait::async_trait;
use thiserror::Error;

/// Options accepted by [`ObjectStore::put`].
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Conditional-put precondition: only write if the object's current
    /// ETag matches. `None` means an unconditional put (create-or-overwrite).
    pub if_match: Option<String>,
    /// Request server-side encryption, where the backend supports it.
    pub sse: bool,
}

impl PutOptions {
    pub fn if_match(etag: impl Into<String>) -> Self {
        Self {
            if_match: Some(etag.into()),
            sse: false,
        }
    }
}

/// One key returned from a [`ObjectStore::list`] page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedKey {
    pub key: String,
}

/// Outcome of a batch [`ObjectStore::delete`].
#[derive(Debug, Clone, Default)]
pub struct DeleteOutcome {
    pub deleted: Vec<String>,
    pub errors: Vec<(String, String)>,
}

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    /// `IfMatch` didn't match the object's current ETag: another writer won
    /// the race. Never escalates past the CAS protocols that use it (I4/I5).
    #[error("precondition failed on {key}")]
    PreconditionFailed { key: String },

    /// Throttling, timeouts, 5xx, `SlowDown` — the retryable set.
    #[error("transient object-store error: {0}")]
    Transient(String),

    #[error("object-store error: {0}")]
    Other(String),
}

impl ObjectStoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ObjectStoreError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, ObjectStoreError>;

/// Put/Get/Head/List/Delete on a bucket, wrapped by a retry policy at the
/// implementation layer. `put` with `IfMatch` set is the linchpin of
/// invariants I4 (exactly-once claim) and I5 (manifest CAS) and must be
/// bit-exact: it either lands atomically against the precondition, or fails
/// with `PreconditionFailed` and leaves the object untouched.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `bytes` under `key`. Returns the object's new ETag.
    async fn put(&self, key: &str, bytes: Vec<u8>, opts: PutOptions) -> Result<String>;

    /// Read an object's bytes and current ETag. `NotFound` is distinct from
    /// a transient failure.
    async fn get(&self, key: &str) -> Result<(Vec<u8>, String)>;

    /// Check existence without erroring on absence.
    async fn head(&self, key: &str) -> Result<Option<String>>;

    /// List keys under `prefix`. Order is unspecified; callers that need a
    /// stable order sort client-side.
    async fn list(&self, prefix: &str) -> Result<Vec<ListedKey>>;

    /// Delete up to `keys.len()` objects; partial failures are reported in
    /// the outcome rather than surfaced as an overall error.
    async fn delete(&self, keys: &[String]) -> Result<DeleteOutcome>;
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryObjectStore;
    use super::*;

    #[tokio::test]
    async fn head_never_throws_on_absence() {
        let store = InMemoryObjectStore::new();
        assert_eq!(store.head("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_distinguishes_not_found() {
        let store = InMemoryObjectStore::new();
        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::NotFound(_)));
    }
}
