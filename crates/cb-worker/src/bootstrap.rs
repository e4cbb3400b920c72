//! Bootstrap envelope handling for detached workers (§4.2/§4.4): a detached
//! worker container is launched with only a task id via the shared
//! `RunTask` wrapper, and that task's envelope carries the session id —
//! this is what unifies the ephemeral and detached launch paths.

use cb_object_store::ObjectStore;
use cb_types::{keys, TaskEnvelope};
use uuid::Uuid;

use crate::error::{Result, WorkerError};

/// Resolve the session id a detached worker should join from its bootstrap
/// task id.
pub async fn resolve_session_id<O: ObjectStore>(store: &O, bootstrap_task_id: Uuid) -> Result<Uuid> {
    let (bytes, _etag) = store.get(&keys::task_key(bootstrap_task_id)).await?;
    let envelope: TaskEnvelope = cb_codec::decode(&bytes)?;
    envelope.session_id.ok_or(WorkerError::MissingSessionId(bootstrap_task_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_object_store::memory::InMemoryObjectStore;
    use cb_object_store::PutOptions;
    use chrono::Utc;

    #[tokio::test]
    async fn resolves_session_id_from_bootstrap_envelope() {
        let store = InMemoryObjectStore::new();
        let bootstrap_task_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let envelope = TaskEnvelope {
            task_id: bootstrap_task_id,
            session_id: Some(session_id),
            payload: Vec::new(),
            env: Default::default(),
            created_at: Utc::now(),
        };
        store
            .put(&keys::task_key(bootstrap_task_id), cb_codec::encode(&envelope).unwrap(), PutOptions::default())
            .await
            .unwrap();

        let resolved = resolve_session_id(&store, bootstrap_task_id).await.unwrap();
        assert_eq!(resolved, session_id);
    }

    #[tokio::test]
    async fn missing_session_id_is_reported_not_panicked() {
        let store = InMemoryObjectStore::new();
        let bootstrap_task_id = Uuid::new_v4();
        let envelope = TaskEnvelope {
            task_id: bootstrap_task_id,
            session_id: None,
            payload: Vec::new(),
            env: Default::default(),
            created_at: Utc::now(),
        };
        store
            .put(&keys::task_key(bootstrap_task_id), cb_codec::encode(&envelope).unwrap(), PutOptions::default())
            .await
            .unwrap();

        let err = resolve_session_id(&store, bootstrap_task_id).await.unwrap_err();
        assert!(matches!(err, WorkerError::MissingSessionId(_)));
    }
}
