//! The atomic claim protocol (§4.4): each worker reads a candidate status,
//! mutates it to `claimed` in memory, and writes it back conditioned on the
//! ETag it read. Losing the race is an ordinary, expected outcome, never an
//! error — it just means another worker got there first (D1/I4/P1/R3).

use cb_lifecycle::DetachedState;
use cb_object_store::{ObjectStore, ObjectStoreError, PutOptions};
use cb_types::keys;
use chrono::Utc;
use uuid::Uuid;

use crate::error::SessionError;
use crate::status::TaskStatus;

/// Attempt to claim `task_id` on behalf of `worker_id`. Returns `true` iff
/// this call won the race.
pub async fn atomic_claim<O: ObjectStore>(
    store: &O,
    session_id: Uuid,
    task_id: Uuid,
    worker_id: &str,
) -> Result<bool, SessionError> {
    let key = keys::session_task_status_key(session_id, task_id);
    let (bytes, etag) = store.get(&key).await?;
    let mut status: TaskStatus = cb_codec::decode(&bytes)?;
    if status.state != DetachedState::Pending {
        return Ok(false);
    }
    status.claim(worker_id, Utc::now());
    let encoded = cb_codec::encode(&status)?;
    match store.put(&key, encoded, PutOptions::if_match(etag)).await {
        Ok(_) => Ok(true),
        Err(ObjectStoreError::PreconditionFailed { .. }) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_object_store::memory::InMemoryObjectStore;

    async fn seed_pending(store: &InMemoryObjectStore, session_id: Uuid, task_id: Uuid) {
        let status = TaskStatus::pending(task_id, Utc::now());
        let bytes = cb_codec::encode(&status).unwrap();
        store
            .put(&keys::session_task_status_key(session_id, task_id), bytes, PutOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn second_claim_on_same_task_loses() {
        let store = InMemoryObjectStore::new();
        let session_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();
        seed_pending(&store, session_id, task_id).await;

        assert!(atomic_claim(&store, session_id, task_id, "worker-a").await.unwrap());
        assert!(!atomic_claim(&store, session_id, task_id, "worker-b").await.unwrap());
    }

    #[tokio::test]
    async fn exactly_one_winner_among_concurrent_claimers() {
        use std::sync::Arc;

        let store = InMemoryObjectStore::shared();
        let session_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();
        seed_pending(&store, session_id, task_id).await;

        let mut handles = Vec::new();
        for i in 0..5 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                atomic_claim(&*store, session_id, task_id, &format!("worker-{i}")).await.unwrap()
            }));
        }
        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1, "exactly one worker claims the task (P1)");

        let key = keys::session_task_status_key(session_id, task_id);
        let (bytes, _) = store.get(&key).await.unwrap();
        let status: TaskStatus = cb_codec::decode(&bytes).unwrap();
        assert_eq!(status.state, DetachedState::Claimed);
    }
}
