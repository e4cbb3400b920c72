//! The detached poll-claim-execute worker loop (§4.4 "Worker loop").
//!
//! Generic over an [`Evaluator`] so `cb-worker`'s binary entrypoint can plug
//! in the real expression evaluator while tests exercise the loop against a
//! trivial one. Breaking the source's "evaluation via exceptions across a
//! network boundary" pattern (§9): `Evaluate` never propagates an error out
//! of the loop, it always returns a `ResultEnvelope`.

use std::time::Duration;

use async_trait::async_trait;
use cb_lifecycle::DetachedState;
use cb_object_store::{ObjectStore, PutOptions};
use cb_types::{keys, ResultEnvelope, TaskEnvelope};
use chrono::Utc;
use rand::seq::SliceRandom;
use uuid::Uuid;

use crate::claim::atomic_claim;
use crate::error::SessionError;
use crate::manifest_ops::load_manifest;
use crate::status::TaskStatus;

/// Evaluates a task's payload and never throws: infrastructure failures
/// aside, every outcome — success or evaluation error — becomes a
/// `ResultEnvelope` (§9 sum-type redesign note).
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, envelope: &TaskEnvelope) -> ResultEnvelope;
}

const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const IDLE_CAP: Duration = Duration::from_secs(5 * 60);

/// Run the poll-claim-execute loop for `session_id` until its absolute
/// deadline passes or the idle cap is reached with no work found. Returns
/// normally on either exit condition; errors are reserved for
/// infrastructure failures the evaluator itself cannot have caused.
pub async fn run_worker_loop<O, E>(store: &O, session_id: Uuid, worker_id: &str, evaluator: &E) -> Result<(), SessionError>
where
    O: ObjectStore,
    E: Evaluator,
{
    let mut backoff = MIN_BACKOFF;
    let mut idle_for = Duration::ZERO;

    loop {
        let (manifest, _etag) = load_manifest(store, session_id).await?;
        let now = Utc::now();
        if manifest.is_expired(now) {
            tracing::info!(session_id = %session_id, worker_id, "absolute deadline passed, worker exiting");
            return Ok(());
        }

        let mut candidates: Vec<Uuid> = Vec::new();
        let prefix = format!("sessions/{session_id}/tasks/");
        for item in store.list(&prefix).await? {
            if keys::is_bootstrap_key(&item.key) || !item.key.ends_with("status.blob") {
                continue;
            }
            let (bytes, _etag) = store.get(&item.key).await?;
            let status: TaskStatus = cb_codec::decode(&bytes)?;
            if status.state == DetachedState::Pending {
                candidates.push(status.task_id);
            }
        }

        if candidates.is_empty() {
            if idle_for >= IDLE_CAP {
                tracing::info!(session_id = %session_id, worker_id, "idle cap reached, worker exiting");
                return Ok(());
            }
            tokio::time::sleep(backoff).await;
            idle_for += backoff;
            backoff = (backoff * 2).min(MAX_BACKOFF);
            continue;
        }
        backoff = MIN_BACKOFF;
        idle_for = Duration::ZERO;

        candidates.shuffle(&mut rand::thread_rng());
        for task_id in candidates {
            if !atomic_claim(store, session_id, task_id, worker_id).await? {
                continue;
            }
            execute_claimed_task(store, session_id, task_id, evaluator).await?;
            break;
        }
    }
}

/// Run exactly one claimed task: download its envelope, mark it running,
/// evaluate, write the result, and write the terminal status. The status
/// write after evaluation is unconditional (ownership is already ours) but
/// must still be retried on transient errors so I3 holds — that retry lives
/// at the object-store layer, not here.
async fn execute_claimed_task<O, E>(store: &O, session_id: Uuid, task_id: Uuid, evaluator: &E) -> Result<(), SessionError>
where
    O: ObjectStore,
    E: Evaluator,
{
    let status_key = keys::session_task_status_key(session_id, task_id);

    // Ownership is already established by the claim; these status writes
    // are plain (unconditional) puts, not CAS (§4.4).
    let (status_bytes, _etag) = store.get(&status_key).await?;
    let mut status: TaskStatus = cb_codec::decode(&status_bytes)?;
    status.start_running(Utc::now());
    store.put(&status_key, cb_codec::encode(&status)?, PutOptions::default()).await?;

    let (envelope_bytes, _etag) = store.get(&keys::task_key(task_id)).await?;
    let envelope: TaskEnvelope = cb_codec::decode(&envelope_bytes)?;

    let result = evaluator.evaluate(&envelope).await;
    let result_bytes = cb_codec::encode(&result)?;
    store.put(&keys::result_key(task_id), result_bytes, PutOptions::default()).await?;

    let now = Utc::now();
    if result.error {
        status.fail(result.message.clone().unwrap_or_else(|| "task failed with no message".into()), now);
    } else {
        status.complete(now);
    }
    store.put(&status_key, cb_codec::encode(&status)?, PutOptions::default()).await?;

    tracing::debug!(session_id = %session_id, task_id = %task_id, error = result.error, "task finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_object_store::memory::InMemoryObjectStore;
    use cb_types::SessionManifest;

    struct SquareEvaluator;

    #[async_trait]
    impl Evaluator for SquareEvaluator {
        async fn evaluate(&self, envelope: &TaskEnvelope) -> ResultEnvelope {
            let x: i64 = cb_codec::decode(&envelope.payload).unwrap();
            let now = Utc::now();
            ResultEnvelope::ok(envelope.task_id, cb_codec::encode(&(x * x)).unwrap(), now, now)
        }
    }

    async fn seed_session(store: &InMemoryObjectStore, session_id: Uuid, task_id: Uuid, x: i64) {
        let manifest = SessionManifest::new(session_id, "bucket", Utc::now());
        let mbytes = cb_codec::encode(&manifest).unwrap();
        store
            .put(&keys::session_manifest_key(session_id), mbytes, PutOptions::default())
            .await
            .unwrap();

        let envelope = TaskEnvelope {
            task_id,
            session_id: Some(session_id),
            payload: cb_codec::encode(&x).unwrap(),
            env: Default::default(),
            created_at: Utc::now(),
        };
        let ebytes = cb_codec::encode(&envelope).unwrap();
        store.put(&keys::task_key(task_id), ebytes, PutOptions::default()).await.unwrap();

        let status = TaskStatus::pending(task_id, Utc::now());
        let sbytes = cb_codec::encode(&status).unwrap();
        store
            .put(&keys::session_task_status_key(session_id, task_id), sbytes, PutOptions::default())
            .await
            .unwrap();
    }

    // The task completes on the first pass, after which `candidates` is
    // permanently empty and the loop idle-polls up to `IDLE_CAP` before
    // returning. `start_paused` lets tokio auto-advance virtual time across
    // those sleeps instead of burning 5 minutes of real wall-clock.
    #[tokio::test(start_paused = true)]
    async fn single_task_is_claimed_executed_and_completed() {
        let store = InMemoryObjectStore::new();
        let session_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();
        seed_session(&store, session_id, task_id, 6).await;

        let evaluator = SquareEvaluator;
        run_worker_loop(&store, session_id, "worker-1", &evaluator).await.unwrap();

        let (bytes, _) = store.get(&keys::session_task_status_key(session_id, task_id)).await.unwrap();
        let status: TaskStatus = cb_codec::decode(&bytes).unwrap();
        assert_eq!(status.state, DetachedState::Completed);
        assert_eq!(status.claimed_by.as_deref(), Some("worker-1"));

        let (bytes, _) = store.get(&keys::result_key(task_id)).await.unwrap();
        let envelope: ResultEnvelope = cb_codec::decode(&bytes).unwrap();
        let value: i64 = cb_codec::decode(&envelope.value.unwrap()).unwrap();
        assert_eq!(value, 36);
    }

    #[tokio::test]
    async fn exits_promptly_once_absolute_deadline_has_passed() {
        let store = InMemoryObjectStore::new();
        let session_id = Uuid::new_v4();
        // No tasks exist; the loop must not idle-poll up to the 5 minute cap
        // once the session's deadline has already passed.
        let manifest = SessionManifest::new(session_id, "bucket", Utc::now() - chrono::Duration::seconds(1))
            .with_absolute_deadline(Utc::now() - chrono::Duration::milliseconds(1));
        let mbytes = cb_codec::encode(&manifest).unwrap();
        store
            .put(&keys::session_manifest_key(session_id), mbytes, PutOptions::default())
            .await
            .unwrap();

        let evaluator = SquareEvaluator;
        run_worker_loop(&store, session_id, "worker-1", &evaluator).await.unwrap();
    }
}
