//! The detached session client: a pure, stateless wrapper around the
//! object store (§9 "model ... as a pure stateless client talking only to
//! the object store"). No process holds authoritative state; every method
//! re-reads whatever it needs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cb_container_service::ContainerService;
use cb_lifecycle::DetachedState;
use cb_object_store::{ObjectStore, PutOptions};
use cb_types::{keys, ClusterConfig, ResultEnvelope, SessionManifest, TaskEnvelope};
use chrono::Utc;
use uuid::Uuid;

use crate::error::SessionError;
use crate::manifest_ops::{load_manifest, update_manifest};
use crate::status::TaskStatus;

/// Authoritative counts from enumerating status objects (I5: manifest
/// `stats` counters are advisory only). `claimed` is folded into `running`
/// for user-facing reporting per §4.4.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub total: u64,
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

/// A handle to a detached session. Cheap to construct, cheap to drop —
/// reattaching just means constructing another one with the same
/// `session_id`.
pub struct SessionClient<O: ObjectStore, C: ContainerService> {
    pub session_id: Uuid,
    pub config: ClusterConfig,
    object_store: Arc<O>,
    container_service: Arc<C>,
}

impl<O: ObjectStore, C: ContainerService> SessionClient<O, C> {
    /// `CreateSession`: writes a fresh, empty manifest and returns a client
    /// bound to the new session id.
    pub async fn create(
        config: ClusterConfig,
        object_store: Arc<O>,
        container_service: Arc<C>,
        absolute_timeout_s: Option<u64>,
    ) -> Result<Self, SessionError> {
        let session_id = Uuid::new_v4();
        let now = Utc::now();
        let mut manifest = SessionManifest::new(session_id, config.bucket.clone(), now);
        if let Some(secs) = absolute_timeout_s {
            manifest = manifest.with_absolute_deadline(now + chrono::Duration::seconds(secs as i64));
        }
        let encoded = cb_codec::encode(&manifest)?;
        object_store
            .put(&keys::session_manifest_key(session_id), encoded, PutOptions::default())
            .await?;

        tracing::info!(session_id = %session_id, "session created");
        Ok(Self {
            session_id,
            config,
            object_store,
            container_service,
        })
    }

    /// `AttachSession`: rejects an expired session (B5) before anything
    /// else; otherwise just binds the id, since no other client-side state
    /// exists to reconstruct.
    pub async fn attach(
        session_id: Uuid,
        config: ClusterConfig,
        object_store: Arc<O>,
        container_service: Arc<C>,
    ) -> Result<Self, SessionError> {
        let (manifest, _etag) = load_manifest(&*object_store, session_id).await?;
        let now = Utc::now();
        if manifest.is_expired(now) {
            return Err(SessionError::Expired {
                session_id,
                deadline: manifest.absolute_deadline.expect("is_expired implies a deadline"),
            });
        }
        Ok(Self {
            session_id,
            config,
            object_store,
            container_service,
        })
    }

    /// `session.Submit`: uploads the envelope, then the `pending` status,
    /// then CAS-updates the manifest. Envelope-before-status ordering is
    /// deliberate (P4): no reader ever observes a `pending` status whose
    /// envelope is absent.
    pub async fn submit(&self, expr: Vec<u8>, globals: Vec<u8>) -> Result<Uuid, SessionError> {
        let task_id = Uuid::new_v4();
        let now = Utc::now();

        let envelope = TaskEnvelope {
            task_id,
            session_id: Some(self.session_id),
            payload: cb_codec::encode(&(expr, globals))?,
            env: Default::default(),
            created_at: now,
        };
        let envelope_bytes = cb_codec::encode(&envelope)?;
        self.object_store
            .put(&keys::task_key(task_id), envelope_bytes, PutOptions::default())
            .await?;

        let status = TaskStatus::pending(task_id, now);
        let status_bytes = cb_codec::encode(&status)?;
        self.object_store
            .put(
                &keys::session_task_status_key(self.session_id, task_id),
                status_bytes,
                PutOptions::default(),
            )
            .await?;

        update_manifest(&*self.object_store, self.session_id, |m| m.add_task(task_id)).await?;

        tracing::debug!(session_id = %self.session_id, task_id = %task_id, "task submitted");
        Ok(task_id)
    }

    async fn status_entries(&self) -> Result<Vec<TaskStatus>, SessionError> {
        let prefix = format!("sessions/{}/tasks/", self.session_id);
        let listed = self.object_store.list(&prefix).await?;
        let mut entries = Vec::new();
        for item in listed {
            if keys::is_bootstrap_key(&item.key) || !item.key.ends_with("status.blob") {
                continue;
            }
            let (bytes, _etag) = self.object_store.get(&item.key).await?;
            entries.push(cb_codec::decode(&bytes)?);
        }
        Ok(entries)
    }

    /// `session.Status`: enumerate, tally by state. O(total tasks) in list
    /// operations — the acknowledged cost of avoiding shared mutable state
    /// (§4.4).
    pub async fn status(&self) -> Result<SessionStats, SessionError> {
        let mut stats = SessionStats::default();
        for status in self.status_entries().await? {
            stats.total += 1;
            match status.state {
                DetachedState::Pending => stats.pending += 1,
                DetachedState::Claimed | DetachedState::Running => stats.running += 1,
                DetachedState::Completed => stats.completed += 1,
                DetachedState::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    /// `session.Collect`: repeatedly enumerate statuses, downloading
    /// results for newly-completed tasks. With `wait = false`, returns
    /// after one pass (B4: no completed tasks yields an empty map
    /// promptly). With `wait = true`, blocks (2s poll) until every task is
    /// terminal or `timeout` elapses.
    pub async fn collect(&self, wait: bool, timeout: Option<Duration>) -> Result<HashMap<Uuid, Vec<u8>>, SessionError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut collected = HashMap::new();

        loop {
            let entries = self.status_entries().await?;
            let mut all_terminal = true;
            for status in &entries {
                if !status.state.is_terminal() {
                    all_terminal = false;
                    continue;
                }
                if status.state == DetachedState::Completed && !collected.contains_key(&status.task_id) {
                    let (bytes, _etag) = self.object_store.get(&keys::result_key(status.task_id)).await?;
                    let envelope: ResultEnvelope = cb_codec::decode(&bytes)?;
                    collected.insert(status.task_id, envelope.value.unwrap_or_default());
                }
            }

            if !wait || all_terminal {
                return Ok(collected);
            }
            if let Some(dl) = deadline {
                if Instant::now() >= dl {
                    return Err(SessionError::TimedOut(format!(
                        "session {} did not reach all-terminal before the collect deadline",
                        self.session_id
                    )));
                }
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    /// `session.Cleanup`: best-effort stop of this session's running
    /// container tasks, optional bulk delete of everything under
    /// `sessions/<sid>/**` plus the matching `tasks/**`/`results/**`
    /// entries, paged at 1000 keys per delete call; otherwise the manifest
    /// is simply marked closed.
    pub async fn cleanup(&self, stop_workers: bool, force: bool) -> Result<(), SessionError> {
        let (manifest, _etag) = load_manifest(&*self.object_store, self.session_id).await?;

        if stop_workers {
            for arn in &manifest.container_task_arns {
                if let Err(e) = self
                    .container_service
                    .stop_task(&self.config.cluster_name, arn, "session cleanup")
                    .await
                {
                    tracing::warn!(session_id = %self.session_id, arn, error = %e, "best-effort stop_task failed");
                }
            }
        }

        if force {
            let mut doomed: Vec<String> = self
                .object_store
                .list(&format!("sessions/{}/", self.session_id))
                .await?
                .into_iter()
                .map(|k| k.key)
                .collect();
            for task_id in manifest.tasks.keys() {
                doomed.push(keys::task_key(*task_id));
                doomed.push(keys::result_key(*task_id));
            }
            for chunk in doomed.chunks(1000) {
                self.object_store.delete(chunk).await?;
            }
            tracing::info!(session_id = %self.session_id, keys = doomed.len(), "force cleanup deleted session keys");
        } else {
            update_manifest(&*self.object_store, self.session_id, |m| m.closed = true).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_container_service::memory::InMemoryContainerService;
    use cb_object_store::memory::InMemoryObjectStore;

    fn config() -> ClusterConfig {
        ClusterConfig::builder()
            .workers(5)
            .cpu(1.0)
            .memory("2GB")
            .region("us-east-1")
            .image_ref("example.com/worker:latest")
            .bucket("cloudburst-bucket")
            .cluster_name("test-cluster")
            .account_id("123456789012")
            .subnet("subnet-aaa")
            .security_group("sg-aaa")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn submit_writes_envelope_before_status_is_visible() {
        let store = InMemoryObjectStore::shared();
        let container = InMemoryContainerService::shared();
        let client = SessionClient::create(config(), store.clone(), container, None).await.unwrap();

        let task_id = client.submit(vec![1, 2, 3], vec![]).await.unwrap();
        assert!(store.head(&keys::task_key(task_id)).await.unwrap().is_some(), "envelope exists (P4)");
        let stats = client.status().await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn collect_without_wait_returns_empty_map_promptly() {
        let store = InMemoryObjectStore::shared();
        let container = InMemoryContainerService::shared();
        let client = SessionClient::create(config(), store, container, None).await.unwrap();
        client.submit(vec![1], vec![]).await.unwrap();

        let collected = client.collect(false, None).await.unwrap();
        assert!(collected.is_empty(), "B4: no completed tasks yields an empty map");
    }

    #[tokio::test]
    async fn attach_refuses_expired_session() {
        let store = InMemoryObjectStore::shared();
        let container = InMemoryContainerService::shared();
        let client = SessionClient::create(config(), store.clone(), container.clone(), Some(0))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let err = SessionClient::attach(client.session_id, config(), store, container).await.unwrap_err();
        assert!(matches!(err, SessionError::Expired { .. }));
    }

    #[tokio::test]
    async fn cleanup_without_force_marks_manifest_closed() {
        let store = InMemoryObjectStore::shared();
        let container = InMemoryContainerService::shared();
        let client = SessionClient::create(config(), store.clone(), container, None).await.unwrap();

        client.cleanup(false, false).await.unwrap();
        let (manifest, _) = load_manifest(&*store, client.session_id).await.unwrap();
        assert!(manifest.closed);
    }
}
