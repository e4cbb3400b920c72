//! The detached session facade: `CreateSession`, `AttachSession`,
//! `session.*`, `ListSessions` (spec.md §6.5). [`cb_session::SessionClient`]
//! is a pure object-store client with no opinion on how worker containers
//! get launched; this module owns that wiring, the same way
//! `cb_dispatcher::Dispatcher` owns it for the ephemeral path, reusing the
//! same task-definition cache and the same unified `RunTask` launch
//! envelope (a bootstrap `TaskEnvelope` whose `session_id` field carries
//! the session to join).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cb_container_service::{
    ContainerService, EnvOverrides, LaunchSelector, NetworkConfig, RunTaskRequest,
};
use cb_object_store::{ObjectStore, PutOptions};
use cb_pool_manager::{PoolManager, PoolSpec};
use cb_session::{SessionClient, SessionError, SessionStats};
use cb_task_defs::{CacheKey, TaskDefDefaults, TaskDefinitionCache};
use cb_types::{keys, ClusterConfig, LaunchKind, TaskEnvelope};
use chrono::Utc;
use uuid::Uuid;

/// A summary row as returned by `ListSessions`.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub created_at: chrono::DateTime<Utc>,
    pub last_activity: chrono::DateTime<Utc>,
    pub closed: bool,
    pub task_count: usize,
}

/// A handle to a detached session plus the worker-launch wiring
/// `CreateSession` needs that the session core itself stays ignorant of.
pub struct Session<O: ObjectStore, C: ContainerService, P: PoolManager> {
    client: SessionClient<O, C>,
    container_service: Arc<C>,
    task_defs: TaskDefinitionCache<C>,
    pool: Option<Arc<P>>,
}

impl<O: ObjectStore, C: ContainerService, P: PoolManager> Session<O, C, P> {
    /// `CreateSession(config) -> Session`: writes the manifest, then
    /// launches `config.workers` detached worker containers, each bound to
    /// this session via a bootstrap envelope.
    pub async fn create(
        config: ClusterConfig,
        object_store: Arc<O>,
        container_service: Arc<C>,
        pool: Option<Arc<P>>,
        task_def_defaults: TaskDefDefaults,
        absolute_timeout_s: Option<u64>,
    ) -> Result<Self, SessionError> {
        let client = SessionClient::create(
            config.clone(),
            object_store.clone(),
            container_service.clone(),
            absolute_timeout_s,
        )
        .await?;

        let task_defs = TaskDefinitionCache::new(container_service.clone(), task_def_defaults);
        let session = Self {
            client,
            container_service,
            task_defs,
            pool,
        };
        session.launch_workers(&config, &object_store).await?;
        Ok(session)
    }

    /// `AttachSession(session_id) -> Session`: binds to an existing session
    /// without launching anything new.
    pub async fn attach(
        session_id: Uuid,
        config: ClusterConfig,
        object_store: Arc<O>,
        container_service: Arc<C>,
        task_def_defaults: TaskDefDefaults,
        pool: Option<Arc<P>>,
    ) -> Result<Self, SessionError> {
        let client = SessionClient::attach(session_id, config, object_store, container_service.clone()).await?;
        Ok(Self {
            client,
            container_service: container_service.clone(),
            task_defs: TaskDefinitionCache::new(container_service, task_def_defaults),
            pool,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.client.session_id
    }

    /// `session.Submit(expr) -> task_id`.
    pub async fn submit(&self, expr: Vec<u8>, globals: Vec<u8>) -> Result<Uuid, SessionError> {
        self.client.submit(expr, globals).await
    }

    /// `session.Status() -> counts`.
    pub async fn status(&self) -> Result<SessionStats, SessionError> {
        self.client.status().await
    }

    /// `session.Collect(wait, timeout) -> map[task_id]result`.
    pub async fn collect(&self, wait: bool, timeout: Option<Duration>) -> Result<HashMap<Uuid, Vec<u8>>, SessionError> {
        self.client.collect(wait, timeout).await
    }

    /// `session.Cleanup(stop_workers, force) -> ()`.
    pub async fn cleanup(&self, stop_workers: bool, force: bool) -> Result<(), SessionError> {
        self.client.cleanup(stop_workers, force).await
    }

    async fn launch_workers(&self, config: &ClusterConfig, object_store: &Arc<O>) -> Result<(), SessionError> {
        if config.launch_kind == LaunchKind::Instance {
            if let Some(pool) = &self.pool {
                let spec = PoolSpec {
                    cluster_name: config.cluster_name.clone(),
                    instance_type: config.instance_type.clone().unwrap_or_default(),
                    subnets: config.subnets.iter().cloned().collect(),
                    security_groups: config.security_groups.iter().cloned().collect(),
                    instance_profile_arn: format!(
                        "arn:aws:iam::{}:instance-profile/cloudburst-worker",
                        config.account_id
                    ),
                    use_spot: config.use_spot,
                };
                pool.ensure_pool(&spec).await.map_err(|e| SessionError::Other(e.to_string()))?;
                pool.scale_to(config.workers).await.map_err(|e| SessionError::Other(e.to_string()))?;
                pool.wait_ready(config.workers, Duration::from_secs(120))
                    .await
                    .map_err(|e| SessionError::TimedOut(e.to_string()))?;
            }
        }

        let task_def_arn = self
            .task_defs
            .resolve_or_create(CacheKey::from_config(config))
            .await
            .map_err(|e| SessionError::Other(e.to_string()))?;

        let (assign_public_ip, launch) = match config.launch_kind {
            LaunchKind::Instance => (
                false,
                LaunchSelector::CapacityProvider {
                    name: format!("cloudburst-{}-cp", config.cluster_name),
                },
            ),
            LaunchKind::Serverless => (true, LaunchSelector::Serverless),
        };

        let mut arns = Vec::with_capacity(config.workers as usize);
        for _ in 0..config.workers {
            let bootstrap_task_id = Uuid::new_v4();
            let envelope = TaskEnvelope {
                task_id: bootstrap_task_id,
                session_id: Some(self.session_id()),
                payload: Vec::new(),
                env: Default::default(),
                created_at: Utc::now(),
            };
            let bytes = cb_codec::encode(&envelope)?;
            object_store
                .put(&keys::task_key(bootstrap_task_id), bytes, PutOptions::default())
                .await?;

            let req = RunTaskRequest {
                cluster: config.cluster_name.clone(),
                task_definition_arn: task_def_arn.clone(),
                count: 1,
                network: NetworkConfig {
                    subnets: config.subnets.iter().cloned().collect(),
                    security_groups: config.security_groups.iter().cloned().collect(),
                    assign_public_ip,
                },
                overrides: EnvOverrides {
                    task_id: bootstrap_task_id.to_string(),
                    bucket: config.bucket.clone(),
                    region: config.region.clone(),
                },
                launch: launch.clone(),
            };
            let outcome = self.container_service.run_task(req).await?;
            arns.extend(outcome.started_arns);
        }

        cb_session::update_manifest(&**object_store, self.session_id(), |m| {
            m.container_task_arns.extend(arns.iter().cloned());
        })
        .await?;

        tracing::info!(session_id = %self.session_id(), workers = config.workers, "detached workers launched");
        Ok(())
    }
}

/// `ListSessions() -> []summary`: enumerate every `sessions/*/manifest.blob`
/// key and decode each manifest into a summary row.
pub async fn list_sessions<O: ObjectStore>(object_store: &O) -> Result<Vec<SessionSummary>, SessionError> {
    let listed = object_store.list("sessions/").await?;
    let mut summaries = Vec::new();
    for item in listed {
        if !item.key.ends_with("/manifest.blob") {
            continue;
        }
        let (bytes, _etag) = object_store.get(&item.key).await?;
        let manifest: cb_types::SessionManifest = cb_codec::decode(&bytes)?;
        summaries.push(SessionSummary {
            session_id: manifest.session_id,
            created_at: manifest.created_at,
            last_activity: manifest.last_activity,
            closed: manifest.closed,
            task_count: manifest.tasks.len(),
        });
    }
    Ok(summaries)
}
