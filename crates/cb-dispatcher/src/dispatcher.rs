//! The ephemeral dispatcher: owns one ephemeral cluster's in-memory
//! futures, drives wave scheduling under quota, and computes aggregate
//! cost.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cb_codec as codec;
use cb_container_service::{ContainerService, EnvOverrides, LaunchSelector, NetworkConfig, RunTaskRequest};
use cb_lifecycle::TaskState;
use cb_object_store::{ObjectStore, PutOptions};
use cb_pool_manager::{PoolManager, PoolSpec};
use cb_pricing::PricingOracle;
use cb_task_defs::{CacheKey, TaskDefDefaults, TaskDefinitionCache};
use cb_types::{keys, ClusterConfig, Error, LaunchKind, ResultEnvelope, TaskEnvelope};
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::wave::{FutureHandle, FutureState, WaveQueue};

/// Whether the dispatcher submits tasks directly on `Submit` or queues
/// them behind a quota ceiling (I7).
#[derive(Debug, Clone, Copy)]
enum Mode {
    Unlimited,
    QuotaLimited { workers_per_wave: u32 },
}

/// Everything the dispatcher needs to resolve a task definition ARN and
/// place a container launch, computed once at construction.
#[derive(Debug, Clone)]
struct TaskDefDefaultsCfg {
    log_group: String,
    execution_role_arn: String,
    task_role_arn: String,
}

/// Owns one ephemeral cluster's futures for the lifetime of the dispatcher.
/// Quota-limited mode (wave scheduling, §4.5) or not is decided once at
/// construction from `observed_vcpu_quota`.
pub struct Dispatcher<O: ObjectStore, C: ContainerService, P: PoolManager> {
    config: ClusterConfig,
    object_store: Arc<O>,
    container_service: Arc<C>,
    task_defs: TaskDefinitionCache<C>,
    pool: Option<Arc<P>>,
    pricing: PricingOracle,
    mode: Mode,
    wave: Mutex<WaveQueue>,
    futures: Mutex<HashMap<Uuid, FutureState>>,
    pool_started_at: Mutex<Option<Instant>>,
    created_at: Instant,
}

impl<O: ObjectStore, C: ContainerService, P: PoolManager> Dispatcher<O, C, P> {
    pub fn new(
        config: ClusterConfig,
        object_store: Arc<O>,
        container_service: Arc<C>,
        pool: Option<Arc<P>>,
        task_def_defaults: TaskDefDefaults,
        observed_vcpu_quota: Option<f64>,
    ) -> Self {
        let mode = match (config.launch_kind, observed_vcpu_quota) {
            (LaunchKind::Serverless, Some(quota)) => {
                let workers_per_wave = (quota / config.cpu_units.value()).floor() as u32;
                if workers_per_wave >= config.workers {
                    Mode::Unlimited
                } else {
                    Mode::QuotaLimited {
                        workers_per_wave: workers_per_wave.max(1),
                    }
                }
            }
            _ => Mode::Unlimited,
        };

        Self {
            task_defs: TaskDefinitionCache::new(container_service.clone(), task_def_defaults),
            config,
            object_store,
            container_service,
            pool,
            pricing: PricingOracle::new(),
            mode,
            wave: Mutex::new(WaveQueue::new()),
            futures: Mutex::new(HashMap::new()),
            pool_started_at: Mutex::new(None),
            created_at: Instant::now(),
        }
    }

    pub fn workers_per_wave(&self) -> Option<u32> {
        match self.mode {
            Mode::QuotaLimited { workers_per_wave } => Some(workers_per_wave),
            Mode::Unlimited => None,
        }
    }

    pub async fn in_flight_count(&self) -> usize {
        self.wave.lock().await.in_flight.len()
    }

    pub async fn pending_count(&self) -> usize {
        self.wave.lock().await.pending.len()
    }

    pub async fn wave_index(&self) -> u32 {
        self.wave.lock().await.wave_index
    }

    /// Submit a task expression for execution. Uploads the envelope,
    /// registers a `FutureHandle` in state `Created`, and either runs it
    /// immediately (unlimited mode) or enqueues it behind the wave gate.
    pub async fn submit(&self, expr: Vec<u8>, globals: Vec<u8>) -> Result<FutureHandle, Error> {
        let handles = self.submit_batch(vec![(expr, globals)]).await?;
        Ok(handles[0])
    }

    /// Enqueue several task expressions as one batch before the first
    /// scheduler tick runs. This is what `cluster.Map` uses: without it,
    /// submitting 10 tasks one at a time under a 4-wide quota would open a
    /// wave of 1 on the very first submit instead of a wave of 4, since a
    /// tick fires on every submit (§4.5).
    pub async fn submit_batch(&self, exprs: Vec<(Vec<u8>, Vec<u8>)>) -> Result<Vec<FutureHandle>, Error> {
        let mut handles = Vec::with_capacity(exprs.len());
        for (expr, globals) in exprs {
            let task_id = Uuid::new_v4();
            let envelope = TaskEnvelope {
                task_id,
                session_id: None,
                payload: codec::encode(&(expr, globals)).map_err(|e| Error::Fatal(e.to_string()))?,
                env: Default::default(),
                created_at: Utc::now(),
            };
            let bytes = codec::encode(&envelope).map_err(|e| Error::Fatal(e.to_string()))?;
            self.object_store
                .put(&keys::task_key(task_id), bytes, PutOptions::default())
                .await
                .map_err(|e| Error::Transient(e.to_string()))?;

            {
                let mut futures = self.futures.lock().await;
                futures.insert(task_id, FutureState::new(task_id, Utc::now()));
            }

            match self.mode {
                Mode::Unlimited => {
                    self.ensure_warm_pool_if_needed().await?;
                    self.launch_task(task_id).await?;
                    let mut futures = self.futures.lock().await;
                    let f = futures.get_mut(&task_id).unwrap();
                    f.state = TaskState::Running;
                }
                Mode::QuotaLimited { .. } => {
                    {
                        let mut futures = self.futures.lock().await;
                        let f = futures.get_mut(&task_id).unwrap();
                        f.state = TaskState::Queued;
                    }
                    let mut wave = self.wave.lock().await;
                    wave.push(task_id);
                }
            }
            handles.push(FutureHandle { task_id });
        }

        self.tick().await?;
        Ok(handles)
    }

    /// Scheduler tick: prune completed in-flight futures, then open a new
    /// wave if the previous one has fully drained (§4.5 steps 1-2).
    pub async fn tick(&self) -> Result<(), Error> {
        if matches!(self.mode, Mode::Unlimited) {
            return Ok(());
        }

        let in_flight: Vec<Uuid> = {
            let wave = self.wave.lock().await;
            wave.in_flight.clone()
        };
        for task_id in in_flight {
            if self
                .object_store
                .head(&keys::result_key(task_id))
                .await
                .map_err(|e| Error::Transient(e.to_string()))?
                .is_some()
            {
                let mut futures = self.futures.lock().await;
                if let Some(f) = futures.get_mut(&task_id) {
                    f.state = TaskState::Completed;
                }
                drop(futures);
                let mut wave = self.wave.lock().await;
                wave.mark_done(task_id);
            }
        }

        let should_open = {
            let wave = self.wave.lock().await;
            wave.can_open_wave()
        };
        if should_open {
            let workers_per_wave = self.workers_per_wave().unwrap_or(self.config.workers) as usize;
            let dispatched = {
                let mut wave = self.wave.lock().await;
                wave.open_wave(workers_per_wave)
            };
            if !dispatched.is_empty() {
                self.ensure_warm_pool_if_needed().await?;
            }
            for task_id in dispatched {
                self.launch_task(task_id).await?;
                let mut futures = self.futures.lock().await;
                if let Some(f) = futures.get_mut(&task_id) {
                    f.state = TaskState::Running;
                }
            }
        }
        Ok(())
    }

    async fn ensure_warm_pool_if_needed(&self) -> Result<(), Error> {
        if self.config.launch_kind != LaunchKind::Instance {
            return Ok(());
        }
        let Some(pool) = &self.pool else { return Ok(()) };

        let mut started = self.pool_started_at.lock().await;
        if started.is_some() {
            return Ok(());
        }

        let spec = PoolSpec {
            cluster_name: self.config.cluster_name.clone(),
            instance_type: self.config.instance_type.clone().unwrap_or_default(),
            subnets: self.config.subnets.iter().cloned().collect(),
            security_groups: self.config.security_groups.iter().cloned().collect(),
            instance_profile_arn: format!(
                "arn:aws:iam::{}:instance-profile/cloudburst-worker",
                self.config.account_id
            ),
            use_spot: self.config.use_spot,
        };
        pool.ensure_pool(&spec).await.map_err(|e| Error::Transient(e.to_string()))?;
        pool.scale_to(self.config.workers)
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        pool.wait_ready(self.config.workers, Duration::from_secs(120))
            .await
            .map_err(|e| Error::TimedOut(e.to_string()))?;
        *started = Some(Instant::now());
        Ok(())
    }

    async fn launch_task(&self, task_id: Uuid) -> Result<(), Error> {
        let key = CacheKey::from_config(&self.config);
        let task_def_arn = self
            .task_defs
            .resolve_or_create(key)
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;

        let (assign_public_ip, launch) = match self.config.launch_kind {
            LaunchKind::Instance => (
                false,
                LaunchSelector::CapacityProvider {
                    name: format!("cloudburst-{}-cp", self.config.cluster_name),
                },
            ),
            LaunchKind::Serverless => (true, LaunchSelector::Serverless),
        };

        let req = RunTaskRequest {
            cluster: self.config.cluster_name.clone(),
            task_definition_arn: task_def_arn,
            count: 1,
            network: NetworkConfig {
                subnets: self.config.subnets.iter().cloned().collect(),
                security_groups: self.config.security_groups.iter().cloned().collect(),
                assign_public_ip,
            },
            overrides: EnvOverrides {
                task_id: task_id.to_string(),
                bucket: self.config.bucket.clone(),
                region: self.config.region.clone(),
            },
            launch,
        };

        let outcome = self
            .container_service
            .run_task(req)
            .await
            .map_err(|e| Error::LaunchRejected {
                reason: e.to_string(),
                detail: task_id.to_string(),
            })?;

        let mut futures = self.futures.lock().await;
        if let Some(f) = futures.get_mut(&task_id) {
            f.container_task_arn = outcome.started_arns.into_iter().next();
        }
        Ok(())
    }

    /// Non-blocking: `true` once the future is cached `Completed` or a
    /// fresh HEAD of its result key succeeds.
    pub async fn resolved(&self, handle: FutureHandle) -> Result<bool, Error> {
        {
            let futures = self.futures.lock().await;
            if let Some(f) = futures.get(&handle.task_id) {
                if f.cached_result.is_some() || f.failed.is_some() {
                    return Ok(true);
                }
            }
        }
        let exists = self
            .object_store
            .head(&keys::result_key(handle.task_id))
            .await
            .map_err(|e| Error::Transient(e.to_string()))?
            .is_some();
        Ok(exists)
    }

    /// Block on [`resolved`] (polling at a 2s cadence per §5), download,
    /// decode, and cache on the future. A result envelope with `error =
    /// true` surfaces as `Error::TaskFailed`.
    pub async fn result(&self, handle: FutureHandle) -> Result<Vec<u8>, Error> {
        let deadline = Instant::now() + Duration::from_secs(self.config.timeout_s as u64);
        loop {
            if self.resolved(handle).await? {
                break;
            }
            if Instant::now() >= deadline {
                return Err(Error::TimedOut(format!("task {} did not resolve in time", handle.task_id)));
            }
            self.tick().await?;
            tokio::time::sleep(Duration::from_secs(2)).await;
        }

        {
            let futures = self.futures.lock().await;
            if let Some(f) = futures.get(&handle.task_id) {
                if let Some(value) = &f.cached_result {
                    return Ok(value.clone());
                }
                if let Some(message) = &f.failed {
                    return Err(Error::TaskFailed {
                        message: message.clone(),
                        stdout: None,
                    });
                }
            }
        }

        let (bytes, _) = self
            .object_store
            .get(&keys::result_key(handle.task_id))
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        let envelope: ResultEnvelope = codec::decode(&bytes).map_err(|e| Error::Fatal(e.to_string()))?;

        let mut futures = self.futures.lock().await;
        let f = futures.get_mut(&handle.task_id).ok_or_else(|| {
            Error::Fatal(format!("future {} vanished from the dispatcher table", handle.task_id))
        })?;
        f.state = if envelope.error { TaskState::Failed } else { TaskState::Completed };

        if envelope.error {
            let message = envelope.message.unwrap_or_else(|| "task failed with no message".into());
            f.failed = Some(message.clone());
            Err(Error::TaskFailed {
                message,
                stdout: envelope.stdout,
            })
        } else {
            let value = envelope.value.unwrap_or_default();
            f.cached_result = Some(value.clone());
            Ok(value)
        }
    }

    /// Submit each of `exprs` and collect their results in submission
    /// order (the caller's `Map` semantics; result *availability* order is
    /// unordered, per §5, but this re-sorts by the handle order it
    /// returned).
    pub async fn map(&self, exprs: Vec<(Vec<u8>, Vec<u8>)>) -> Result<Vec<Vec<u8>>, Error> {
        let handles = self.submit_batch(exprs).await?;
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(self.result(handle).await?);
        }
        Ok(results)
    }

    /// Aggregate cost across every future submitted so far, using wall
    /// clock elapsed since construction.
    pub fn aggregate_cost(&self) -> f64 {
        let elapsed = self.created_at.elapsed();
        self.pricing.cluster_cost(
            self.config.launch_kind,
            self.config.workers,
            self.config.cpu_units,
            self.config.memory_gb,
            self.config.architecture,
            self.config.instance_type.as_deref(),
            self.config.use_spot,
            elapsed,
        )
    }

    /// Stop in-flight container tasks and, if the warm pool has been held
    /// longer than `warm_pool_timeout_s`, scale it to zero; otherwise leave
    /// it warm for reuse (§4.5).
    pub async fn cleanup(&self) -> Result<(), Error> {
        let arns: Vec<String> = {
            let futures = self.futures.lock().await;
            futures.values().filter_map(|f| f.container_task_arn.clone()).collect()
        };
        for arn in arns {
            let _ = self
                .container_service
                .stop_task(&self.config.cluster_name, &arn, "cluster cleanup")
                .await;
        }

        if let Some(pool) = &self.pool {
            let started = self.pool_started_at.lock().await;
            if let Some(started_at) = *started {
                if started_at.elapsed() >= Duration::from_secs(self.config.warm_pool_timeout_s as u64) {
                    pool.scale_to_zero().await.map_err(|e| Error::Transient(e.to_string()))?;
                }
            }
        }
        Ok(())
    }
}
