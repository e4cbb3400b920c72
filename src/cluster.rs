//! The ephemeral cluster facade: `CreateCluster(config) -> Cluster`,
//! `cluster.Submit`, `cluster.Map` (spec.md §6.5). A thin name over
//! [`cb_dispatcher::Dispatcher`] — wave scheduling, quota handling, and
//! cost accounting all live there; this wrapper only exists so the public
//! API reads the way the external-interfaces section states it.

use std::sync::Arc;

use cb_container_service::ContainerService;
use cb_dispatcher::{Dispatcher, FutureHandle};
use cb_object_store::ObjectStore;
use cb_pool_manager::PoolManager;
use cb_task_defs::TaskDefDefaults;
use cb_types::{ClusterConfig, Error};

pub struct Cluster<O: ObjectStore, C: ContainerService, P: PoolManager> {
    inner: Dispatcher<O, C, P>,
}

impl<O: ObjectStore, C: ContainerService, P: PoolManager> Cluster<O, C, P> {
    /// `CreateCluster(config) -> Cluster`. `observed_vcpu_quota` is the
    /// caller's best estimate of the account's concurrent-vCPU ceiling;
    /// `None` leaves the dispatcher in unlimited mode.
    pub fn create(
        config: ClusterConfig,
        object_store: Arc<O>,
        container_service: Arc<C>,
        pool: Option<Arc<P>>,
        task_def_defaults: TaskDefDefaults,
        observed_vcpu_quota: Option<f64>,
    ) -> Self {
        Self {
            inner: Dispatcher::new(
                config,
                object_store,
                container_service,
                pool,
                task_def_defaults,
                observed_vcpu_quota,
            ),
        }
    }

    /// `cluster.Submit(expr) -> Future`.
    pub async fn submit(&self, expr: Vec<u8>, globals: Vec<u8>) -> Result<FutureHandle, Error> {
        self.inner.submit(expr, globals).await
    }

    /// `cluster.Map(xs, fn) -> []result`.
    pub async fn map(&self, exprs: Vec<(Vec<u8>, Vec<u8>)>) -> Result<Vec<Vec<u8>>, Error> {
        self.inner.map(exprs).await
    }

    pub async fn resolved(&self, handle: FutureHandle) -> Result<bool, Error> {
        self.inner.resolved(handle).await
    }

    pub async fn result(&self, handle: FutureHandle) -> Result<Vec<u8>, Error> {
        self.inner.result(handle).await
    }

    /// Drive the wave scheduler one step. The CLI and any long-lived
    /// caller must call this periodically while futures are outstanding;
    /// `submit`/`map`/`result` already call it at the points the scheduler
    /// needs it, so most callers never need to call it directly.
    pub async fn tick(&self) -> Result<(), Error> {
        self.inner.tick().await
    }

    pub fn aggregate_cost(&self) -> f64 {
        self.inner.aggregate_cost()
    }

    pub async fn cleanup(&self) -> Result<(), Error> {
        self.inner.cleanup().await
    }
}
