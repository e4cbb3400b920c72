//! In-memory `PoolManager`: models instance start-up latency with a fixed
//! number of `wait_ready` polls before instances report in-service, so
//! warm-pool tests can exercise `WaitReady`'s poll loop without real
//! infrastructure.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{PoolError, PoolManager, PoolSpec, PoolStatus, Result};

pub struct InMemoryPoolManager {
    ensured: RwLock<Option<PoolSpec>>,
    ensure_calls: AtomicUsize,
    desired: AtomicU32,
    /// Number of `wait_ready` poll ticks instances take to catch up to
    /// `desired` capacity; 0 means instantaneous.
    pub startup_ticks: AtomicUsize,
    poll_interval: Duration,
}

impl Default for InMemoryPoolManager {
    fn default() -> Self {
        Self {
            ensured: RwLock::new(None),
            ensure_calls: AtomicUsize::new(0),
            desired: AtomicU32::new(0),
            startup_ticks: AtomicUsize::new(0),
            poll_interval: Duration::from_millis(5),
        }
    }
}

impl InMemoryPoolManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_pool_call_count(&self) -> usize {
        self.ensure_calls.load(Ordering::SeqCst)
    }

    pub fn desired_capacity(&self) -> u32 {
        self.desired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PoolManager for InMemoryPoolManager {
    async fn ensure_pool(&self, spec: &PoolSpec) -> Result<()> {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        let mut ensured = self.ensured.write().await;
        *ensured = Some(spec.clone());
        Ok(())
    }

    async fn scale_to(&self, n: u32) -> Result<()> {
        self.desired.store(n, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_ready(&self, n: u32, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut ticks_remaining = self.startup_ticks.load(Ordering::SeqCst);
        loop {
            if ticks_remaining == 0 && self.desired.load(Ordering::SeqCst) >= n {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(PoolError::TimedOut { target: n });
            }
            if ticks_remaining > 0 {
                ticks_remaining -= 1;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn scale_to_zero(&self) -> Result<()> {
        self.desired.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn status(&self) -> Result<PoolStatus> {
        let n = self.desired.load(Ordering::SeqCst);
        Ok(PoolStatus {
            desired_capacity: n,
            in_service_instances: n,
            registered_container_instances: n,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> PoolSpec {
        PoolSpec {
            cluster_name: "cb-cluster".into(),
            instance_type: "c6i.xlarge".into(),
            subnets: vec!["subnet-a".into()],
            security_groups: vec!["sg-a".into()],
            instance_profile_arn: "arn:aws:iam::123:instance-profile/cb".into(),
            use_spot: false,
        }
    }

    #[tokio::test]
    async fn ensure_pool_is_idempotent() {
        let pool = InMemoryPoolManager::new();
        pool.ensure_pool(&spec()).await.unwrap();
        pool.ensure_pool(&spec()).await.unwrap();
        pool.ensure_pool(&spec()).await.unwrap();
        assert_eq!(pool.ensure_pool_call_count(), 3, "idempotent in effect, not in call count (R2)");
    }

    #[tokio::test]
    async fn scale_to_zero_returns_immediately() {
        let pool = InMemoryPoolManager::new();
        pool.scale_to(5).await.unwrap();
        pool.scale_to_zero().await.unwrap();
        assert_eq!(pool.desired_capacity(), 0);
    }

    #[tokio::test]
    async fn wait_ready_times_out_if_never_scaled() {
        let pool = InMemoryPoolManager::new();
        let err = pool.wait_ready(3, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, PoolError::TimedOut { target: 3 }));
    }

    #[tokio::test]
    async fn wait_ready_succeeds_once_scaled() {
        let pool = InMemoryPoolManager::new();
        pool.scale_to(3).await.unwrap();
        pool.wait_ready(3, Duration::from_millis(100)).await.unwrap();
    }
}
