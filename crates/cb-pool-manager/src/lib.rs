//! Compute pool manager: for instance-backed launches, owns a named
//! auto-scaling group bound to a capacity provider associated with the
//! ephemeral cluster.
//!
//! Implemented against EC2/Auto Scaling in [`asg`], and as an in-memory
//! fake in [`memory`] for the dispatcher's warm-pool tests.

pub mod asg;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct PoolSpec {
    pub cluster_name: String,
    pub instance_type: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub instance_profile_arn: String,
    pub use_spot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    pub desired_capacity: u32,
    pub in_service_instances: u32,
    pub registered_container_instances: u32,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("timed out waiting for pool to reach {target} ready instances")]
    TimedOut { target: u32 },

    #[error("transient pool-manager error: {0}")]
    Transient(String),

    #[error("pool-manager error: {0}")]
    Other(String),
}

impl PoolError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;

/// `EnsurePool`/`ScaleTo`/`WaitReady`/`ScaleToZero`/`Status` over a warm
/// pool of instances. `EnsurePool` must be idempotent (R2): N calls leave
/// exactly one launch template, one auto-scaling group, and one capacity
/// provider associated with the cluster.
#[async_trait]
pub trait PoolManager: Send + Sync {
    /// Idempotently ensure the launch template, auto-scaling group, and
    /// capacity provider exist and are associated with `spec.cluster_name`.
    async fn ensure_pool(&self, spec: &PoolSpec) -> Result<()>;

    async fn scale_to(&self, n: u32) -> Result<()>;

    /// Poll until both the auto-scaling group reports `n` in-service
    /// instances and the container service reports `n` registered container
    /// instances, or `timeout` elapses.
    async fn wait_ready(&self, n: u32, timeout: Duration) -> Result<()>;

    /// Set desired capacity to zero; returns immediately without waiting
    /// for instances to terminate.
    async fn scale_to_zero(&self) -> Result<()>;

    async fn status(&self) -> Result<PoolStatus>;
}
