//! Managed container service client: register task definitions, run tasks
//! with launch overrides, and describe/stop/list them.
//!
//! Implemented against ECS in [`ecs`] and as an in-memory fake in
//! [`memory`] for tests — both real implementations of the same trait the
//! dispatcher and session core program against.

pub mod ecs;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

/// CPU architecture the container image targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    X86_64,
    Arm64,
}

/// Serverless (no instances to manage) or instance-backed via a capacity
/// provider strategy bound to a warm pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchSelector {
    Serverless,
    CapacityProvider { name: String },
}

/// Everything needed to register a task definition revision.
#[derive(Debug, Clone)]
pub struct TaskDefinitionSpec {
    pub family: String,
    pub image: String,
    pub cpu_thousandths: u32,
    pub memory_mebibytes: u32,
    pub launch_kind_serverless: bool,
    pub architecture: Option<Architecture>,
    pub log_group: String,
    pub execution_role_arn: String,
    pub task_role_arn: String,
}

/// A resolved task definition as reported back by the container service.
#[derive(Debug, Clone)]
pub struct TaskDefinitionInfo {
    pub arn: String,
    pub image: String,
    pub cpu_thousandths: u32,
    pub memory_mebibytes: u32,
    pub launch_kind_serverless: bool,
    pub architecture: Option<Architecture>,
}

/// Per-task environment overrides: exactly the three entries the contract
/// (spec §6.4) allows — task identifier, bucket, region.
#[derive(Debug, Clone)]
pub struct EnvOverrides {
    pub task_id: String,
    pub bucket: String,
    pub region: String,
}

impl EnvOverrides {
    pub fn as_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("TASK_ID".to_string(), self.task_id.clone()),
            ("BUCKET".to_string(), self.bucket.clone()),
            ("S3_BUCKET".to_string(), self.bucket.clone()),
            ("REGION".to_string(), self.region.clone()),
            ("AWS_DEFAULT_REGION".to_string(), self.region.clone()),
        ])
    }
}

/// Network placement for `RunTask`. Per the network configuration policy:
/// Instance launch never requests a public IP; Serverless always does
/// (egress to the object store depends on it).
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub assign_public_ip: bool,
}

#[derive(Debug, Clone)]
pub struct RunTaskRequest {
    pub cluster: String,
    pub task_definition_arn: String,
    pub count: u32,
    pub network: NetworkConfig,
    pub overrides: EnvOverrides,
    pub launch: LaunchSelector,
}

#[derive(Debug, Clone)]
pub struct RunTaskFailure {
    pub reason: String,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct RunTaskOutcome {
    pub started_arns: Vec<String>,
    pub failures: Vec<RunTaskFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRunState {
    Pending,
    Running,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub arn: String,
    pub last_status: TaskRunState,
    pub stopped_reason: Option<String>,
}

#[derive(Debug, Error)]
pub enum ContainerServiceError {
    /// `RunTask` returned at least one failure entry: escalates immediately
    /// with reason and detail, never silently accepted as partial success.
    #[error("launch rejected: {reason} ({detail})")]
    LaunchRejected { reason: String, detail: String },

    #[error("task definition not found: {0}")]
    NotFound(String),

    #[error("transient container-service error: {0}")]
    Transient(String),

    #[error("container-service error: {0}")]
    Other(String),
}

impl ContainerServiceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ContainerServiceError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, ContainerServiceError>;

#[async_trait]
pub trait ContainerService: Send + Sync {
    async fn register_task_definition(&self, spec: TaskDefinitionSpec) -> Result<String>;

    /// List a family's active revisions, most recent first, bounded to
    /// `limit` entries (the task definition cache uses this for its lookup
    /// order).
    async fn list_task_definitions(&self, family: &str, limit: usize) -> Result<Vec<String>>;

    async fn describe_task_definition(&self, arn: &str) -> Result<TaskDefinitionInfo>;

    async fn run_task(&self, req: RunTaskRequest) -> Result<RunTaskOutcome>;

    async fn list_tasks(&self, cluster: &str) -> Result<Vec<String>>;

    async fn describe_tasks(&self, cluster: &str, arns: &[String]) -> Result<Vec<TaskInfo>>;

    async fn stop_task(&self, cluster: &str, arn: &str, reason: &str) -> Result<()>;
}
