//! Task definition cache: idempotent lookup/creation of container task
//! definitions keyed by `(image, cpu, memory, launch_kind, architecture)`.
//!
//! The cache is the only place in the workspace that knows the
//! thousandths-of-a-vCPU / mebibyte encoding the container service API
//! speaks — everywhere else in the workspace deals in `CpuUnits`/`MemoryGb`.

use std::collections::HashMap;
use std::sync::Arc;

use cb_container_service::{
    Architecture as SvcArchitecture, ContainerService, ContainerServiceError, TaskDefinitionSpec,
};
use cb_types::{Architecture, ClusterConfig, LaunchKind};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum TaskDefCacheError {
    #[error(transparent)]
    ContainerService(#[from] ContainerServiceError),
}

pub type Result<T> = std::result::Result<T, TaskDefCacheError>;

/// The cache key: everything that determines whether an existing task
/// definition revision is reusable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub image: String,
    pub cpu_thousandths: u32,
    pub memory_mebibytes: u32,
    pub serverless: bool,
    pub architecture: Option<(bool,)>, // Some((is_arm64,)) when launch is Instance
}

impl CacheKey {
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            image: config.image_ref.clone(),
            cpu_thousandths: config.cpu_units.as_thousandths(),
            memory_mebibytes: config.memory_gb.as_mebibytes(),
            serverless: matches!(config.launch_kind, LaunchKind::Serverless),
            architecture: if matches!(config.launch_kind, LaunchKind::Instance) {
                Some((matches!(config.architecture, Architecture::Arm64),))
            } else {
                None
            },
        }
    }

    fn family(&self) -> String {
        // One family per image so revision history stays coherent; cpu/mem/
        // arch variation within a family is resolved by scanning revisions.
        let sanitized: String = self
            .image
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        format!("cloudburst-{sanitized}")
    }
}

/// Roles and log group a registered task definition is configured with.
/// Taken from configuration, never computed (§4.3).
#[derive(Debug, Clone)]
pub struct TaskDefDefaults {
    pub log_group: String,
    pub execution_role_arn: String,
    pub task_role_arn: String,
}

/// Resolves or creates a task definition ARN for a given key, with an
/// in-process memo so repeated resolutions within one process don't even
/// need to round-trip to the container service (R1: idempotent).
pub struct TaskDefinitionCache<S: ContainerService> {
    service: Arc<S>,
    defaults: TaskDefDefaults,
    memo: Mutex<HashMap<CacheKey, String>>,
}

const REVISION_SCAN_LIMIT: usize = 10;

impl<S: ContainerService> TaskDefinitionCache<S> {
    pub fn new(service: Arc<S>, defaults: TaskDefDefaults) -> Self {
        Self {
            service,
            defaults,
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `key` to a task definition ARN: (a) reuse a process-local
    /// memo; (b) scan the family's active revisions, newest first, for a
    /// compatible match; (c) register a new revision.
    pub async fn resolve_or_create(&self, key: CacheKey) -> Result<String> {
        {
            let memo = self.memo.lock().await;
            if let Some(arn) = memo.get(&key) {
                return Ok(arn.clone());
            }
        }

        let family = key.family();
        let candidates = self.service.list_task_definitions(&family, REVISION_SCAN_LIMIT).await?;
        for arn in candidates {
            let info = self.service.describe_task_definition(&arn).await?;
            let arch_matches = match key.architecture {
                None => true,
                Some((is_arm64,)) => info.architecture
                    == Some(if is_arm64 { SvcArchitecture::Arm64 } else { SvcArchitecture::X86_64 }),
            };
            if info.image == key.image
                && info.cpu_thousandths == key.cpu_thousandths
                && info.memory_mebibytes == key.memory_mebibytes
                && info.launch_kind_serverless == key.serverless
                && arch_matches
            {
                self.memo.lock().await.insert(key, arn.clone());
                return Ok(arn);
            }
        }

        let spec = TaskDefinitionSpec {
            family: family.clone(),
            image: key.image.clone(),
            cpu_thousandths: key.cpu_thousandths,
            memory_mebibytes: key.memory_mebibytes,
            launch_kind_serverless: key.serverless,
            architecture: key.architecture.map(|(is_arm64,)| {
                if is_arm64 {
                    SvcArchitecture::Arm64
                } else {
                    SvcArchitecture::X86_64
                }
            }),
            log_group: self.defaults.log_group.clone(),
            execution_role_arn: self.defaults.execution_role_arn.clone(),
            task_role_arn: self.defaults.task_role_arn.clone(),
        };
        let arn = self.service.register_task_definition(spec).await?;
        self.memo.lock().await.insert(key, arn.clone());
        Ok(arn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_container_service::memory::InMemoryContainerService;

    fn defaults() -> TaskDefDefaults {
        TaskDefDefaults {
            log_group: "/cloudburst/worker".into(),
            execution_role_arn: "arn:aws:iam::123:role/exec".into(),
            task_role_arn: "arn:aws:iam::123:role/task".into(),
        }
    }

    fn key() -> CacheKey {
        CacheKey {
            image: "example.com/worker:latest".into(),
            cpu_thousandths: 1000,
            memory_mebibytes: 2048,
            serverless: true,
            architecture: None,
        }
    }

    #[tokio::test]
    async fn resolve_or_create_is_idempotent_across_calls() {
        let service = InMemoryContainerService::shared();
        let cache = TaskDefinitionCache::new(service.clone(), defaults());

        let arn1 = cache.resolve_or_create(key()).await.unwrap();
        let arn2 = cache.resolve_or_create(key()).await.unwrap();
        let arn3 = cache.resolve_or_create(key()).await.unwrap();
        assert_eq!(arn1, arn2);
        assert_eq!(arn2, arn3);

        let listed = service.list_task_definitions(&key().family(), 10).await.unwrap();
        assert_eq!(listed.len(), 1, "no new revisions after the first (R1)");
    }

    #[tokio::test]
    async fn different_cpu_registers_a_new_revision() {
        let service = InMemoryContainerService::shared();
        let cache = TaskDefinitionCache::new(service.clone(), defaults());

        let mut k2 = key();
        k2.cpu_thousandths = 2000;

        let arn1 = cache.resolve_or_create(key()).await.unwrap();
        let arn2 = cache.resolve_or_create(k2).await.unwrap();
        assert_ne!(arn1, arn2);
    }

    #[tokio::test]
    async fn fresh_cache_instance_discovers_existing_revision() {
        let service = InMemoryContainerService::shared();
        let cache1 = TaskDefinitionCache::new(service.clone(), defaults());
        let arn1 = cache1.resolve_or_create(key()).await.unwrap();

        // A second cache instance (e.g. a new process) must find the same
        // revision by scanning instead of registering a duplicate.
        let cache2 = TaskDefinitionCache::new(service.clone(), defaults());
        let arn2 = cache2.resolve_or_create(key()).await.unwrap();
        assert_eq!(arn1, arn2);
    }
}
