//! In-memory container service: a real implementation of
//! [`ContainerService`] used throughout the test suite instead of ECS.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    ContainerService, ContainerServiceError, LaunchSelector, Result, RunTaskOutcome, RunTaskRequest,
    TaskDefinitionInfo, TaskDefinitionSpec, TaskInfo, TaskRunState,
};

struct Revision {
    arn: String,
    info: TaskDefinitionInfo,
}

#[derive(Default)]
pub struct InMemoryContainerService {
    revisions: RwLock<BTreeMap<String, Vec<Revision>>>,
    tasks: RwLock<BTreeMap<String, TaskInfo>>,
    next_revision: AtomicU64,
    next_task: AtomicU64,
    /// When set, `run_task` rejects every request with this reason/detail —
    /// lets tests exercise the `LaunchRejected` escalation path.
    pub reject_with: RwLock<Option<(String, String)>>,
}

impl InMemoryContainerService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub async fn task_state(&self, arn: &str) -> Option<TaskRunState> {
        self.tasks.read().await.get(arn).map(|t| t.last_status.clone())
    }
}

#[async_trait]
impl ContainerService for InMemoryContainerService {
    async fn register_task_definition(&self, spec: TaskDefinitionSpec) -> Result<String> {
        let mut revisions = self.revisions.write().await;
        let family_revisions = revisions.entry(spec.family.clone()).or_default();
        let rev_num = self.next_revision.fetch_add(1, Ordering::SeqCst) + 1;
        let arn = format!("arn:aws:ecs:mem:task-definition/{}:{}", spec.family, rev_num);
        family_revisions.push(Revision {
            arn: arn.clone(),
            info: TaskDefinitionInfo {
                arn: arn.clone(),
                image: spec.image,
                cpu_thousandths: spec.cpu_thousandths,
                memory_mebibytes: spec.memory_mebibytes,
                launch_kind_serverless: spec.launch_kind_serverless,
                architecture: spec.architecture,
            },
        });
        Ok(arn)
    }

    async fn list_task_definitions(&self, family: &str, limit: usize) -> Result<Vec<String>> {
        let revisions = self.revisions.read().await;
        Ok(revisions
            .get(family)
            .map(|revs| revs.iter().rev().take(limit).map(|r| r.arn.clone()).collect())
            .unwrap_or_default())
    }

    async fn describe_task_definition(&self, arn: &str) -> Result<TaskDefinitionInfo> {
        let revisions = self.revisions.read().await;
        for family_revs in revisions.values() {
            if let Some(rev) = family_revs.iter().find(|r| r.arn == arn) {
                return Ok(clone_info(&rev.info));
            }
        }
        Err(ContainerServiceError::NotFound(arn.to_string()))
    }

    async fn run_task(&self, req: RunTaskRequest) -> Result<RunTaskOutcome> {
        if let Some((reason, detail)) = self.reject_with.read().await.clone() {
            return Err(ContainerServiceError::LaunchRejected { reason, detail });
        }
        if matches!(req.launch, LaunchSelector::Serverless) && req.network.assign_public_ip {
            // Expected: serverless requests a public IP for object-store egress.
        }
        let mut tasks = self.tasks.write().await;
        let mut started = Vec::new();
        for _ in 0..req.count {
            let n = self.next_task.fetch_add(1, Ordering::SeqCst) + 1;
            let arn = format!("arn:aws:ecs:mem:task/{}/{n}", req.cluster);
            tasks.insert(
                arn.clone(),
                TaskInfo {
                    arn: arn.clone(),
                    last_status: TaskRunState::Running,
                    stopped_reason: None,
                },
            );
            started.push(arn);
        }
        Ok(RunTaskOutcome {
            started_arns: started,
            failures: Vec::new(),
        })
    }

    async fn list_tasks(&self, cluster: &str) -> Result<Vec<String>> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .keys()
            .filter(|arn| arn.contains(&format!("/{cluster}/")))
            .cloned()
            .collect())
    }

    async fn describe_tasks(&self, _cluster: &str, arns: &[String]) -> Result<Vec<TaskInfo>> {
        let tasks = self.tasks.read().await;
        Ok(arns
            .iter()
            .filter_map(|arn| tasks.get(arn).map(clone_task))
            .collect())
    }

    async fn stop_task(&self, _cluster: &str, arn: &str, reason: &str) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(arn) {
            task.last_status = TaskRunState::Stopped;
            task.stopped_reason = Some(reason.to_string());
            Ok(())
        } else {
            Err(ContainerServiceError::NotFound(arn.to_string()))
        }
    }
}

fn clone_info(info: &TaskDefinitionInfo) -> TaskDefinitionInfo {
    TaskDefinitionInfo {
        arn: info.arn.clone(),
        image: info.image.clone(),
        cpu_thousandths: info.cpu_thousandths,
        memory_mebibytes: info.memory_mebibytes,
        launch_kind_serverless: info.launch_kind_serverless,
        architecture: info.architecture,
    }
}

fn clone_task(task: &TaskInfo) -> TaskInfo {
    TaskInfo {
        arn: task.arn.clone(),
        last_status: task.last_status.clone(),
        stopped_reason: task.stopped_reason.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EnvOverrides, NetworkConfig};

    fn spec() -> TaskDefinitionSpec {
        TaskDefinitionSpec {
            family: "cloudburst-worker".into(),
            image: "example.com/worker:latest".into(),
            cpu_thousandths: 1000,
            memory_mebibytes: 2048,
            launch_kind_serverless: true,
            architecture: None,
            log_group: "/cloudburst/worker".into(),
            execution_role_arn: "arn:aws:iam::123:role/exec".into(),
            task_role_arn: "arn:aws:iam::123:role/task".into(),
        }
    }

    #[tokio::test]
    async fn register_then_list_returns_newest_first() {
        let svc = InMemoryContainerService::new();
        let a1 = svc.register_task_definition(spec()).await.unwrap();
        let a2 = svc.register_task_definition(spec()).await.unwrap();
        let listed = svc.list_task_definitions("cloudburst-worker", 10).await.unwrap();
        assert_eq!(listed, vec![a2, a1]);
    }

    #[tokio::test]
    async fn run_task_starts_requested_count() {
        let svc = InMemoryContainerService::new();
        let arn = svc.register_task_definition(spec()).await.unwrap();
        let outcome = svc
            .run_task(RunTaskRequest {
                cluster: "cb-cluster".into(),
                task_definition_arn: arn,
                count: 3,
                network: NetworkConfig {
                    subnets: vec!["subnet-a".into()],
                    security_groups: vec!["sg-a".into()],
                    assign_public_ip: true,
                },
                overrides: EnvOverrides {
                    task_id: "task-1".into(),
                    bucket: "bucket".into(),
                    region: "us-east-1".into(),
                },
                launch: LaunchSelector::Serverless,
            })
            .await
            .unwrap();
        assert_eq!(outcome.started_arns.len(), 3);
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn rejected_launch_escalates() {
        let svc = InMemoryContainerService::new();
        *svc.reject_with.write().await = Some(("CapacityUnavailable".into(), "no hosts".into()));
        let arn = svc.register_task_definition(spec()).await.unwrap();
        let err = svc
            .run_task(RunTaskRequest {
                cluster: "cb-cluster".into(),
                task_definition_arn: arn,
                count: 1,
                network: NetworkConfig {
                    subnets: vec![],
                    security_groups: vec![],
                    assign_public_ip: true,
                },
                overrides: EnvOverrides {
                    task_id: "task-1".into(),
                    bucket: "bucket".into(),
                    region: "us-east-1".into(),
                },
                launch: LaunchSelector::Serverless,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerServiceError::LaunchRejected { .. }));
    }
}
