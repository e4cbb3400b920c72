//! ECS-backed `ContainerService`.

use async_trait::async_trait;
use aws_sdk_ecs::types::{
    AssignPublicIp, AwsVpcConfiguration, CapacityProviderStrategyItem, ContainerDefinition,
    ContainerOverride, KeyValuePair, LaunchType, LogConfiguration, LogDriver, NetworkConfiguration,
    PortMapping, RuntimePlatform, TaskOverride,
};
use aws_sdk_ecs::Client;
use cb_retry::RetryPolicy;

use crate::{
    Architecture, ContainerService, ContainerServiceError, LaunchSelector, Result, RunTaskFailure,
    RunTaskOutcome, RunTaskRequest, TaskDefinitionInfo, TaskDefinitionSpec, TaskInfo, TaskRunState,
};

pub struct EcsContainerService {
    client: Client,
    retry: RetryPolicy,
}

impl EcsContainerService {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
        }
    }

    pub async fn from_env(region: &str) -> Self {
        let config = aws_config::from_env()
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self::new(Client::new(&config))
    }

    fn classify(err: &aws_sdk_ecs::error::SdkError<impl std::error::Error + 'static>) -> ContainerServiceError {
        use aws_sdk_ecs::error::SdkError;
        match err {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
                ContainerServiceError::Transient(err.to_string())
            }
            SdkError::ServiceError(service_err) if service_err.raw().status().as_u16() >= 500 => {
                ContainerServiceError::Transient(err.to_string())
            }
            _ => ContainerServiceError::Other(err.to_string()),
        }
    }
}

#[async_trait]
impl ContainerService for EcsContainerService {
    async fn register_task_definition(&self, spec: TaskDefinitionSpec) -> Result<String> {
        let mut container = ContainerDefinition::builder()
            .name("worker")
            .image(&spec.image)
            .log_configuration(
                LogConfiguration::builder()
                    .log_driver(LogDriver::Awslogs)
                    .options("awslogs-group", spec.log_group.clone())
                    .options("awslogs-region", "us-east-1")
                    .options("awslogs-stream-prefix", "cloudburst")
                    .build(),
            )
            .essential(true);
        container = container.port_mappings(PortMapping::builder().build());

        let mut req = self
            .client
            .register_task_definition()
            .family(&spec.family)
            .cpu(spec.cpu_thousandths.to_string())
            .memory(spec.memory_mebibytes.to_string())
            .execution_role_arn(&spec.execution_role_arn)
            .task_role_arn(&spec.task_role_arn)
            .container_definitions(container.build());

        if spec.launch_kind_serverless {
            req = req.requires_compatibilities(aws_sdk_ecs::types::Compatibility::Fargate);
            req = req.network_mode(aws_sdk_ecs::types::NetworkMode::Awsvpc);
        } else {
            req = req.requires_compatibilities(aws_sdk_ecs::types::Compatibility::Ec2);
            if let Some(arch) = spec.architecture {
                let cpu_arch = match arch {
                    Architecture::X86_64 => aws_sdk_ecs::types::CpuArchitecture::X8664,
                    Architecture::Arm64 => aws_sdk_ecs::types::CpuArchitecture::Arm64,
                };
                req = req.runtime_platform(
                    RuntimePlatform::builder().cpu_architecture(cpu_arch).build(),
                );
            }
        }

        let output = self
            .retry
            .run(ContainerServiceError::is_retryable, || async {
                req.clone().send().await.map_err(|e| Self::classify(&e))
            })
            .await
            .map_err(|e| ContainerServiceError::Transient(e.to_string()))?;

        output
            .task_definition()
            .and_then(|td| td.task_definition_arn())
            .map(str::to_string)
            .ok_or_else(|| ContainerServiceError::Other("register_task_definition: no arn in response".into()))
    }

    async fn list_task_definitions(&self, family: &str, limit: usize) -> Result<Vec<String>> {
        let output = self
            .client
            .list_task_definitions()
            .family_prefix(family)
            .sort(aws_sdk_ecs::types::SortOrder::Desc)
            .max_results(limit as i32)
            .send()
            .await
            .map_err(|e| Self::classify(&e))?;
        Ok(output.task_definition_arns().to_vec())
    }

    async fn describe_task_definition(&self, arn: &str) -> Result<TaskDefinitionInfo> {
        let output = self
            .client
            .describe_task_definition()
            .task_definition(arn)
            .send()
            .await
            .map_err(|e| Self::classify(&e))?;
        let td = output
            .task_definition()
            .ok_or_else(|| ContainerServiceError::NotFound(arn.to_string()))?;
        let container = td.container_definitions().first();
        Ok(TaskDefinitionInfo {
            arn: arn.to_string(),
            image: container.and_then(|c| c.image()).unwrap_or_default().to_string(),
            cpu_thousandths: td.cpu().and_then(|c| c.parse().ok()).unwrap_or(0),
            memory_mebibytes: td.memory().and_then(|m| m.parse().ok()).unwrap_or(0),
            launch_kind_serverless: td
                .requires_compatibilities()
                .iter()
                .any(|c| matches!(c, aws_sdk_ecs::types::Compatibility::Fargate)),
            architecture: td.runtime_platform().and_then(|rp| {
                rp.cpu_architecture().map(|a| match a {
                    aws_sdk_ecs::types::CpuArchitecture::Arm64 => Architecture::Arm64,
                    _ => Architecture::X86_64,
                })
            }),
        })
    }

    async fn run_task(&self, req: RunTaskRequest) -> Result<RunTaskOutcome> {
        let net_config = NetworkConfiguration::builder()
            .awsvpc_configuration(
                AwsVpcConfiguration::builder()
                    .set_subnets(Some(req.network.subnets.clone()))
                    .set_security_groups(Some(req.network.security_groups.clone()))
                    .assign_public_ip(if req.network.assign_public_ip {
                        AssignPublicIp::Enabled
                    } else {
                        AssignPublicIp::Disabled
                    })
                    .build(),
            )
            .build();

        let overrides = TaskOverride::builder()
            .container_overrides(
                ContainerOverride::builder()
                    .name("worker")
                    .set_environment(Some(
                        req.overrides
                            .as_map()
                            .into_iter()
                            .map(|(k, v)| KeyValuePair::builder().name(k).value(v).build())
                            .collect(),
                    ))
                    .build(),
            )
            .build();

        let mut builder = self
            .client
            .run_task()
            .cluster(&req.cluster)
            .task_definition(&req.task_definition_arn)
            .count(req.count as i32)
            .network_configuration(net_config)
            .overrides(overrides);

        builder = match &req.launch {
            LaunchSelector::Serverless => builder.launch_type(LaunchType::Fargate),
            LaunchSelector::CapacityProvider { name } => builder.capacity_provider_strategy(
                CapacityProviderStrategyItem::builder()
                    .capacity_provider(name)
                    .weight(1)
                    .build(),
            ),
        };

        let output = self
            .retry
            .run(ContainerServiceError::is_retryable, || async {
                builder.clone().send().await.map_err(|e| Self::classify(&e))
            })
            .await
            .map_err(|e| ContainerServiceError::Transient(e.to_string()))?;

        let failures: Vec<RunTaskFailure> = output
            .failures()
            .iter()
            .map(|f| RunTaskFailure {
                reason: f.reason().unwrap_or_default().to_string(),
                detail: f.detail().unwrap_or_default().to_string(),
            })
            .collect();

        if let Some(first) = failures.first() {
            return Err(ContainerServiceError::LaunchRejected {
                reason: first.reason.clone(),
                detail: first.detail.clone(),
            });
        }

        let started_arns = output
            .tasks()
            .iter()
            .filter_map(|t| t.task_arn().map(str::to_string))
            .collect();

        Ok(RunTaskOutcome {
            started_arns,
            failures,
        })
    }

    async fn list_tasks(&self, cluster: &str) -> Result<Vec<String>> {
        let output = self
            .client
            .list_tasks()
            .cluster(cluster)
            .send()
            .await
            .map_err(|e| Self::classify(&e))?;
        Ok(output.task_arns().to_vec())
    }

    async fn describe_tasks(&self, cluster: &str, arns: &[String]) -> Result<Vec<TaskInfo>> {
        let output = self
            .client
            .describe_tasks()
            .cluster(cluster)
            .set_tasks(Some(arns.to_vec()))
            .send()
            .await
            .map_err(|e| Self::classify(&e))?;
        Ok(output
            .tasks()
            .iter()
            .map(|t| TaskInfo {
                arn: t.task_arn().unwrap_or_default().to_string(),
                last_status: match t.last_status().unwrap_or_default() {
                    "STOPPED" => TaskRunState::Stopped,
                    "RUNNING" => TaskRunState::Running,
                    _ => TaskRunState::Pending,
                },
                stopped_reason: t.stopped_reason().map(str::to_string),
            })
            .collect())
    }

    async fn stop_task(&self, cluster: &str, arn: &str, reason: &str) -> Result<()> {
        self.client
            .stop_task()
            .cluster(cluster)
            .task(arn)
            .reason(reason)
            .send()
            .await
            .map_err(|e| Self::classify(&e))?;
        Ok(())
    }
}
