//! Production backend wiring: the concrete `ObjectStore`/`ContainerService`/
//! `PoolManager` implementations a deployed `cloudburst` binary talks to,
//! assembled from `AWS_DEFAULT_REGION`/the ambient credential chain the
//! same way `bpmn_integration::client`'s `from_env` constructors do.

use std::sync::Arc;

use cb_container_service::ecs::EcsContainerService;
use cb_object_store::s3::S3ObjectStore;
use cb_pool_manager::asg::AsgPoolManager;

pub type Objects = S3ObjectStore;
pub type Containers = EcsContainerService;
pub type Pool = AsgPoolManager;

/// The production backend trio, built from the region and bucket the CLI
/// was invoked with.
pub struct Backends {
    pub object_store: Arc<Objects>,
    pub container_service: Arc<Containers>,
    pub pool: Arc<Pool>,
}

impl Backends {
    pub async fn from_env(region: &str, bucket: &str, cluster_name: &str) -> Self {
        let object_store = Arc::new(S3ObjectStore::from_env(region, bucket).await);
        let container_service = Arc::new(EcsContainerService::from_env(region).await);

        let config = aws_config::from_env()
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        let pool = Arc::new(AsgPoolManager::new(
            aws_sdk_ec2::Client::new(&config),
            aws_sdk_autoscaling::Client::new(&config),
            aws_sdk_ecs::Client::new(&config),
            cluster_name,
        ));

        Self {
            object_store,
            container_service,
            pool,
        }
    }
}
