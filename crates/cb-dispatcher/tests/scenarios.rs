//! End-to-end scheduler scenarios from the specification's testable
//! properties, run entirely against in-memory fakes.

use std::sync::Arc;

use cb_container_service::memory::InMemoryContainerService;
use cb_dispatcher::Dispatcher;
use cb_object_store::memory::InMemoryObjectStore;
use cb_object_store::{ObjectStore, PutOptions};
use cb_pool_manager::memory::InMemoryPoolManager;
use cb_task_defs::TaskDefDefaults;
use cb_types::{keys, ClusterConfig, ResultEnvelope};
use chrono::Utc;

fn base_config() -> ClusterConfig {
    ClusterConfig::builder()
        .workers(2)
        .cpu(1.0)
        .memory("2GB")
        .region("us-east-1")
        .image_ref("example.com/worker:latest")
        .bucket("cloudburst-bucket")
        .cluster_name("test-cluster")
        .account_id("123456789012")
        .subnet("subnet-aaa")
        .security_group("sg-aaa")
        .build()
        .unwrap()
}

fn defaults() -> TaskDefDefaults {
    TaskDefDefaults {
        log_group: "/cloudburst/worker".into(),
        execution_role_arn: "arn:aws:iam::123:role/exec".into(),
        task_role_arn: "arn:aws:iam::123:role/task".into(),
    }
}

async fn fake_complete(store: &InMemoryObjectStore, task_id: uuid::Uuid, value: i64) {
    let now = Utc::now();
    let envelope = ResultEnvelope::ok(task_id, cb_codec::encode(&value).unwrap(), now, now);
    let bytes = cb_codec::encode(&envelope).unwrap();
    store
        .put(&keys::result_key(task_id), bytes, PutOptions::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn tiny_sequential_equivalent() {
    let store = InMemoryObjectStore::shared();
    let container = InMemoryContainerService::shared();
    let dispatcher: Dispatcher<_, _, InMemoryPoolManager> =
        Dispatcher::new(base_config(), store.clone(), container, None, defaults(), None);

    let mut handles = Vec::new();
    for x in 1..=4i64 {
        let handle = dispatcher
            .submit(cb_codec::encode(&x).unwrap(), Vec::new())
            .await
            .unwrap();
        fake_complete(&store, handle.task_id, x * x).await;
        handles.push(handle);
    }

    let mut results = Vec::new();
    for handle in handles {
        let bytes = dispatcher.result(handle).await.unwrap();
        let value: i64 = cb_codec::decode(&bytes).unwrap();
        results.push(value);
    }
    results.sort();
    assert_eq!(results, vec![1, 4, 9, 16]);
}

#[tokio::test]
async fn wave_scheduling_respects_quota() {
    let mut config = base_config();
    config.workers = 10;
    config.cpu_units = cb_types::CpuUnits::new(4.0).unwrap();

    let store = InMemoryObjectStore::shared();
    let container = InMemoryContainerService::shared();
    let dispatcher: Dispatcher<_, _, InMemoryPoolManager> =
        Dispatcher::new(config, store.clone(), container, None, defaults(), Some(16.0));

    assert_eq!(dispatcher.workers_per_wave(), Some(4));

    let exprs: Vec<(Vec<u8>, Vec<u8>)> = (0..10)
        .map(|i| (cb_codec::encode(&i).unwrap(), Vec::new()))
        .collect();
    let handles = dispatcher.submit_batch(exprs).await.unwrap();
    assert_eq!(handles.len(), 10);

    // First wave: exactly 4 in flight, 6 still queued (P6).
    assert_eq!(dispatcher.in_flight_count().await, 4);
    assert_eq!(dispatcher.pending_count().await, 6);
    assert_eq!(dispatcher.wave_index().await, 1);

    let mut remaining: std::collections::VecDeque<_> = handles.into_iter().collect();
    let mut wave_sizes = Vec::new();

    while dispatcher.in_flight_count().await > 0 || !remaining.is_empty() {
        let in_flight = dispatcher.in_flight_count().await;
        assert!(in_flight <= 4, "in-flight never exceeds workers_per_wave (P6)");
        wave_sizes.push(in_flight);

        let batch: Vec<_> = (0..in_flight).filter_map(|_| remaining.pop_front()).collect();
        for handle in &batch {
            fake_complete(&store, handle.task_id, 1).await;
        }
        for handle in &batch {
            dispatcher.result(*handle).await.unwrap();
        }
        // Prune the now-completed wave and open the next one.
        dispatcher.tick().await.unwrap();
    }

    assert_eq!(wave_sizes, vec![4, 4, 2], "4 + 4 + 2 = 3 waves, dispatched in order");
    assert_eq!(dispatcher.wave_index().await, 3);
}
