//! Ephemeral worker flow (§4.7 items 1-5): download the task envelope,
//! evaluate it, write the result, exit 0 regardless of evaluation outcome.

use cb_object_store::{ObjectStore, PutOptions};
use cb_session::Evaluator;
use cb_types::{keys, TaskEnvelope};
use uuid::Uuid;

use crate::error::Result;

/// Run exactly one ephemeral task. Only infrastructure failures (the
/// object store itself) return `Err`; an evaluation error is captured in
/// the written result envelope and this still returns `Ok(())`.
pub async fn run_ephemeral_task<O, E>(store: &O, task_id: Uuid, evaluator: &E) -> Result<()>
where
    O: ObjectStore,
    E: Evaluator,
{
    let (bytes, _etag) = store.get(&keys::task_key(task_id)).await?;
    let envelope: TaskEnvelope = cb_codec::decode(&bytes)?;

    let result = evaluator.evaluate(&envelope).await;
    let result_bytes = cb_codec::encode(&result)?;
    store.put(&keys::result_key(task_id), result_bytes, PutOptions::default()).await?;

    tracing::info!(task_id = %task_id, error = result.error, "ephemeral task finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FunctionRegistry, RegistryEvaluator};
    use cb_codec::Value;
    use cb_object_store::memory::InMemoryObjectStore;
    use chrono::Utc;

    #[tokio::test]
    async fn writes_a_result_envelope_for_a_successful_evaluation() {
        let store = InMemoryObjectStore::new();
        let task_id = Uuid::new_v4();

        let call = Value::List(vec![Value::Str("square".into()), Value::Int(7)]);
        let expr_bytes = cb_codec::encode(&call).unwrap();
        let globals_bytes = cb_codec::encode(&Value::Map(Default::default())).unwrap();
        let payload = cb_codec::encode(&(expr_bytes, globals_bytes)).unwrap();
        let envelope = TaskEnvelope {
            task_id,
            session_id: None,
            payload,
            env: Default::default(),
            created_at: Utc::now(),
        };
        store
            .put(&keys::task_key(task_id), cb_codec::encode(&envelope).unwrap(), PutOptions::default())
            .await
            .unwrap();

        let evaluator = RegistryEvaluator::new(FunctionRegistry::with_builtins());
        run_ephemeral_task(&store, task_id, &evaluator).await.unwrap();

        assert!(store.head(&keys::result_key(task_id)).await.unwrap().is_some());
    }
}
