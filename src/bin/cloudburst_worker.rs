//! `cloudburst-worker`: the container entrypoint (spec.md §4.7/§6.4). Reads
//! exactly three environment variables — `TASK_ID`, `BUCKET` (alias
//! `S3_BUCKET`), `REGION` (alias `AWS_DEFAULT_REGION`) — no other channel
//! of communication reaches a worker container.
//!
//! Ephemeral and detached workers share one binary and one launch path
//! (§4.2): the task envelope at `TASK_ID` decides which flow runs. If its
//! `session_id` is set, this is a bootstrap envelope for a detached worker
//! and we enter the poll-claim-execute loop; otherwise it's a real
//! ephemeral task and we run it directly.

use std::process::ExitCode;

use anyhow::{Context, Result};
use cb_object_store::s3::S3ObjectStore;
use cb_worker::{resolve_session_id, run_ephemeral_task, FunctionRegistry, RegistryEvaluator, WorkerError};
use uuid::Uuid;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = ?err, "worker exiting on infrastructure failure");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let task_id_raw = env_var("TASK_ID")?;
    let task_id: Uuid = task_id_raw
        .parse()
        .with_context(|| format!("TASK_ID '{task_id_raw}' is not a valid UUID"))?;
    let bucket = env_var_aliased("BUCKET", "S3_BUCKET")?;
    let region = env_var_aliased("REGION", "AWS_DEFAULT_REGION")?;

    tracing::info!(%task_id, bucket, region, "worker starting");

    let store = S3ObjectStore::from_env(&region, &bucket).await;
    let evaluator = RegistryEvaluator::new(FunctionRegistry::with_builtins());

    match resolve_session_id(&store, task_id).await {
        Ok(session_id) => {
            let worker_id = worker_identity();
            tracing::info!(%session_id, worker_id, "entering detached worker loop");
            cb_session::run_worker_loop(&store, session_id, &worker_id, &evaluator)
                .await
                .context("detached worker loop")
        }
        Err(WorkerError::MissingSessionId(_)) => {
            tracing::info!(%task_id, "running as an ephemeral task");
            run_ephemeral_task(&store, task_id, &evaluator).await.context("running ephemeral task")
        }
        Err(e) => Err(e).context("resolving bootstrap envelope"),
    }
}

fn env_var(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("required environment variable {name} is not set"))
}

fn env_var_aliased(primary: &str, alias: &str) -> Result<String> {
    std::env::var(primary)
        .or_else(|_| std::env::var(alias))
        .with_context(|| format!("neither {primary} nor {alias} is set"))
}

/// A worker's claim identity: hostname when the container runtime sets
/// one, otherwise a fresh UUID. Only used for `claimed_by` diagnostics —
/// never for correctness (the conditional put is what makes a claim
/// exclusive, not this identifier).
fn worker_identity() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| Uuid::new_v4().to_string())
}
