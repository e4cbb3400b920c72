//! `cloudburst`: the CLI surface over the public facade (spec.md §6.5,
//! SPEC_FULL.md §D) — `CreateCluster`/`cluster.Submit`/`cluster.Map`,
//! `CreateSession`/`AttachSession`/`session.*`, and `ListSessions`. Every
//! subcommand wires up the production AWS backends from
//! `cloudburst::backends` and is otherwise a thin client of the
//! `cloudburst` library crate — all the scheduling, claiming, and cost
//! logic lives there, not here. Styled after `dsl_cli.rs`'s
//! `#[derive(Parser)]`/`Subcommand`/global-flags shape.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cb_codec::Value;
use cb_task_defs::TaskDefDefaults;
use cb_types::ClusterConfig;
use clap::{Parser, Subcommand};
use cloudburst::backends::Backends;
use cloudburst::{Cluster, Session};
use colored::Colorize;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "cloudburst")]
#[command(version, about = "Cloud-burst parallel execution backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// CloudWatch-style log group task definitions are registered against.
    #[arg(long, global = true, env = "CLOUDBURST_LOG_GROUP", default_value = "/cloudburst/workers")]
    log_group: String,

    /// Task execution role ARN (pulls the image, writes logs).
    #[arg(long, global = true, env = "CLOUDBURST_EXECUTION_ROLE_ARN", default_value = "")]
    execution_role_arn: String,

    /// Task role ARN (the worker process's own permissions).
    #[arg(long, global = true, env = "CLOUDBURST_TASK_ROLE_ARN", default_value = "")]
    task_role_arn: String,

    /// Observed account vCPU quota; omit to run unlimited (non-wave) mode.
    #[arg(long, global = true)]
    vcpu_quota: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// `cluster.Submit`: create an ephemeral cluster, submit one call, block for its result.
    Run {
        /// Path to a cluster config YAML file.
        #[arg(long)]
        config: PathBuf,
        /// A call expression, e.g. `square(6)`.
        call: String,
    },
    /// `cluster.Map`: create an ephemeral cluster, submit several calls, collect results in order.
    Map {
        #[arg(long)]
        config: PathBuf,
        /// One or more call expressions, e.g. `square(6)` `square(7)`.
        calls: Vec<String>,
    },
    /// Detached-session operations (`CreateSession`, `AttachSession`, `session.*`).
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// `CreateSession`: writes a manifest, launches `workers` detached containers.
    Create {
        #[arg(long)]
        config: PathBuf,
        /// Session lifetime cap, in seconds; omit for no expiry.
        #[arg(long)]
        absolute_timeout: Option<u64>,
    },
    /// `session.Submit`.
    Submit {
        #[arg(long)]
        config: PathBuf,
        session_id: Uuid,
        /// A call expression, e.g. `square(6)`.
        call: String,
        /// Global bindings visible to every call, `key=value`, repeatable.
        #[arg(long = "global", value_parser = parse_global)]
        globals: Vec<(String, String)>,
    },
    /// `session.Status`.
    Status {
        #[arg(long)]
        config: PathBuf,
        session_id: Uuid,
    },
    /// `session.Collect`.
    Collect {
        #[arg(long)]
        config: PathBuf,
        session_id: Uuid,
        /// Block until every task is terminal (or the timeout elapses).
        #[arg(long)]
        wait: bool,
        /// Collect timeout in seconds; only meaningful with `--wait`.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// `session.Cleanup`.
    Cleanup {
        #[arg(long)]
        config: PathBuf,
        session_id: Uuid,
        /// Best-effort stop of this session's running container tasks.
        #[arg(long)]
        stop_workers: bool,
        /// Bulk-delete every object under `sessions/<sid>/**`.
        #[arg(long)]
        force: bool,
    },
    /// `ListSessions`.
    List {
        /// Region the bucket lives in.
        #[arg(long)]
        region: String,
        /// Bucket to scan for `sessions/*/manifest.blob`.
        #[arg(long)]
        bucket: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let task_def_defaults = TaskDefDefaults {
        log_group: cli.log_group.clone(),
        execution_role_arn: cli.execution_role_arn.clone(),
        task_role_arn: cli.task_role_arn.clone(),
    };

    let result = match cli.command {
        Commands::Run { config, call } => run_cluster_submit(config, call, task_def_defaults, cli.vcpu_quota).await,
        Commands::Map { config, calls } => run_cluster_map(config, calls, task_def_defaults, cli.vcpu_quota).await,
        Commands::Session { action } => run_session(action, task_def_defaults).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}: {err:?}", "error".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run_cluster_submit(
    config: PathBuf,
    call: String,
    task_def_defaults: TaskDefDefaults,
    vcpu_quota: Option<f64>,
) -> Result<()> {
    let config = load_config(&config)?;
    let backends = Backends::from_env(&config.region, &config.bucket, &config.cluster_name).await;
    let cluster = Cluster::create(
        config,
        backends.object_store,
        backends.container_service,
        Some(backends.pool),
        task_def_defaults,
        vcpu_quota,
    );

    let (expr, globals) = encode_call(&call)?;
    let handle = cluster.submit(expr, globals).await.context("submitting call to ephemeral cluster")?;
    let result = cluster.result(handle).await.context("awaiting task result")?;
    print_value_bytes(&result);
    cluster.cleanup().await.context("tearing down ephemeral cluster")?;
    println!("{} ${:.4}", "cost:".dimmed(), cluster.aggregate_cost());
    Ok(())
}

async fn run_cluster_map(
    config: PathBuf,
    calls: Vec<String>,
    task_def_defaults: TaskDefDefaults,
    vcpu_quota: Option<f64>,
) -> Result<()> {
    if calls.is_empty() {
        bail!("map requires at least one call expression");
    }
    let config = load_config(&config)?;
    let backends = Backends::from_env(&config.region, &config.bucket, &config.cluster_name).await;
    let cluster = Cluster::create(
        config,
        backends.object_store,
        backends.container_service,
        Some(backends.pool),
        task_def_defaults,
        vcpu_quota,
    );

    let mut exprs = Vec::with_capacity(calls.len());
    for call in &calls {
        exprs.push(encode_call(call)?);
    }
    let results = cluster.map(exprs).await.context("mapping calls over ephemeral cluster")?;
    for (call, bytes) in calls.iter().zip(results.iter()) {
        print!("{} => ", call.cyan());
        print_value_bytes(bytes);
    }
    cluster.cleanup().await.context("tearing down ephemeral cluster")?;
    println!("{} ${:.4}", "cost:".dimmed(), cluster.aggregate_cost());
    Ok(())
}

async fn run_session(action: SessionAction, task_def_defaults: TaskDefDefaults) -> Result<()> {
    match action {
        SessionAction::Create { config, absolute_timeout } => {
            let config = load_config(&config)?;
            let backends = Backends::from_env(&config.region, &config.bucket, &config.cluster_name).await;
            let session = Session::create(
                config,
                backends.object_store,
                backends.container_service,
                Some(backends.pool),
                task_def_defaults,
                absolute_timeout,
            )
            .await
            .context("creating detached session")?;
            println!("{} {}", "session:".dimmed(), session.session_id());
            Ok(())
        }
        SessionAction::Submit { config, session_id, call, globals } => {
            let config = load_config(&config)?;
            let backends = Backends::from_env(&config.region, &config.bucket, &config.cluster_name).await;
            let session = attach(session_id, config, &backends, task_def_defaults).await?;

            let (expr, _) = encode_call(&call)?;
            let globals_bytes = encode_globals(&globals)?;
            let task_id = session.submit(expr, globals_bytes).await.context("submitting to session")?;
            println!("{} {}", "task:".dimmed(), task_id);
            Ok(())
        }
        SessionAction::Status { config, session_id } => {
            let config = load_config(&config)?;
            let backends = Backends::from_env(&config.region, &config.bucket, &config.cluster_name).await;
            let session = attach(session_id, config, &backends, task_def_defaults).await?;

            let stats = session.status().await.context("reading session status")?;
            println!(
                "total={} pending={} running={} completed={} failed={}",
                stats.total, stats.pending, stats.running, stats.completed, stats.failed
            );
            Ok(())
        }
        SessionAction::Collect { config, session_id, wait, timeout } => {
            let config = load_config(&config)?;
            let backends = Backends::from_env(&config.region, &config.bucket, &config.cluster_name).await;
            let session = attach(session_id, config, &backends, task_def_defaults).await?;

            let results = session
                .collect(wait, timeout.map(Duration::from_secs))
                .await
                .context("collecting session results")?;
            for (task_id, bytes) in &results {
                print!("{} => ", task_id.to_string().cyan());
                print_value_bytes(bytes);
            }
            println!("{} {} result(s)", "collected:".dimmed(), results.len());
            Ok(())
        }
        SessionAction::Cleanup { config, session_id, stop_workers, force } => {
            let config = load_config(&config)?;
            let backends = Backends::from_env(&config.region, &config.bucket, &config.cluster_name).await;
            let session = attach(session_id, config, &backends, task_def_defaults).await?;

            session.cleanup(stop_workers, force).await.context("cleaning up session")?;
            println!("{}", "OK".green());
            Ok(())
        }
        SessionAction::List { region, bucket } => {
            let object_store = cb_object_store::s3::S3ObjectStore::from_env(&region, &bucket).await;
            let summaries = cloudburst::list_sessions(&object_store).await.context("listing sessions")?;
            for s in summaries {
                println!(
                    "{}  created={}  last_activity={}  tasks={}  closed={}",
                    s.session_id, s.created_at, s.last_activity, s.task_count, s.closed
                );
            }
            Ok(())
        }
    }
}

async fn attach(
    session_id: Uuid,
    config: ClusterConfig,
    backends: &Backends,
    task_def_defaults: TaskDefDefaults,
) -> Result<Session<cloudburst::backends::Objects, cloudburst::backends::Containers, cloudburst::backends::Pool>> {
    Session::attach(
        session_id,
        config,
        backends.object_store.clone(),
        backends.container_service.clone(),
        task_def_defaults,
        Some(backends.pool.clone()),
    )
    .await
    .with_context(|| format!("attaching to session {session_id}"))
}

fn load_config(path: &PathBuf) -> Result<ClusterConfig> {
    ClusterConfig::load_from_file(path).with_context(|| format!("loading cluster config from {}", path.display()))
}

/// Parse a `--global key=value` flag into a pair, failing loudly rather
/// than silently dropping malformed input.
fn parse_global(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

fn encode_globals(pairs: &[(String, String)]) -> Result<Vec<u8>> {
    let mut map = BTreeMap::new();
    for (k, v) in pairs {
        map.insert(k.clone(), parse_scalar(v));
    }
    cb_codec::encode(&Value::Map(map)).context("encoding session globals")
}

/// Encode a call expression (`name(arg1,arg2,...)`) into the `(expr_bytes,
/// globals_bytes)` pair `Cluster::submit`/`SessionClient::submit` expect —
/// see `cb_worker::registry::RegistryEvaluator` for the matching decode
/// side. This CLI never attaches globals on the `run`/`map` path;
/// `session submit --global` is the only place they're set.
fn encode_call(call: &str) -> Result<(Vec<u8>, Vec<u8>)> {
    let value = parse_call(call)?;
    let expr = cb_codec::encode(&value).context("encoding call expression")?;
    let globals = cb_codec::encode(&Value::Map(BTreeMap::new())).context("encoding empty globals")?;
    Ok((expr, globals))
}

fn parse_call(call: &str) -> Result<Value> {
    let call = call.trim();
    let Some(open) = call.find('(') else {
        return Ok(Value::List(vec![Value::Str(call.to_string())]));
    };
    if !call.ends_with(')') {
        bail!("malformed call expression '{call}': expected a trailing ')'");
    }
    let name = call[..open].trim();
    let args_str = &call[open + 1..call.len() - 1];

    let mut items = vec![Value::Str(name.to_string())];
    if !args_str.trim().is_empty() {
        for arg in args_str.split(',') {
            items.push(parse_scalar(arg.trim()));
        }
    }
    Ok(Value::List(items))
}

fn parse_scalar(raw: &str) -> Value {
    if let Some(stripped) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return Value::Str(stripped.to_string());
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::Float(f);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => Value::Str(raw.to_string()),
    }
}

fn print_value_bytes(bytes: &[u8]) {
    match cb_codec::decode::<Value>(bytes) {
        Ok(value) => println!("{value:?}"),
        Err(_) => println!("{} bytes (opaque)", bytes.len()),
    }
}
