//! `relay worker` command: run a single worker loop until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use relay_core::config::EngineConfig;
use relay_core::handler::{HandlerRegistry, SubprocessHandler};
use relay_core::plan::{PipelineBackend, PlanHandler};
use relay_core::worker::Worker;
use relay_db::models::TaskType;

/// Parse comma-separated task type tags into [`TaskType`] values.
pub fn parse_task_types(tags: &[String]) -> Result<Vec<TaskType>> {
    let mut types = Vec::with_capacity(tags.len());
    for tag in tags {
        let parsed = tag
            .trim()
            .parse::<TaskType>()
            .with_context(|| format!("unknown task type {tag:?}"))?;
        if !types.contains(&parsed) {
            types.push(parsed);
        }
    }
    Ok(types)
}

/// Build the handler registry for a set of task types.
///
/// Plan tasks get the built-in planner; every other declared type needs
/// a `type=command` entry pointing at an external handler executable.
pub fn build_registry(
    task_types: &[TaskType],
    handler_specs: &[String],
    config: &EngineConfig,
) -> Result<HandlerRegistry> {
    let mut commands = Vec::new();
    for spec in handler_specs {
        let (tag, command) = spec
            .split_once('=')
            .with_context(|| format!("invalid --handler {spec:?}, expected type=command"))?;
        let task_type = tag
            .trim()
            .parse::<TaskType>()
            .with_context(|| format!("unknown task type in --handler {spec:?}"))?;
        commands.push((task_type, command.trim().to_string()));
    }

    let mut registry = HandlerRegistry::new();
    for task_type in task_types {
        if let Some((_, command)) = commands.iter().find(|(t, _)| t == task_type) {
            registry.register(SubprocessHandler::new(*task_type, command.clone()));
        } else if *task_type == TaskType::Plan {
            registry.register(PlanHandler::new(
                Arc::new(PipelineBackend::new()),
                config.max_retries_default,
            ));
        } else {
            bail!(
                "no handler for task type {task_type}; pass --handler {task_type}=<command>"
            );
        }
    }

    Ok(registry)
}

/// Cancellation token that trips on Ctrl-C.
pub fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            trigger.cancel();
        }
    });
    cancel
}

/// Run the worker command.
pub async fn run_worker(
    pool: &PgPool,
    task_type_tags: &[String],
    worker_id: Option<&str>,
    name: Option<&str>,
    handler_specs: &[String],
) -> Result<()> {
    let config = EngineConfig::from_env();
    let task_types = parse_task_types(task_type_tags)?;
    let registry = Arc::new(build_registry(&task_types, handler_specs, &config)?);

    let worker_id = worker_id
        .map(str::to_owned)
        .unwrap_or_else(|| format!("worker-{}", Uuid::new_v4().simple()));
    let name = name.map(str::to_owned).unwrap_or_else(|| worker_id.clone());

    let worker = Worker::new(worker_id, name, task_types, registry, config)?;
    let cancel = shutdown_token();

    worker.run(pool, cancel).await
}
