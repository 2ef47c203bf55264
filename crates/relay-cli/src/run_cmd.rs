//! `relay run` command: an orchestrator plus a pool of workers in one
//! process.
//!
//! Each worker is an independent tokio task sharing nothing with its
//! peers but the pool; the same binary can be started on several hosts
//! and the instances cooperate through the store alone.

use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use relay_core::config::EngineConfig;
use relay_core::orchestrator::run_orchestrator;
use relay_core::worker::Worker;

use crate::worker_cmd::{build_registry, parse_task_types, shutdown_token};

/// Run the engine: one orchestrator and `worker_count` workers.
pub async fn run_engine(
    pool: &PgPool,
    task_type_tags: &[String],
    worker_count: usize,
    handler_specs: &[String],
) -> Result<()> {
    let config = EngineConfig::from_env();
    let task_types = parse_task_types(task_type_tags)?;
    let registry = Arc::new(build_registry(&task_types, handler_specs, &config)?);
    let cancel = shutdown_token();

    let mut handles = Vec::new();

    for i in 0..worker_count.max(1) {
        let worker_id = format!("worker-{}", Uuid::new_v4().simple());
        let worker = Worker::new(
            worker_id.clone(),
            format!("run-pool-{i}"),
            task_types.clone(),
            Arc::clone(&registry),
            config.clone(),
        )?;

        let pool = pool.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = worker.run(&pool, cancel).await {
                tracing::error!(worker_id = %worker_id, error = %e, "worker exited with error");
            }
        }));
    }

    run_orchestrator(pool, &config, cancel).await?;

    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}
