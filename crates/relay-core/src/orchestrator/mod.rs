//! Orchestrator: the dependency-resolution loop.
//!
//! A single polling loop running three passes per tick, in order:
//! dependency resolution (blocked tasks whose predecessors completed
//! become pending, with upstream artifacts copied in), lease reclamation
//! (in-progress tasks whose worker died get retried or terminally
//! failed), and workflow aggregation (per-workflow status roll-up).
//!
//! Every pass is idempotent: each write is a single-row conditional
//! update, so running two orchestrators concurrently is safe, merely
//! redundant.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use relay_db::models::{TaskStatus, WorkflowStatus};
use relay_db::queries::tasks as task_db;
use relay_db::queries::workflows as workflow_db;

use crate::config::EngineConfig;
use crate::journal::Journal;

/// Outcome of one dependency-resolution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DependencyPass {
    /// Tasks moved `blocked -> pending`.
    pub unblocked: usize,
    /// Tasks moved `blocked -> failed` because a dependency failed.
    pub failed: usize,
}

/// Outcome of one lease-reclamation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeasePass {
    /// Expired tasks returned to `pending` for another attempt.
    pub retried: usize,
    /// Expired tasks moved to terminal `failed` (retries exhausted).
    pub failed: usize,
}

/// Run the orchestrator loop until cancelled.
///
/// Pass errors are logged and absorbed; the loop only exits on
/// cancellation. Killing the process is how an operator stops it, and
/// doing so loses nothing -- the next instance resumes from store state.
pub async fn run_orchestrator(
    pool: &PgPool,
    config: &EngineConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let journal = Journal::new("orchestrator");
    tracing::info!(
        poll_interval_secs = config.poll_interval.as_secs(),
        lease_ttl_secs = config.lease_ttl.as_secs(),
        "orchestrator starting"
    );

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if let Err(e) = run_tick(pool, config, &journal).await {
            tracing::warn!(error = %e, "orchestrator tick failed, backing off");
            tokio::select! {
                _ = tokio::time::sleep(config.backoff_on_error) => {}
                _ = cancel.cancelled() => {}
            }
            continue;
        }

        tokio::select! {
            _ = tokio::time::sleep(config.poll_interval) => {}
            _ = cancel.cancelled() => {}
        }
    }

    tracing::info!("orchestrator stopped");
    Ok(())
}

/// One orchestrator tick: the three passes, in their required order.
pub async fn run_tick(pool: &PgPool, config: &EngineConfig, journal: &Journal) -> Result<()> {
    resolve_dependencies(pool, journal).await?;
    reclaim_expired_leases(pool, config.lease_ttl.as_secs_f64(), journal).await?;
    aggregate_workflows(pool, journal).await?;
    Ok(())
}

/// Dependency resolution: visit every blocked task and decide its fate.
///
/// - all dependencies completed: copy their artifacts into
///   `input_context.dependency_outputs` and move to `pending`. This is
///   the sole mechanism by which artifacts flow downstream.
/// - any dependency failed: propagate terminal failure.
/// - otherwise: leave blocked.
///
/// A blocked task without dependencies is moved to `pending` too; the
/// planner never inserts one, but the pass handles it rather than
/// wedging the workflow.
pub async fn resolve_dependencies(pool: &PgPool, journal: &Journal) -> Result<DependencyPass> {
    let blocked = task_db::list_blocked_tasks(pool).await?;
    let mut pass = DependencyPass::default();

    for task in &blocked {
        let deps = task_db::get_dependency_tasks(pool, &task.id)
            .await
            .with_context(|| format!("failed to load dependencies of {}", task.id))?;

        if deps.iter().all(|d| d.status == TaskStatus::Completed) {
            // An empty dependency set lands here too, with an empty map.
            let mut outputs = BTreeMap::new();
            for dep in &deps {
                outputs.insert(
                    dep.id.clone(),
                    dep.output_artifact.clone().unwrap_or(Value::Null),
                );
            }
            let outputs =
                serde_json::to_value(outputs).context("failed to build dependency outputs")?;

            let rows = task_db::unblock_task(pool, &task.id, &outputs).await?;
            if rows > 0 {
                pass.unblocked += 1;
                tracing::info!(task_id = %task.id, "task unblocked");
                journal
                    .info(pool, "dependencies satisfied, task now pending",
                        Some(&task.workflow_id), Some(&task.id))
                    .await;
            }
        } else if deps.iter().any(|d| d.status == TaskStatus::Failed) {
            let rows = task_db::fail_blocked_task(pool, &task.id).await?;
            if rows > 0 {
                pass.failed += 1;
                tracing::warn!(task_id = %task.id, "task failed: upstream dependency failed");
                journal
                    .warn(pool, "dependency failed, task failed without running",
                        Some(&task.workflow_id), Some(&task.id))
                    .await;
            }
        }
        // Else: some dependency still outstanding; leave blocked.
    }

    Ok(pass)
}

/// Lease reclamation: recover tasks from workers that died, hung, or
/// were partitioned.
///
/// Applies the same retry-or-terminate policy as a handler failure, with
/// `last_error = "lock timeout"`. The conditional updates are guarded on
/// the lock holder observed during the scan, so two orchestrators cannot
/// double-account a retry.
pub async fn reclaim_expired_leases(
    pool: &PgPool,
    lease_ttl_secs: f64,
    journal: &Journal,
) -> Result<LeasePass> {
    let expired = task_db::list_expired_leases(pool, lease_ttl_secs).await?;
    let mut pass = LeasePass::default();

    for task in &expired {
        // In-progress rows always carry a lock; skip anything that
        // changed between the scan and now.
        let Some(holder) = task.worker_lock.as_deref() else {
            continue;
        };
        let attempted = task.retry_count + 1;

        if attempted <= task.max_retries {
            let rows = task_db::release_task_for_retry(
                pool,
                &task.id,
                holder,
                attempted,
                "lock timeout",
            )
            .await?;
            if rows > 0 {
                pass.retried += 1;
                tracing::warn!(
                    task_id = %task.id,
                    worker_id = %holder,
                    retry_count = attempted,
                    "lease expired, task returned to pending"
                );
                journal
                    .warn(pool,
                        format!("lease expired on worker {holder}, retry {attempted}/{}", task.max_retries),
                        Some(&task.workflow_id), Some(&task.id))
                    .await;
            }
        } else {
            let rows =
                task_db::fail_task_terminal(pool, &task.id, holder, attempted, "lock timeout")
                    .await?;
            if rows > 0 {
                pass.failed += 1;
                tracing::error!(
                    task_id = %task.id,
                    worker_id = %holder,
                    "lease expired with no retries left, task failed"
                );
                journal
                    .error(pool, "lease expired with retries exhausted, task failed",
                        Some(&task.workflow_id), Some(&task.id))
                    .await;
            }
        }
    }

    Ok(pass)
}

/// Workflow aggregation: roll task states up to workflow status.
///
/// - every task completed: workflow `completed`.
/// - at least one failed and nothing pending or in progress: `failed`.
/// - anything pending or in progress: `running`.
/// - otherwise unchanged.
///
/// Returns the number of workflows whose status changed.
pub async fn aggregate_workflows(pool: &PgPool, journal: &Journal) -> Result<usize> {
    let active = workflow_db::list_active_workflows(pool).await?;
    let mut transitions = 0;

    for workflow in &active {
        let counts = task_db::count_tasks_by_status(pool, &workflow.id).await?;

        let next = if counts.all_completed() {
            Some(WorkflowStatus::Completed)
        } else if counts.settled_failed() {
            Some(WorkflowStatus::Failed)
        } else if counts.any_active() {
            Some(WorkflowStatus::Running)
        } else {
            None
        };

        if let Some(next) = next {
            if next != workflow.status {
                workflow_db::update_workflow_status(pool, &workflow.id, next).await?;
                transitions += 1;
                tracing::info!(
                    workflow_id = %workflow.id,
                    from = %workflow.status,
                    to = %next,
                    "workflow status updated"
                );
                journal
                    .info(pool, format!("workflow {next}"), Some(&workflow.id), None)
                    .await;
            }
        }
    }

    Ok(transitions)
}
