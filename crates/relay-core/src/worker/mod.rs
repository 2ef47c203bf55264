//! Worker: a long-lived cooperative loop that claims one pending task at
//! a time and runs its handler.
//!
//! The worker is oblivious to workflows, dependencies, and other workers;
//! its only contract is with the store. If the process dies mid-handler,
//! the orchestrator's lease reclamation returns the task to the pool --
//! the worker deliberately carries no local crash-recovery state.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use relay_db::models::{Task, TaskType};
use relay_db::queries::tasks as task_db;
use relay_db::queries::workers as worker_db;

use crate::config::EngineConfig;
use crate::handler::{HandlerContext, HandlerRegistry};
use crate::journal::Journal;

/// A worker identity plus the task types it claims.
pub struct Worker {
    worker_id: String,
    name: String,
    task_types: Vec<TaskType>,
    /// Cached TEXT forms of `task_types` for claim binds.
    type_tags: Vec<String>,
    registry: Arc<HandlerRegistry>,
    config: EngineConfig,
    journal: Journal,
}

impl Worker {
    /// Create a worker.
    ///
    /// Fails if `task_types` is empty or if the registry lacks a handler
    /// for any declared type -- a worker that claims tasks it cannot run
    /// would only burn their retry budgets.
    pub fn new(
        worker_id: impl Into<String>,
        name: impl Into<String>,
        task_types: Vec<TaskType>,
        registry: Arc<HandlerRegistry>,
        config: EngineConfig,
    ) -> Result<Self> {
        if task_types.is_empty() {
            bail!("worker requires at least one task type");
        }
        for task_type in &task_types {
            if registry.get(*task_type).is_none() {
                bail!("no handler registered for declared task type {task_type}");
            }
        }

        let worker_id = worker_id.into();
        let type_tags = task_types.iter().map(|t| t.to_string()).collect();
        let journal = Journal::new(format!("worker:{worker_id}"));

        Ok(Self {
            worker_id,
            name: name.into(),
            task_types,
            type_tags,
            registry,
            config,
            journal,
        })
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run the claim/execute loop until cancelled.
    ///
    /// Loop-level errors (store outages and the like) are logged and
    /// absorbed with a backoff sleep; nothing short of cancellation exits
    /// the loop. On graceful shutdown the registration is marked offline
    /// but any held task is left to the lease mechanism.
    pub async fn run(&self, pool: &PgPool, cancel: CancellationToken) -> Result<()> {
        tracing::info!(
            worker_id = %self.worker_id,
            name = %self.name,
            task_types = ?self.task_types,
            "worker starting"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.tick(pool).await {
                Ok(claimed) => {
                    // Only idle ticks sleep; after a completed task we
                    // immediately try to claim the next one.
                    if !claimed {
                        tokio::select! {
                            _ = tokio::time::sleep(self.config.poll_interval) => {}
                            _ = cancel.cancelled() => {}
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        worker_id = %self.worker_id,
                        error = %e,
                        "worker tick failed, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.backoff_on_error) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
            }
        }

        // Graceful shutdown: go offline, but do NOT unlock a held task --
        // the lease is the single source of truth for recovery.
        if let Err(e) = worker_db::mark_worker_offline(pool, &self.worker_id).await {
            tracing::warn!(
                worker_id = %self.worker_id,
                error = %e,
                "failed to mark worker offline on shutdown"
            );
        }
        tracing::info!(worker_id = %self.worker_id, "worker stopped");

        Ok(())
    }

    /// One loop iteration: heartbeat, claim, execute.
    ///
    /// Returns `true` when a task was claimed (the caller skips the idle
    /// sleep). Handler failures are task state, not tick errors; only
    /// store-level trouble propagates as `Err`.
    pub async fn tick(&self, pool: &PgPool) -> Result<bool> {
        worker_db::upsert_worker(pool, &self.worker_id, &self.name, &self.type_tags)
            .await
            .context("failed to refresh worker registration")?;

        let Some(task) = task_db::claim_next_task(pool, &self.worker_id, &self.type_tags).await?
        else {
            return Ok(false);
        };

        self.execute_claimed(pool, &task).await?;
        Ok(true)
    }

    /// Run the handler for a claimed task and write the outcome.
    async fn execute_claimed(&self, pool: &PgPool, task: &Task) -> Result<()> {
        // Should be impossible: the claim filter only matches our types.
        // Release the task rather than executing something we cannot run.
        if !self.task_types.contains(&task.task_type) {
            tracing::error!(
                worker_id = %self.worker_id,
                task_id = %task.id,
                task_type = %task.task_type,
                "claim returned a task outside this worker's task types"
            );
            self.journal
                .error(
                    pool,
                    format!("claimed task of unserved type {}", task.task_type),
                    Some(&task.workflow_id),
                    Some(&task.id),
                )
                .await;
            let msg = format!("claimed by worker without handler for {}", task.task_type);
            self.release_after_failure(pool, task, &msg).await?;
            return Ok(());
        }

        let Some(handler) = self.registry.get(task.task_type) else {
            // Same invariant violation, observed at the registry instead.
            tracing::error!(
                worker_id = %self.worker_id,
                task_id = %task.id,
                task_type = %task.task_type,
                "no handler registered for claimed task type"
            );
            let msg = format!("no handler registered for {}", task.task_type);
            self.release_after_failure(pool, task, &msg).await?;
            return Ok(());
        };

        tracing::info!(
            worker_id = %self.worker_id,
            task_id = %task.id,
            task_type = %task.task_type,
            retry_count = task.retry_count,
            "executing task"
        );
        self.journal
            .info(
                pool,
                format!("task started (attempt {})", task.retry_count + 1),
                Some(&task.workflow_id),
                Some(&task.id),
            )
            .await;

        let ctx = HandlerContext { pool };
        match handler.execute(ctx, task).await {
            Ok(artifact) => {
                let rows =
                    task_db::complete_task(pool, &task.id, &self.worker_id, &artifact).await?;
                if rows == 0 {
                    // The lease expired mid-handler and the orchestrator
                    // reclaimed the task; our result is discarded and the
                    // retry attempt owns the outcome.
                    tracing::warn!(
                        worker_id = %self.worker_id,
                        task_id = %task.id,
                        "task completed after its lease was reclaimed; result discarded"
                    );
                    self.journal
                        .warn(
                            pool,
                            "handler finished after lease reclamation; result discarded",
                            Some(&task.workflow_id),
                            Some(&task.id),
                        )
                        .await;
                } else {
                    tracing::info!(
                        worker_id = %self.worker_id,
                        task_id = %task.id,
                        "task completed"
                    );
                    self.journal
                        .info(pool, "task completed", Some(&task.workflow_id), Some(&task.id))
                        .await;
                }
            }
            Err(e) => {
                tracing::warn!(
                    worker_id = %self.worker_id,
                    task_id = %task.id,
                    error = %e,
                    "handler failed"
                );
                self.release_after_failure(pool, task, &format!("{e:#}")).await?;
            }
        }

        Ok(())
    }

    /// Apply the retry policy after a handler failure (or an invariant
    /// violation): back to `pending` while retries remain, terminal
    /// `failed` once the budget is spent.
    async fn release_after_failure(&self, pool: &PgPool, task: &Task, error: &str) -> Result<()> {
        let attempted = task.retry_count + 1;

        if attempted <= task.max_retries {
            let rows = task_db::release_task_for_retry(
                pool,
                &task.id,
                &self.worker_id,
                attempted,
                error,
            )
            .await?;
            if rows > 0 {
                self.journal
                    .warn(
                        pool,
                        format!("task failed, retry {attempted}/{}: {error}", task.max_retries),
                        Some(&task.workflow_id),
                        Some(&task.id),
                    )
                    .await;
            }
        } else {
            let rows =
                task_db::fail_task_terminal(pool, &task.id, &self.worker_id, attempted, error)
                    .await?;
            if rows > 0 {
                self.journal
                    .error(
                        pool,
                        format!("task failed terminally after {} retries: {error}", task.max_retries),
                        Some(&task.workflow_id),
                        Some(&task.id),
                    )
                    .await;
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("worker_id", &self.worker_id)
            .field("name", &self.name)
            .field("task_types", &self.task_types)
            .finish()
    }
}
