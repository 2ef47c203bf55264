//! Database query functions for the `tasks` and `task_dependencies`
//! tables.
//!
//! Every state transition here is a single-row conditional UPDATE. The
//! `WHERE` clause carries the expected pre-state (status, and the lock
//! holder where one exists), so a concurrent writer that got there first
//! makes the statement a no-op -- callers observe that as a zero row
//! count and treat it as a lost race, never as corruption.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use thiserror::Error;

use crate::models::{Task, TaskStatus, TaskType};

/// Parameters for inserting a new task row.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: String,
    pub workflow_id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub max_retries: i32,
    pub input_context: Value,
}

/// Error returned by [`insert_task`].
#[derive(Debug, Error)]
pub enum InsertTaskError {
    /// A task with this id already exists.
    #[error("task id {0:?} already exists")]
    DuplicateId(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Insert a new task row. Returns the inserted task with server-generated
/// defaults (`created_at`, null lock fields).
///
/// A unique-key violation on `id` is reported as
/// [`InsertTaskError::DuplicateId`] so callers can distinguish a re-run
/// from a real failure.
pub async fn insert_task(pool: &PgPool, new: &NewTask) -> Result<Task, InsertTaskError> {
    let result = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (id, workflow_id, task_type, status, max_retries, input_context) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(&new.id)
    .bind(&new.workflow_id)
    .bind(new.task_type)
    .bind(new.status)
    .bind(new.max_retries)
    .bind(&new.input_context)
    .fetch_one(pool)
    .await;

    match result {
        Ok(task) => Ok(task),
        Err(e) => {
            if e.as_database_error()
                .is_some_and(|db| db.is_unique_violation())
            {
                Err(InsertTaskError::DuplicateId(new.id.clone()))
            } else {
                Err(anyhow::Error::new(e)
                    .context(format!("failed to insert task {}", new.id))
                    .into())
            }
        }
    }
}

/// Insert a task together with its dependency edges in one transaction.
///
/// In the document model a task and its dependency set are a single
/// record, so their insertion must be atomic: a blocked task visible
/// without its edges would look dependency-free to the resolution pass
/// and run prematurely. Dependency rows must already exist (insert in
/// topological order).
pub async fn insert_task_with_dependencies(
    pool: &PgPool,
    new: &NewTask,
    dependencies: &[String],
) -> Result<Task, InsertTaskError> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to begin task insert transaction")
        .map_err(InsertTaskError::Other)?;

    let result = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (id, workflow_id, task_type, status, max_retries, input_context) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(&new.id)
    .bind(&new.workflow_id)
    .bind(new.task_type)
    .bind(new.status)
    .bind(new.max_retries)
    .bind(&new.input_context)
    .fetch_one(&mut *tx)
    .await;

    let task = match result {
        Ok(task) => task,
        Err(e) => {
            if e.as_database_error()
                .is_some_and(|db| db.is_unique_violation())
            {
                return Err(InsertTaskError::DuplicateId(new.id.clone()));
            }
            return Err(anyhow::Error::new(e)
                .context(format!("failed to insert task {}", new.id))
                .into());
        }
    };

    for dep in dependencies {
        sqlx::query(
            "INSERT INTO task_dependencies (task_id, depends_on) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(&new.id)
        .bind(dep)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to insert dependency edge {} -> {dep}", new.id))
        .map_err(InsertTaskError::Other)?;
    }

    tx.commit()
        .await
        .context("failed to commit task insert transaction")
        .map_err(InsertTaskError::Other)?;

    Ok(task)
}

/// Fetch a single task by ID.
pub async fn get_task(pool: &PgPool, id: &str) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// List tasks, optionally filtered by workflow and/or status, ordered by
/// creation time.
pub async fn list_tasks(
    pool: &PgPool,
    workflow_id: Option<&str>,
    status: Option<TaskStatus>,
) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE ($1::text IS NULL OR workflow_id = $1) \
           AND ($2::text IS NULL OR status = $2) \
         ORDER BY created_at ASC, id ASC",
    )
    .bind(workflow_id)
    .bind(status)
    .fetch_all(pool)
    .await
    .context("failed to list tasks")?;

    Ok(tasks)
}

/// Insert a dependency edge: `task_id` waits on `depends_on_id`.
///
/// Uses `ON CONFLICT DO NOTHING` so this is idempotent.
pub async fn insert_task_dependency(
    pool: &PgPool,
    task_id: &str,
    depends_on_id: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_dependencies (task_id, depends_on) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(task_id)
    .bind(depends_on_id)
    .execute(pool)
    .await
    .context("failed to insert task dependency")?;

    Ok(())
}

/// Get the IDs of all tasks that a given task depends on.
pub async fn get_task_dependencies(pool: &PgPool, task_id: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT depends_on FROM task_dependencies WHERE task_id = $1 ORDER BY depends_on",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to get task dependencies")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Fetch the full task rows a given task depends on.
pub async fn get_dependency_tasks(pool: &PgPool, task_id: &str) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT dep.* FROM task_dependencies td \
         JOIN tasks dep ON dep.id = td.depends_on \
         WHERE td.task_id = $1 \
         ORDER BY dep.id",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to get dependency tasks")?;

    Ok(tasks)
}

// -----------------------------------------------------------------------
// Claim and execution transitions
// -----------------------------------------------------------------------

/// Atomically claim the oldest pending task of one of the given types for
/// a worker.
///
/// This is the claim at the center of the scheduler: the inner SELECT
/// picks one eligible row FIFO by `created_at` (id as tie-break),
/// `FOR UPDATE SKIP LOCKED` makes concurrent claimants pick disjoint
/// rows, and the UPDATE moves it to `in_progress` holding the worker's
/// lock in the same statement. At most one worker ever wins a given task.
///
/// Returns the claimed post-image, or `None` when nothing is eligible.
pub async fn claim_next_task(
    pool: &PgPool,
    worker_id: &str,
    task_types: &[String],
) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET status = 'in_progress', worker_lock = $1, locked_at = NOW() \
         WHERE id = ( \
             SELECT id FROM tasks \
             WHERE status = 'pending' AND task_type = ANY($2) \
             ORDER BY created_at ASC, id ASC \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED \
         ) \
         RETURNING *",
    )
    .bind(worker_id)
    .bind(task_types)
    .fetch_optional(pool)
    .await
    .context("failed to claim next task")?;

    Ok(task)
}

/// Complete a claimed task: store the artifact and release the lock.
///
/// Guarded on the caller still holding the lock; returns the number of
/// rows affected (0 means the lease was reclaimed underneath us).
pub async fn complete_task(
    pool: &PgPool,
    task_id: &str,
    worker_id: &str,
    output_artifact: &Value,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'completed', \
             output_artifact = $3, \
             worker_lock = NULL, \
             locked_at = NULL, \
             completed_at = NOW() \
         WHERE id = $1 AND status = 'in_progress' AND worker_lock = $2",
    )
    .bind(task_id)
    .bind(worker_id)
    .bind(output_artifact)
    .execute(pool)
    .await
    .context("failed to complete task")?;

    Ok(result.rows_affected())
}

/// Release a claimed task back to `pending` for another attempt.
///
/// Sets the incremented retry counter and the error message, and clears
/// the lock. `expected_lock` is the worker id the caller observed holding
/// the task; the guard makes concurrent releases (worker vs. lease
/// reclamation) race safely. Returns rows affected.
pub async fn release_task_for_retry(
    pool: &PgPool,
    task_id: &str,
    expected_lock: &str,
    new_retry_count: i32,
    last_error: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'pending', \
             worker_lock = NULL, \
             locked_at = NULL, \
             retry_count = $3, \
             last_error = $4 \
         WHERE id = $1 AND status = 'in_progress' AND worker_lock = $2",
    )
    .bind(task_id)
    .bind(expected_lock)
    .bind(new_retry_count)
    .bind(last_error)
    .execute(pool)
    .await
    .context("failed to release task for retry")?;

    Ok(result.rows_affected())
}

/// Terminally fail a claimed task (retries exhausted).
///
/// Same guard discipline as [`release_task_for_retry`].
pub async fn fail_task_terminal(
    pool: &PgPool,
    task_id: &str,
    expected_lock: &str,
    new_retry_count: i32,
    last_error: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'failed', \
             worker_lock = NULL, \
             locked_at = NULL, \
             retry_count = $3, \
             last_error = $4, \
             failed_at = NOW() \
         WHERE id = $1 AND status = 'in_progress' AND worker_lock = $2",
    )
    .bind(task_id)
    .bind(expected_lock)
    .bind(new_retry_count)
    .bind(last_error)
    .execute(pool)
    .await
    .context("failed to terminally fail task")?;

    Ok(result.rows_affected())
}

// -----------------------------------------------------------------------
// Dependency resolution and lease reclamation scans
// -----------------------------------------------------------------------

/// List all blocked tasks across all workflows, oldest first.
pub async fn list_blocked_tasks(pool: &PgPool) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE status = 'blocked' ORDER BY created_at ASC, id ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list blocked tasks")?;

    Ok(tasks)
}

/// Unblock a task whose dependencies have all completed.
///
/// Moves `blocked -> pending` and merges the dependency artifact map into
/// `input_context.dependency_outputs` in the same statement, so a task is
/// never runnable without the artifacts it is owed. Optimistic on the
/// task still being blocked; returns rows affected.
pub async fn unblock_task(
    pool: &PgPool,
    task_id: &str,
    dependency_outputs: &Value,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'pending', \
             input_context = jsonb_set(input_context, '{dependency_outputs}', $2, true) \
         WHERE id = $1 AND status = 'blocked'",
    )
    .bind(task_id)
    .bind(dependency_outputs)
    .execute(pool)
    .await
    .context("failed to unblock task")?;

    Ok(result.rows_affected())
}

/// Propagate an upstream failure: move a blocked task to terminal
/// `failed` with `last_error = "dependency failed"`.
pub async fn fail_blocked_task(pool: &PgPool, task_id: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'failed', \
             last_error = 'dependency failed', \
             failed_at = NOW() \
         WHERE id = $1 AND status = 'blocked'",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to fail blocked task")?;

    Ok(result.rows_affected())
}

/// List in-progress tasks whose lease has expired.
///
/// A lease expires when `locked_at` is older than `lease_ttl_secs` ago.
/// Both `locked_at` and the comparison clock come from the database
/// server, so host clock skew does not cause premature reclamation.
pub async fn list_expired_leases(pool: &PgPool, lease_ttl_secs: f64) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE status = 'in_progress' \
           AND locked_at < NOW() - make_interval(secs => $1) \
         ORDER BY locked_at ASC",
    )
    .bind(lease_ttl_secs)
    .fetch_all(pool)
    .await
    .context("failed to list expired leases")?;

    Ok(tasks)
}

// -----------------------------------------------------------------------
// Workflow aggregation support
// -----------------------------------------------------------------------

/// Task counts by status for one workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskStatusCounts {
    pub blocked: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}

impl TaskStatusCounts {
    /// True when every task has completed.
    pub fn all_completed(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }

    /// True when at least one task is failed and none can still run.
    pub fn settled_failed(&self) -> bool {
        self.failed > 0 && self.pending == 0 && self.in_progress == 0
    }

    /// True when at least one task is runnable or running.
    pub fn any_active(&self) -> bool {
        self.pending > 0 || self.in_progress > 0
    }
}

/// Get a summary of task counts by status for a given workflow.
pub async fn count_tasks_by_status(pool: &PgPool, workflow_id: &str) -> Result<TaskStatusCounts> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status::text, COUNT(*) as cnt \
         FROM tasks \
         WHERE workflow_id = $1 \
         GROUP BY status",
    )
    .bind(workflow_id)
    .fetch_all(pool)
    .await
    .context("failed to count tasks by status")?;

    let mut counts = TaskStatusCounts::default();
    for (status, count) in &rows {
        match status.as_str() {
            "blocked" => counts.blocked = *count,
            "pending" => counts.pending = *count,
            "in_progress" => counts.in_progress = *count,
            "completed" => counts.completed = *count,
            "failed" => counts.failed = *count,
            _ => {}
        }
        counts.total += count;
    }
    Ok(counts)
}
