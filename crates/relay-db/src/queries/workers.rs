//! Database query functions for the `workers` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::WorkerRegistration;

/// Write or refresh a worker's registration.
///
/// Called on every worker tick: upserts the row with a fresh heartbeat
/// and `online` status, so a restarted worker with a stable id simply
/// resumes its registration.
pub async fn upsert_worker(
    pool: &PgPool,
    worker_id: &str,
    name: &str,
    task_types: &[String],
) -> Result<WorkerRegistration> {
    let registration = sqlx::query_as::<_, WorkerRegistration>(
        "INSERT INTO workers (worker_id, name, task_types, status, last_heartbeat) \
         VALUES ($1, $2, $3, 'online', NOW()) \
         ON CONFLICT (worker_id) DO UPDATE \
         SET name = EXCLUDED.name, \
             task_types = EXCLUDED.task_types, \
             status = 'online', \
             last_heartbeat = NOW() \
         RETURNING *",
    )
    .bind(worker_id)
    .bind(name)
    .bind(task_types)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to upsert worker {worker_id}"))?;

    Ok(registration)
}

/// Mark a worker offline on graceful shutdown.
///
/// Does not touch any task the worker may still hold; the lease mechanism
/// owns that.
pub async fn mark_worker_offline(pool: &PgPool, worker_id: &str) -> Result<()> {
    sqlx::query("UPDATE workers SET status = 'offline' WHERE worker_id = $1")
        .bind(worker_id)
        .execute(pool)
        .await
        .with_context(|| format!("failed to mark worker {worker_id} offline"))?;

    Ok(())
}

/// List all worker registrations, most recently seen first.
pub async fn list_workers(pool: &PgPool) -> Result<Vec<WorkerRegistration>> {
    let workers = sqlx::query_as::<_, WorkerRegistration>(
        "SELECT * FROM workers ORDER BY last_heartbeat DESC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list workers")?;

    Ok(workers)
}
