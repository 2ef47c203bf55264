//! Database query functions for the `logs` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{LogEntry, LogLevel};

/// Parameters for inserting a new log entry.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    pub workflow_id: Option<String>,
    pub task_id: Option<String>,
}

/// Insert a log entry. Returns the inserted row with server-generated
/// defaults (id, recorded_at).
pub async fn insert_log(pool: &PgPool, new: &NewLogEntry) -> Result<LogEntry> {
    let entry = sqlx::query_as::<_, LogEntry>(
        "INSERT INTO logs (level, component, message, workflow_id, task_id) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(new.level)
    .bind(&new.component)
    .bind(&new.message)
    .bind(&new.workflow_id)
    .bind(&new.task_id)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert log entry from {}", new.component))?;

    Ok(entry)
}

/// Fetch recent log entries, most recent first, optionally filtered by
/// workflow.
pub async fn recent_logs(
    pool: &PgPool,
    workflow_id: Option<&str>,
    limit: i64,
) -> Result<Vec<LogEntry>> {
    let entries = sqlx::query_as::<_, LogEntry>(
        "SELECT * FROM logs \
         WHERE ($1::text IS NULL OR workflow_id = $1) \
         ORDER BY recorded_at DESC, id DESC \
         LIMIT $2",
    )
    .bind(workflow_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to fetch recent logs")?;

    Ok(entries)
}
