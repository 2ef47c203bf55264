//! Database query functions for the `workflows` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{Workflow, WorkflowStatus};

/// Insert a new workflow row. Returns the inserted workflow with
/// server-generated defaults (status, created_at).
pub async fn insert_workflow(pool: &PgPool, id: &str, goal: &str) -> Result<Workflow> {
    let workflow = sqlx::query_as::<_, Workflow>(
        "INSERT INTO workflows (id, goal) VALUES ($1, $2) RETURNING *",
    )
    .bind(id)
    .bind(goal)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert workflow {id}"))?;

    Ok(workflow)
}

/// Fetch a single workflow by ID.
pub async fn get_workflow(pool: &PgPool, id: &str) -> Result<Option<Workflow>> {
    let workflow = sqlx::query_as::<_, Workflow>("SELECT * FROM workflows WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch workflow")?;

    Ok(workflow)
}

/// List all workflows, newest first.
pub async fn list_workflows(pool: &PgPool) -> Result<Vec<Workflow>> {
    let workflows =
        sqlx::query_as::<_, Workflow>("SELECT * FROM workflows ORDER BY created_at DESC")
            .fetch_all(pool)
            .await
            .context("failed to list workflows")?;

    Ok(workflows)
}

/// List workflows that have not reached a terminal status, oldest first.
///
/// This is the set the orchestrator's aggregation pass visits each tick.
pub async fn list_active_workflows(pool: &PgPool) -> Result<Vec<Workflow>> {
    let workflows = sqlx::query_as::<_, Workflow>(
        "SELECT * FROM workflows \
         WHERE status IN ('pending', 'running') \
         ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list active workflows")?;

    Ok(workflows)
}

/// Update the status of a workflow.
///
/// Idempotent: writing the current status again is a harmless no-op at
/// the row level. Errors if the workflow does not exist.
pub async fn update_workflow_status(
    pool: &PgPool,
    id: &str,
    status: WorkflowStatus,
) -> Result<()> {
    let result = sqlx::query("UPDATE workflows SET status = $1 WHERE id = $2")
        .bind(status)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to update workflow status")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("workflow {id} not found");
    }

    Ok(())
}
