//! `relay status`, `relay tasks`, and `relay workers` commands.

use anyhow::{Context, Result};
use sqlx::PgPool;

use relay_db::models::TaskStatus;
use relay_db::queries::tasks as task_db;
use relay_db::queries::workers as worker_db;
use relay_db::queries::workflows as workflow_db;

/// Run the status command.
///
/// When `workflow_id` is `Some`, shows detailed status for that
/// workflow. When `None`, lists all workflows with a progress summary.
pub async fn run_status(pool: &PgPool, workflow_id: Option<&str>) -> Result<()> {
    match workflow_id {
        Some(id) => run_workflow_status(pool, id).await,
        None => run_overview(pool).await,
    }
}

/// Show detailed status for a single workflow.
async fn run_workflow_status(pool: &PgPool, workflow_id: &str) -> Result<()> {
    let workflow = workflow_db::get_workflow(pool, workflow_id)
        .await?
        .with_context(|| format!("workflow {workflow_id} not found"))?;

    println!("Workflow: {}", workflow.id);
    println!("Goal: {}", workflow.goal);
    println!("Status: {}", workflow.status);
    println!(
        "Created: {}",
        workflow.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();

    let counts = task_db::count_tasks_by_status(pool, workflow_id).await?;
    println!("Progress: {}/{} completed", counts.completed, counts.total);
    println!(
        "  blocked={} pending={} in_progress={} completed={} failed={}",
        counts.blocked, counts.pending, counts.in_progress, counts.completed, counts.failed,
    );
    println!();

    let tasks = task_db::list_tasks(pool, Some(workflow_id), None).await?;
    println!("Tasks:");
    for task in &tasks {
        let status_icon = match task.status {
            TaskStatus::Blocked => "#",
            TaskStatus::Pending => ".",
            TaskStatus::InProgress => "*",
            TaskStatus::Completed => "+",
            TaskStatus::Failed => "!",
        };
        let mut line = format!(
            "  [{}] {} ({}, {}, retries {}/{})",
            status_icon, task.id, task.task_type, task.status, task.retry_count, task.max_retries
        );
        if let Some(ref err) = task.last_error {
            line.push_str(&format!(" -- {err}"));
        }
        println!("{line}");
    }

    Ok(())
}

/// List all workflows with a progress summary.
async fn run_overview(pool: &PgPool) -> Result<()> {
    let workflows = workflow_db::list_workflows(pool).await?;

    if workflows.is_empty() {
        println!("No workflows found.");
        return Ok(());
    }

    println!(
        "{:<34} {:<12} {:>12}  GOAL",
        "ID", "STATUS", "PROGRESS"
    );
    println!("{}", "-".repeat(80));

    for workflow in &workflows {
        let counts = task_db::count_tasks_by_status(pool, &workflow.id).await?;
        let goal = if workflow.goal.len() > 40 {
            format!("{}...", &workflow.goal[..37])
        } else {
            workflow.goal.clone()
        };
        println!(
            "{:<34} {:<12} {:>5}/{:<5}  {}",
            workflow.id,
            workflow.status.to_string(),
            counts.completed,
            counts.total,
            goal
        );
    }

    Ok(())
}

/// Run the tasks command: list tasks with optional filters.
pub async fn run_tasks(
    pool: &PgPool,
    workflow_id: Option<&str>,
    status: Option<&str>,
) -> Result<()> {
    let status = status
        .map(|s| s.parse::<TaskStatus>())
        .transpose()
        .context("invalid status filter")?;

    let tasks = task_db::list_tasks(pool, workflow_id, status).await?;

    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    println!(
        "{:<44} {:<16} {:<12} {:>8} {:<14}",
        "ID", "TYPE", "STATUS", "RETRIES", "LOCK"
    );
    println!("{}", "-".repeat(98));
    for task in &tasks {
        println!(
            "{:<44} {:<16} {:<12} {:>5}/{:<2} {:<14}",
            task.id,
            task.task_type.to_string(),
            task.status.to_string(),
            task.retry_count,
            task.max_retries,
            task.worker_lock.as_deref().unwrap_or("-"),
        );
    }

    Ok(())
}

/// Run the workers command: list registrations.
pub async fn run_workers(pool: &PgPool) -> Result<()> {
    let workers = worker_db::list_workers(pool).await?;

    if workers.is_empty() {
        println!("No workers registered.");
        return Ok(());
    }

    println!(
        "{:<40} {:<20} {:<9} {:<22} TASK TYPES",
        "WORKER ID", "NAME", "STATUS", "LAST HEARTBEAT"
    );
    println!("{}", "-".repeat(110));
    for worker in &workers {
        println!(
            "{:<40} {:<20} {:<9} {:<22} {}",
            worker.worker_id,
            worker.name,
            worker.status.to_string(),
            worker.last_heartbeat.format("%Y-%m-%d %H:%M:%S").to_string(),
            worker.task_types.join(","),
        );
    }

    Ok(())
}
