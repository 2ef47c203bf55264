//! `relay submit` command: create a workflow and its plan task.

use anyhow::Result;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use relay_db::models::{Task, TaskStatus, TaskType, Workflow};
use relay_db::queries::tasks::{self as task_db, NewTask};
use relay_db::queries::workflows as workflow_db;

use relay_core::config::EngineConfig;

/// Create a workflow for a goal, seeded with a single pending plan task.
///
/// This is the insert that kicks off everything else: a worker claims the
/// plan task, its handler materializes the DAG, and the orchestrator
/// carries the workflow from there.
pub async fn submit_workflow(pool: &PgPool, goal: &str) -> Result<(Workflow, Task)> {
    let workflow_id = Uuid::new_v4().simple().to_string();
    let workflow = workflow_db::insert_workflow(pool, &workflow_id, goal).await?;

    let plan_task = NewTask {
        id: format!("{workflow_id}_plan"),
        workflow_id: workflow_id.clone(),
        task_type: TaskType::Plan,
        status: TaskStatus::Pending,
        max_retries: EngineConfig::from_env().max_retries_default,
        input_context: json!({ "goal": goal }),
    };
    let task = task_db::insert_task(pool, &plan_task).await?;

    Ok((workflow, task))
}

/// Run the submit command.
pub async fn run_submit(pool: &PgPool, goal: &str) -> Result<()> {
    let (workflow, task) = submit_workflow(pool, goal).await?;

    println!("Workflow submitted.");
    println!("  workflow_id = {}", workflow.id);
    println!("  plan_task   = {}", task.id);
    println!();
    println!("Watch it with `relay status {}`.", workflow.id);

    Ok(())
}
