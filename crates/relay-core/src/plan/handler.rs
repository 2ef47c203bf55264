//! The plan handler: the one handler that materializes DAGs.
//!
//! Consumes a plan task's `input_context.goal`, asks its backend for a
//! decomposition, validates it, and inserts the child task documents.
//! Children are inserted in topological order, each task together with
//! its dependency edges, so the store never holds a blocked task whose
//! edges are missing. A crash mid-insertion is healed on retry: already
//! inserted children surface as duplicate ids and are skipped.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Value, json};

use relay_db::models::{Task, TaskStatus, TaskType};
use relay_db::queries::tasks::{self as task_db, InsertTaskError, NewTask};

use super::backend::PlanBackend;
use super::validate;
use crate::handler::{HandlerContext, TaskHandler};

/// Handler for [`TaskType::Plan`] tasks.
pub struct PlanHandler {
    backend: Arc<dyn PlanBackend>,
    max_retries_default: i32,
}

impl PlanHandler {
    pub fn new(backend: Arc<dyn PlanBackend>, max_retries_default: i32) -> Self {
        Self {
            backend,
            max_retries_default,
        }
    }
}

#[async_trait]
impl TaskHandler for PlanHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Plan
    }

    async fn execute(&self, ctx: HandlerContext<'_>, task: &Task) -> Result<Value> {
        let goal = task
            .input_context
            .get("goal")
            .and_then(|g| g.as_str())
            .context("plan task has no input_context.goal")?;

        let spec = self
            .backend
            .decompose(goal)
            .await
            .context("plan decomposition failed")?;

        // Reject malformed or cyclic plans before anything is written:
        // a partially inserted cycle cannot be repaired by the scheduler.
        let order = validate(&spec)?;

        let mut created_tasks = Vec::with_capacity(order.len());
        let mut edges = Vec::new();

        for idx in order {
            let planned = &spec.tasks[idx];
            let child_id = format!("{}_{}", task.workflow_id, planned.local_id);
            let dependencies: Vec<String> = planned
                .depends_on
                .iter()
                .map(|dep| format!("{}_{}", task.workflow_id, dep))
                .collect();

            let status = if dependencies.is_empty() {
                TaskStatus::Pending
            } else {
                TaskStatus::Blocked
            };

            let new = NewTask {
                id: child_id.clone(),
                workflow_id: task.workflow_id.clone(),
                task_type: planned.task_type,
                status,
                max_retries: planned.max_retries.unwrap_or(self.max_retries_default),
                input_context: planned.input_context.clone(),
            };

            match task_db::insert_task_with_dependencies(ctx.pool, &new, &dependencies).await {
                Ok(_) => {
                    tracing::info!(
                        task_id = %child_id,
                        task_type = %planned.task_type,
                        "plan child inserted"
                    );
                }
                // A previous attempt already inserted this child; the
                // plan is replaying after a crash or lease timeout.
                Err(InsertTaskError::DuplicateId(_)) => {
                    tracing::info!(task_id = %child_id, "plan child already exists, skipping");
                }
                Err(InsertTaskError::Other(e)) => return Err(e),
            }

            for dep in &dependencies {
                edges.push(json!({ "task": child_id, "depends_on": dep }));
            }
            created_tasks.push(Value::String(child_id));
        }

        // The artifact is the plan metadata, so downstream observers can
        // inspect what was planned.
        Ok(json!({
            "goal": goal,
            "created_tasks": created_tasks,
            "edges": edges,
        }))
    }
}

impl std::fmt::Debug for PlanHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanHandler")
            .field("max_retries_default", &self.max_retries_default)
            .finish()
    }
}
