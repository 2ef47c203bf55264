//! Planning: turning a goal into a task DAG.
//!
//! A `PlanSpec` is the declarative description of the sub-DAG a plan
//! task wants to materialize. The [`PlanBackend`] produces one from a
//! goal (the LLM seam); [`validate`] rejects malformed or cyclic specs
//! before anything touches the store; [`PlanHandler`] inserts the
//! validated children and reports the plan metadata as its artifact.

pub mod backend;
pub mod handler;
pub mod validate;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use relay_db::models::TaskType;

pub use backend::{PipelineBackend, PlanBackend};
pub use handler::PlanHandler;
pub use validate::{PlanError, validate};

/// A single task in a plan, addressed by an id local to the plan.
///
/// Dependencies refer to other local ids in the same spec; a plan cannot
/// express an edge to anything outside itself (in particular, not to the
/// plan task that spawned it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTask {
    pub local_id: String,
    pub task_type: TaskType,
    /// Initial `input_context` for the child task.
    #[serde(default = "empty_object")]
    pub input_context: Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Override of the engine-wide retry budget.
    #[serde(default)]
    pub max_retries: Option<i32>,
}

/// The decomposition of a goal: the set of child tasks to insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSpec {
    pub tasks: Vec<PlannedTask>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}
