//! Plan backends: the seam behind the plan handler.
//!
//! A backend turns a goal into a [`PlanSpec`]. The production backend
//! calls a language model and parses its output -- that lives outside
//! this crate. [`PipelineBackend`] is the built-in deterministic
//! fallback: a fixed research pipeline that lets the engine run end to
//! end without any external service.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use relay_db::models::TaskType;

use super::{PlanSpec, PlannedTask};

/// Decomposes a goal into a plan.
///
/// A failed decomposition (unreachable service, unparseable model
/// output) is an ordinary error: the plan task re-enters normal retry
/// handling.
#[async_trait]
pub trait PlanBackend: Send + Sync {
    async fn decompose(&self, goal: &str) -> Result<PlanSpec>;
}

/// Deterministic four-stage pipeline: search, analyze, summarize,
/// synthesize, each stage feeding the next.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineBackend;

impl PipelineBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PlanBackend for PipelineBackend {
    async fn decompose(&self, goal: &str) -> Result<PlanSpec> {
        let stage = |local_id: &str, task_type, depends_on: &[&str]| PlannedTask {
            local_id: local_id.to_string(),
            task_type,
            input_context: json!({ "goal": goal }),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            max_retries: None,
        };

        Ok(PlanSpec {
            tasks: vec![
                stage("search", TaskType::Search, &[]),
                stage("analyze", TaskType::Analyze, &["search"]),
                stage("summarize", TaskType::Summarize, &["analyze"]),
                stage("synthesize", TaskType::Synthesize, &["summarize"]),
            ],
        })
    }
}
