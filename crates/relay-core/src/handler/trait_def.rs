//! The `TaskHandler` trait -- the interface a worker invokes per task type.
//!
//! Each concrete handler implements this trait. The trait is intentionally
//! object-safe so it can be stored as `Box<dyn TaskHandler>` in the
//! [`super::HandlerRegistry`].

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use relay_db::models::{Task, TaskType};

/// Resources a handler may use during execution.
///
/// Ordinary handlers mutate the store only through their returned
/// artifact; the pool is exposed for the plan handler, which additionally
/// inserts child task documents.
#[derive(Clone, Copy)]
pub struct HandlerContext<'a> {
    pub pool: &'a PgPool,
}

/// Per-task-type logic invoked by a worker.
///
/// On success the handler returns an artifact (any JSON value, stored
/// verbatim on the task); on failure it returns an error, which drives
/// the retry policy. A handler may run more than once for the same task
/// id -- the claim can be reclaimed if the worker crashes between handler
/// success and the completion write -- so side effects on external
/// systems must be idempotent or safe on retry.
///
/// # Object Safety
///
/// This trait is object-safe: it can be stored and dispatched as
/// `dyn TaskHandler`.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The task type this handler serves.
    fn task_type(&self) -> TaskType;

    /// Execute the task and produce its artifact.
    async fn execute(&self, ctx: HandlerContext<'_>, task: &Task) -> Result<Value>;
}

// Compile-time assertion: TaskHandler must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn TaskHandler) {}
};
