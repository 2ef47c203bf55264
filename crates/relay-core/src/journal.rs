//! Store-backed event journal.
//!
//! Mirrors significant engine transitions into the `logs` table so an
//! operator can diagnose a workflow from the store alone. Inserts are
//! best-effort: a journal failure must never take down a worker or
//! orchestrator loop, so errors are downgraded to a tracing warning.

use sqlx::PgPool;

use relay_db::models::LogLevel;
use relay_db::queries::logs::{self, NewLogEntry};

/// A named source of journal entries (e.g. "worker:w-1", "orchestrator").
#[derive(Debug, Clone)]
pub struct Journal {
    component: String,
}

impl Journal {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    pub async fn info(
        &self,
        pool: &PgPool,
        message: impl Into<String>,
        workflow_id: Option<&str>,
        task_id: Option<&str>,
    ) {
        self.write(pool, LogLevel::Info, message.into(), workflow_id, task_id)
            .await;
    }

    pub async fn warn(
        &self,
        pool: &PgPool,
        message: impl Into<String>,
        workflow_id: Option<&str>,
        task_id: Option<&str>,
    ) {
        self.write(pool, LogLevel::Warn, message.into(), workflow_id, task_id)
            .await;
    }

    pub async fn error(
        &self,
        pool: &PgPool,
        message: impl Into<String>,
        workflow_id: Option<&str>,
        task_id: Option<&str>,
    ) {
        self.write(pool, LogLevel::Error, message.into(), workflow_id, task_id)
            .await;
    }

    async fn write(
        &self,
        pool: &PgPool,
        level: LogLevel,
        message: String,
        workflow_id: Option<&str>,
        task_id: Option<&str>,
    ) {
        let entry = NewLogEntry {
            level,
            component: self.component.clone(),
            message,
            workflow_id: workflow_id.map(str::to_owned),
            task_id: task_id.map(str::to_owned),
        };

        if let Err(e) = logs::insert_log(pool, &entry).await {
            tracing::warn!(
                component = %self.component,
                error = %e,
                "failed to persist journal entry (best-effort)"
            );
        }
    }
}
