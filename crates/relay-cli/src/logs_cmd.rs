//! `relay logs` command: show recent engine log entries.

use anyhow::Result;
use sqlx::PgPool;

use relay_db::queries::logs as log_db;

/// Run the logs command. Entries print oldest-first so the terminal
/// reads chronologically, even though the query returns newest-first.
pub async fn run_logs(pool: &PgPool, workflow_id: Option<&str>, limit: i64) -> Result<()> {
    let mut entries = log_db::recent_logs(pool, workflow_id, limit).await?;

    if entries.is_empty() {
        println!("No log entries.");
        return Ok(());
    }

    entries.reverse();
    for entry in &entries {
        let time = entry.recorded_at.format("%Y-%m-%d %H:%M:%S%.3f");
        let scope = match (&entry.workflow_id, &entry.task_id) {
            (_, Some(task)) => format!(" [{task}]"),
            (Some(wf), None) => format!(" [{wf}]"),
            (None, None) => String::new(),
        };
        println!(
            "[{time}] {:<5} {}{}: {}",
            entry.level.to_string(),
            entry.component,
            scope,
            entry.message
        );
    }

    Ok(())
}
