//! Subprocess handler adapter.
//!
//! Serves a task type by spawning a configured external command, writing
//! the task document as JSON to its stdin, and parsing the artifact JSON
//! from its stdout. This is the seam through which out-of-process
//! handler bodies (LLM calls and the like) plug into a worker without
//! the core knowing anything about them.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use relay_db::models::{Task, TaskType};

use super::trait_def::{HandlerContext, TaskHandler};

/// Handler that delegates execution to an external command.
///
/// Protocol: the task document is serialized to JSON on the child's
/// stdin; the child exits 0 and prints the artifact as JSON on stdout,
/// or exits non-zero with diagnostics on stderr. The command is invoked
/// once per attempt, so it must be idempotent or safe on retry like any
/// other handler.
#[derive(Debug, Clone)]
pub struct SubprocessHandler {
    task_type: TaskType,
    program: String,
    args: Vec<String>,
    /// Local runtime bound; the lease TTL remains the global backstop.
    timeout: Option<Duration>,
}

impl SubprocessHandler {
    pub fn new(task_type: TaskType, program: impl Into<String>) -> Self {
        Self {
            task_type,
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn run_child(&self, task_json: String) -> Result<std::process::Output> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn handler command {:?}", self.program))?;

        let mut stdin = child
            .stdin
            .take()
            .context("handler child has no stdin handle")?;
        stdin
            .write_all(task_json.as_bytes())
            .await
            .context("failed to write task document to handler stdin")?;
        // Close stdin so the child sees EOF and starts processing.
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .context("failed to wait for handler command")?;
        Ok(output)
    }
}

#[async_trait]
impl TaskHandler for SubprocessHandler {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    async fn execute(&self, _ctx: HandlerContext<'_>, task: &Task) -> Result<Value> {
        let task_json =
            serde_json::to_string(task).context("failed to serialize task document")?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.run_child(task_json))
                .await
                .map_err(|_| {
                    anyhow::anyhow!(
                        "handler command {:?} exceeded its {}s timeout",
                        self.program,
                        limit.as_secs()
                    )
                })??,
            None => self.run_child(task_json).await?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "handler command {:?} exited with {}: {}",
                self.program,
                output.status,
                truncate_snippet(stderr.trim(), 2048)
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let artifact: Value = serde_json::from_str(stdout.trim()).with_context(|| {
            format!(
                "handler command {:?} produced non-JSON output: {}",
                self.program,
                truncate_snippet(stdout.trim(), 256)
            )
        })?;

        Ok(artifact)
    }
}

/// Truncate a string to at most `max_bytes` bytes for error snippets,
/// appending "..." if truncated.
fn truncate_snippet(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_owned();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = s[..end].to_owned();
    truncated.push_str("...");
    truncated
}
