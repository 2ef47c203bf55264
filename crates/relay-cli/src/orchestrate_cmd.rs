//! `relay orchestrate` command: run the orchestrator loop until
//! interrupted.

use anyhow::Result;
use sqlx::PgPool;

use relay_core::config::EngineConfig;
use relay_core::orchestrator::run_orchestrator;

use crate::worker_cmd::shutdown_token;

/// Run the orchestrate command.
pub async fn run_orchestrate(pool: &PgPool) -> Result<()> {
    let config = EngineConfig::from_env();
    let cancel = shutdown_token();
    run_orchestrator(pool, &config, cancel).await
}
