//! Connection pooling, database bootstrap, and schema migrations.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::config::DbConfig;

/// Default pool size.
///
/// A relay process is a handful of cooperative loops (workers, plus
/// possibly the orchestrator), each issuing one store call at a time, so
/// connection demand scales with the number of in-process loops rather
/// than with task volume. Ten covers `relay run`'s default worker pool
/// with room to spare.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Create a connection pool with the default size.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    create_pool_sized(config, DEFAULT_MAX_CONNECTIONS).await
}

/// Create a connection pool with an explicit size.
///
/// Administrative statements against the maintenance database want a
/// single connection; test harnesses size to the loops they spawn.
pub async fn create_pool_sized(config: &DbConfig, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("failed to connect to database at {}", config.database_url))?;
    Ok(pool)
}

/// Apply the schema migrations in `migrations_dir`.
///
/// The migrations are loaded at runtime rather than embedded with
/// `sqlx::migrate!()` so the crate compiles without a live database.
/// sqlx serializes concurrent migrators behind a server-side lock, so
/// several relay processes starting against the same store at once are
/// fine: one applies each migration, the rest wait and no-op.
pub async fn run_migrations(pool: &PgPool, migrations_dir: &Path) -> Result<()> {
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .with_context(|| {
            format!(
                "failed to load migrations from {}",
                migrations_dir.display()
            )
        })?;

    migrator
        .run(pool)
        .await
        .context("failed to run database migrations")?;

    info!("migrations applied successfully");
    Ok(())
}

/// Create the configured database if the server does not have it yet.
///
/// Issues `CREATE DATABASE` against the maintenance database and treats
/// "already exists" (SQLSTATE 42P04) as success, so concurrent
/// `relay db-init` runs against a fresh deployment cannot race each
/// other into an error.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<()> {
    let db_name = config
        .database_name()
        .context("could not determine database name from URL")?;

    // CREATE DATABASE cannot take a bind parameter; only plain
    // identifier characters may pass into the statement text.
    if !db_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        anyhow::bail!("database name {:?} contains invalid characters", db_name);
    }

    let maint_config = DbConfig::new(config.maintenance_url());
    let maint_pool = create_pool_sized(&maint_config, 1).await?;

    let stmt = format!("CREATE DATABASE {db_name}");
    let result = sqlx::query(&stmt).execute(&maint_pool).await;
    maint_pool.close().await;

    match result {
        Ok(_) => {
            info!(db = db_name, "database created");
            Ok(())
        }
        Err(e)
            if e.as_database_error()
                .and_then(|db| db.code())
                .as_deref()
                == Some("42P04") =>
        {
            info!(db = db_name, "database already exists");
            Ok(())
        }
        Err(e) => {
            Err(anyhow::Error::new(e).context(format!("failed to create database {db_name}")))
        }
    }
}

/// The relay tables, in creation order.
const TABLES: [&str; 5] = ["workflows", "tasks", "task_dependencies", "workers", "logs"];

/// Row counts for each relay table, for the `relay db-init` summary.
///
/// The table list is fixed rather than discovered: the summary is about
/// relay's schema, and a fixed list keeps identifiers out of dynamic
/// statement text.
pub async fn schema_summary(pool: &PgPool) -> Result<Vec<(&'static str, i64)>> {
    let mut counts = Vec::with_capacity(TABLES.len());
    for table in TABLES {
        let query = format!("SELECT COUNT(*) FROM {table}");
        let (count,): (i64,) = sqlx::query_as(&query)
            .fetch_one(pool)
            .await
            .with_context(|| format!("failed to count rows in {table}"))?;
        counts.push((table, count));
    }
    Ok(counts)
}

/// Path of the migrations directory shipped inside `relay-db`.
///
/// Resolved from `CARGO_MANIFEST_DIR` at compile time, so it is valid
/// wherever the source tree is present (tests, `relay db-init` from a
/// checkout).
pub fn default_migrations_path() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations"))
}
