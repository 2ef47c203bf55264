mod config;
mod logs_cmd;
mod orchestrate_cmd;
mod run_cmd;
mod serve_cmd;
mod status_cmd;
mod submit_cmd;
mod worker_cmd;

use clap::{Parser, Subcommand};

use relay_db::pool;

use config::RelayConfig;

#[derive(Parser)]
#[command(name = "relay", about = "Crash-resilient multi-agent workflow engine")]
struct Cli {
    /// Database URL (overrides RELAY_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a relay config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/relay")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create and migrate the relay database
    DbInit,
    /// Submit a goal: creates a workflow and its plan task
    Submit {
        /// The goal to decompose and execute
        goal: String,
    },
    /// Run a worker loop serving the given task types
    Worker {
        /// Comma-separated task types to claim (e.g. plan,search,analyze)
        #[arg(long, value_delimiter = ',', required = true)]
        task_types: Vec<String>,
        /// Stable worker id (a fresh uuid is generated when omitted)
        #[arg(long)]
        worker_id: Option<String>,
        /// Human-readable worker name
        #[arg(long)]
        name: Option<String>,
        /// External handler command for a task type, as type=command
        /// (repeatable). Plan tasks use the built-in planner.
        #[arg(long = "handler")]
        handlers: Vec<String>,
    },
    /// Run the orchestrator loop (dependency resolution, lease
    /// reclamation, workflow aggregation)
    Orchestrate,
    /// Run an orchestrator plus a pool of workers in one process
    Run {
        /// Comma-separated task types the workers claim
        #[arg(long, value_delimiter = ',', required = true)]
        task_types: Vec<String>,
        /// Number of workers to start
        #[arg(long, default_value_t = 2)]
        workers: usize,
        /// External handler command for a task type, as type=command
        /// (repeatable)
        #[arg(long = "handler")]
        handlers: Vec<String>,
    },
    /// Show workflow status (omit workflow_id to list all workflows)
    Status {
        /// Workflow ID to show (omit to list all)
        workflow_id: Option<String>,
    },
    /// List tasks, optionally filtered by workflow and status
    Tasks {
        /// Workflow ID to filter by
        #[arg(long)]
        workflow_id: Option<String>,
        /// Status to filter by (blocked, pending, in_progress, completed, failed)
        #[arg(long)]
        status: Option<String>,
    },
    /// List worker registrations
    Workers,
    /// Show recent engine logs
    Logs {
        /// Workflow ID to filter by
        #[arg(long)]
        workflow_id: Option<String>,
        /// Maximum entries to show
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Serve the read-only control-plane HTTP API
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: String,
    },
}

/// Execute the `relay init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `relay db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `relay db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = RelayConfig::resolve(cli_db_url)?;

    println!("Initializing relay database...");

    // 1. Create the database if it does not exist.
    pool::ensure_database_exists(&resolved.db_config).await?;

    // 2. Connect to the target database.
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    // 3. Run migrations.
    let migrations_path = pool::default_migrations_path();
    pool::run_migrations(&db_pool, migrations_path).await?;

    // 4. Print success with per-table counts.
    let counts = pool::schema_summary(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("relay db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Submit { goal } => {
            let resolved = RelayConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = submit_cmd::run_submit(&db_pool, &goal).await;
            db_pool.close().await;
            result?;
        }
        Commands::Worker {
            task_types,
            worker_id,
            name,
            handlers,
        } => {
            let resolved = RelayConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = worker_cmd::run_worker(
                &db_pool,
                &task_types,
                worker_id.as_deref(),
                name.as_deref(),
                &handlers,
            )
            .await;
            db_pool.close().await;
            result?;
        }
        Commands::Orchestrate => {
            let resolved = RelayConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = orchestrate_cmd::run_orchestrate(&db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Run {
            task_types,
            workers,
            handlers,
        } => {
            let resolved = RelayConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = run_cmd::run_engine(&db_pool, &task_types, workers, &handlers).await;
            db_pool.close().await;
            result?;
        }
        Commands::Status { workflow_id } => {
            let resolved = RelayConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = status_cmd::run_status(&db_pool, workflow_id.as_deref()).await;
            db_pool.close().await;
            result?;
        }
        Commands::Tasks {
            workflow_id,
            status,
        } => {
            let resolved = RelayConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result =
                status_cmd::run_tasks(&db_pool, workflow_id.as_deref(), status.as_deref()).await;
            db_pool.close().await;
            result?;
        }
        Commands::Workers => {
            let resolved = RelayConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = status_cmd::run_workers(&db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Logs { workflow_id, limit } => {
            let resolved = RelayConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = logs_cmd::run_logs(&db_pool, workflow_id.as_deref(), limit).await;
            db_pool.close().await;
            result?;
        }
        Commands::Serve { addr } => {
            let resolved = RelayConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = serve_cmd::run_serve(db_pool.clone(), &addr).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
