//! Postgres harness for relay's integration tests.
//!
//! The engine's contract is "many stateless processes, one shared
//! database", and the tests keep that shape: one Postgres server per
//! test binary, one throwaway migrated database per test. Worker,
//! orchestrator, and end-to-end tests all spawn several loops against
//! the same pool, so a test database gets the crate's default pool size
//! (a small `relay run` deployment) rather than a single connection.
//!
//! Server selection:
//! - `RELAY_TEST_PG_URL` set: an externally managed server (e.g. a CI
//!   setup script started one container for the whole run); nothing is
//!   started or stopped here.
//! - unset: a testcontainers Postgres is started lazily and lives for
//!   the remainder of the test binary.

use sqlx::{Executor, PgPool};
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use relay_db::config::DbConfig;
use relay_db::pool;

/// The server all test databases are created on, addressed through its
/// maintenance database. The container handle rides along so the server
/// is not torn down while tests are still running.
struct PgServer {
    maintenance: DbConfig,
    _keepalive: Option<ContainerAsync<Postgres>>,
}

static PG_SERVER: OnceCell<PgServer> = OnceCell::const_new();

async fn pg_server() -> &'static PgServer {
    PG_SERVER
        .get_or_init(|| async {
            if let Ok(url) = std::env::var("RELAY_TEST_PG_URL") {
                // The external URL may point at the server root or at
                // some database; rebasing onto `postgres` makes both
                // forms usable for CREATE/DROP DATABASE work.
                return PgServer {
                    maintenance: DbConfig::new(url).with_database("postgres"),
                    _keepalive: None,
                };
            }

            let container = Postgres::default()
                .with_tag("18")
                .start()
                .await
                .expect("failed to start PostgreSQL container");
            let host = container.get_host().await.expect("failed to get host");
            let port = container
                .get_host_port_ipv4(5432)
                .await
                .expect("failed to get mapped port");

            PgServer {
                maintenance: DbConfig::new(format!(
                    "postgresql://postgres:postgres@{host}:{port}/postgres"
                )),
                _keepalive: Some(container),
            }
        })
        .await
}

/// Create a scratch database with relay's migrations applied, and a
/// pool onto it.
///
/// Returns `(pool, db_name)`; hand the name to [`drop_test_db`] when
/// the test finishes. Names embed a uuid so concurrent test binaries
/// pointed at one external server cannot collide.
pub async fn create_test_db() -> (PgPool, String) {
    let server = pg_server().await;
    let db_name = format!("relay_test_{}", Uuid::new_v4().simple());

    let maint = pool::create_pool_sized(&server.maintenance, 1)
        .await
        .expect("failed to connect to maintenance database");
    let stmt = format!("CREATE DATABASE {db_name}");
    maint
        .execute(stmt.as_str())
        .await
        .unwrap_or_else(|e| panic!("failed to create test database {db_name}: {e}"));
    maint.close().await;

    let test_config = server.maintenance.with_database(&db_name);
    let test_pool = pool::create_pool(&test_config)
        .await
        .unwrap_or_else(|e| panic!("failed to connect to test database {db_name}: {e}"));

    pool::run_migrations(&test_pool, pool::default_migrations_path())
        .await
        .expect("migrations should apply to a fresh test database");

    (test_pool, db_name)
}

/// Drop a database created by [`create_test_db`].
///
/// A test that spawned workers may reach teardown while some of its
/// pool connections are still settling server-side, so sessions on the
/// database are terminated before the drop. Both steps are best-effort:
/// a leaked scratch database on a throwaway server is not worth failing
/// an otherwise-green test over.
pub async fn drop_test_db(db_name: &str) {
    let server = pg_server().await;
    let Ok(maint) = pool::create_pool_sized(&server.maintenance, 1).await else {
        return;
    };

    let terminate = format!(
        "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
         WHERE datname = '{db_name}' AND pid <> pg_backend_pid()"
    );
    let _ = maint.execute(terminate.as_str()).await;

    let drop = format!("DROP DATABASE IF EXISTS {db_name}");
    let _ = maint.execute(drop.as_str()).await;
    maint.close().await;
}
