//! Schema migration tests: the migrations directory applies cleanly and
//! produces the expected tables.

use relay_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn migrations_create_all_tables() {
    let (pool, db_name) = create_test_db().await;

    let tables: Vec<(String,)> = sqlx::query_as(
        "SELECT tablename::text FROM pg_tables \
         WHERE schemaname = 'public' AND tablename != '_sqlx_migrations' \
         ORDER BY tablename",
    )
    .fetch_all(&pool)
    .await
    .expect("should list tables");

    let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
    assert_eq!(
        names,
        vec!["logs", "task_dependencies", "tasks", "workers", "workflows"]
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let (pool, db_name) = create_test_db().await;

    // Re-running the migrator against an up-to-date database is a no-op.
    relay_db::pool::run_migrations(&pool, relay_db::pool::default_migrations_path())
        .await
        .expect("second run should succeed");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn tasks_reject_unknown_status() {
    let (pool, db_name) = create_test_db().await;

    sqlx::query("INSERT INTO workflows (id, goal) VALUES ('wf1', 'g')")
        .execute(&pool)
        .await
        .expect("workflow insert should succeed");

    let result = sqlx::query(
        "INSERT INTO tasks (id, workflow_id, task_type, status) \
         VALUES ('wf1_a', 'wf1', 'search', 'meditating')",
    )
    .execute(&pool)
    .await;
    assert!(result.is_err(), "CHECK constraint should reject bad status");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn tasks_enforce_lock_timestamp_pairing() {
    let (pool, db_name) = create_test_db().await;

    sqlx::query("INSERT INTO workflows (id, goal) VALUES ('wf1', 'g')")
        .execute(&pool)
        .await
        .expect("workflow insert should succeed");

    // A lock without a timestamp violates the pairing CHECK.
    let result = sqlx::query(
        "INSERT INTO tasks (id, workflow_id, task_type, worker_lock) \
         VALUES ('wf1_a', 'wf1', 'search', 'w-1')",
    )
    .execute(&pool)
    .await;
    assert!(result.is_err(), "lock without locked_at should be rejected");

    pool.close().await;
    drop_test_db(&db_name).await;
}
