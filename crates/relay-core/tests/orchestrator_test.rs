//! Integration tests for the orchestrator passes: dependency resolution,
//! lease reclamation, workflow aggregation, and tick idempotence.

use serde_json::json;
use sqlx::PgPool;

use relay_core::journal::Journal;
use relay_core::orchestrator::{
    aggregate_workflows, reclaim_expired_leases, resolve_dependencies,
};
use relay_db::models::{TaskStatus, TaskType, WorkflowStatus};
use relay_db::queries::tasks::{self as task_db, NewTask};
use relay_db::queries::workflows as workflow_db;
use relay_test_utils::{create_test_db, drop_test_db};

// ===========================================================================
// Helpers
// ===========================================================================

fn journal() -> Journal {
    Journal::new("orchestrator-test")
}

async fn seed_task(
    pool: &PgPool,
    workflow_id: &str,
    local: &str,
    status: TaskStatus,
    max_retries: i32,
    deps: &[&str],
) -> String {
    let id = format!("{workflow_id}_{local}");
    let dep_ids: Vec<String> = deps
        .iter()
        .map(|d| format!("{workflow_id}_{d}"))
        .collect();
    task_db::insert_task_with_dependencies(
        pool,
        &NewTask {
            id: id.clone(),
            workflow_id: workflow_id.to_string(),
            task_type: TaskType::Search,
            status,
            max_retries,
            input_context: json!({}),
        },
        &dep_ids,
    )
    .await
    .expect("task insert should succeed");
    id
}

/// Claim the next pending task (FIFO) and complete it with
/// `{"ok": <task id>}`, as a worker would. Returns the completed id.
async fn complete_next(pool: &PgPool) -> String {
    let types: Vec<String> = TaskType::ALL.iter().map(|t| t.to_string()).collect();
    let claimed = task_db::claim_next_task(pool, "hand", &types)
        .await
        .unwrap()
        .expect("expected a claimable task");
    task_db::complete_task(pool, &claimed.id, "hand", &json!({"ok": claimed.id}))
        .await
        .unwrap();
    claimed.id
}

async fn task_status(pool: &PgPool, id: &str) -> TaskStatus {
    task_db::get_task(pool, id).await.unwrap().unwrap().status
}

/// Backdate a task's lock so it looks lease-expired.
async fn backdate_lock(pool: &PgPool, task_id: &str, secs: f64) {
    sqlx::query("UPDATE tasks SET locked_at = NOW() - make_interval(secs => $2) WHERE id = $1")
        .bind(task_id)
        .bind(secs)
        .execute(pool)
        .await
        .expect("backdate should succeed");
}

// ===========================================================================
// Dependency resolution
// ===========================================================================

#[tokio::test]
async fn diamond_resolution_carries_artifacts_downstream() {
    let (pool, db_name) = create_test_db().await;
    workflow_db::insert_workflow(&pool, "wf1", "goal").await.unwrap();

    let a = seed_task(&pool, "wf1", "a", TaskStatus::Pending, 3, &[]).await;
    let b = seed_task(&pool, "wf1", "b", TaskStatus::Blocked, 3, &["a"]).await;
    let c = seed_task(&pool, "wf1", "c", TaskStatus::Blocked, 3, &["a"]).await;
    let d = seed_task(&pool, "wf1", "d", TaskStatus::Blocked, 3, &["b", "c"]).await;

    // Nothing moves while A is outstanding.
    let pass = resolve_dependencies(&pool, &journal()).await.unwrap();
    assert_eq!(pass.unblocked, 0);
    assert_eq!(pass.failed, 0);
    assert_eq!(task_status(&pool, &b).await, TaskStatus::Blocked);

    // A completes: B and C unblock with A's artifact; D stays blocked.
    assert_eq!(complete_next(&pool).await, a);
    let pass = resolve_dependencies(&pool, &journal()).await.unwrap();
    assert_eq!(pass.unblocked, 2);

    for id in [&b, &c] {
        let task = task_db::get_task(&pool, id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(
            task.input_context["dependency_outputs"],
            json!({ a.clone(): {"ok": a.clone()} })
        );
    }
    assert_eq!(task_status(&pool, &d).await, TaskStatus::Blocked);

    // B and C complete: D unblocks with both artifacts.
    assert_eq!(complete_next(&pool).await, b);
    assert_eq!(complete_next(&pool).await, c);
    let pass = resolve_dependencies(&pool, &journal()).await.unwrap();
    assert_eq!(pass.unblocked, 1);

    let task = task_db::get_task(&pool, &d).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(
        task.input_context["dependency_outputs"],
        json!({ b.clone(): {"ok": b.clone()}, c.clone(): {"ok": c.clone()} })
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn dependency_failure_propagates_down_the_chain() {
    let (pool, db_name) = create_test_db().await;
    workflow_db::insert_workflow(&pool, "wf1", "goal").await.unwrap();

    let a = seed_task(&pool, "wf1", "a", TaskStatus::Pending, 0, &[]).await;
    let b = seed_task(&pool, "wf1", "b", TaskStatus::Blocked, 3, &["a"]).await;
    let c = seed_task(&pool, "wf1", "c", TaskStatus::Blocked, 3, &["b"]).await;

    // Fail A terminally, as a worker would after exhausting retries.
    let types = vec!["search".to_string()];
    task_db::claim_next_task(&pool, "w-1", &types)
        .await
        .unwrap()
        .unwrap();
    task_db::fail_task_terminal(&pool, &a, "w-1", 1, "boom")
        .await
        .unwrap();

    // First pass fails B; the next pass sees B failed and fails C.
    let pass = resolve_dependencies(&pool, &journal()).await.unwrap();
    assert_eq!(pass.failed, 1);
    assert_eq!(task_status(&pool, &b).await, TaskStatus::Failed);
    assert_eq!(task_status(&pool, &c).await, TaskStatus::Blocked);

    let pass = resolve_dependencies(&pool, &journal()).await.unwrap();
    assert_eq!(pass.failed, 1);

    for id in [&b, &c] {
        let task = task_db::get_task(&pool, id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.last_error.as_deref(), Some("dependency failed"));
        // Never claimed, never executed.
        assert!(task.output_artifact.is_none());
        assert_eq!(task.retry_count, 0);
    }

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn blocked_task_without_dependencies_becomes_pending() {
    let (pool, db_name) = create_test_db().await;
    workflow_db::insert_workflow(&pool, "wf1", "goal").await.unwrap();

    let a = seed_task(&pool, "wf1", "a", TaskStatus::Blocked, 3, &[]).await;

    let pass = resolve_dependencies(&pool, &journal()).await.unwrap();
    assert_eq!(pass.unblocked, 1);
    assert_eq!(task_status(&pool, &a).await, TaskStatus::Pending);

    pool.close().await;
    drop_test_db(&db_name).await;
}

// ===========================================================================
// Lease reclamation
// ===========================================================================

#[tokio::test]
async fn expired_lease_is_retried_then_terminally_failed() {
    let (pool, db_name) = create_test_db().await;
    workflow_db::insert_workflow(&pool, "wf1", "goal").await.unwrap();
    let a = seed_task(&pool, "wf1", "a", TaskStatus::Pending, 1, &[]).await;

    let types = vec!["search".to_string()];

    // First expiry: within the retry budget, back to pending.
    task_db::claim_next_task(&pool, "w-1", &types)
        .await
        .unwrap()
        .unwrap();
    backdate_lock(&pool, &a, 400.0).await;
    let pass = reclaim_expired_leases(&pool, 300.0, &journal()).await.unwrap();
    assert_eq!(pass.retried, 1);
    assert_eq!(pass.failed, 0);

    let task = task_db::get_task(&pool, &a).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retry_count, 1);
    assert_eq!(task.last_error.as_deref(), Some("lock timeout"));
    assert!(task.worker_lock.is_none());

    // Second expiry: budget exhausted, terminal.
    task_db::claim_next_task(&pool, "w-2", &types)
        .await
        .unwrap()
        .unwrap();
    backdate_lock(&pool, &a, 400.0).await;
    let pass = reclaim_expired_leases(&pool, 300.0, &journal()).await.unwrap();
    assert_eq!(pass.retried, 0);
    assert_eq!(pass.failed, 1);

    let task = task_db::get_task(&pool, &a).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 2);
    assert_eq!(task.last_error.as_deref(), Some("lock timeout"));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn fresh_leases_are_left_alone() {
    let (pool, db_name) = create_test_db().await;
    workflow_db::insert_workflow(&pool, "wf1", "goal").await.unwrap();
    let a = seed_task(&pool, "wf1", "a", TaskStatus::Pending, 3, &[]).await;

    let types = vec!["search".to_string()];
    task_db::claim_next_task(&pool, "w-1", &types)
        .await
        .unwrap()
        .unwrap();

    let pass = reclaim_expired_leases(&pool, 300.0, &journal()).await.unwrap();
    assert_eq!(pass.retried, 0);
    assert_eq!(pass.failed, 0);
    assert_eq!(task_status(&pool, &a).await, TaskStatus::InProgress);

    pool.close().await;
    drop_test_db(&db_name).await;
}

// ===========================================================================
// Workflow aggregation
// ===========================================================================

#[tokio::test]
async fn aggregation_tracks_workflow_lifecycle() {
    let (pool, db_name) = create_test_db().await;
    workflow_db::insert_workflow(&pool, "wf1", "goal").await.unwrap();

    // No tasks yet (plan task not claimed, nothing inserted): unchanged.
    aggregate_workflows(&pool, &journal()).await.unwrap();
    let wf = workflow_db::get_workflow(&pool, "wf1").await.unwrap().unwrap();
    assert_eq!(wf.status, WorkflowStatus::Pending);

    // A pending task makes the workflow running.
    let a = seed_task(&pool, "wf1", "a", TaskStatus::Pending, 3, &[]).await;
    aggregate_workflows(&pool, &journal()).await.unwrap();
    let wf = workflow_db::get_workflow(&pool, "wf1").await.unwrap().unwrap();
    assert_eq!(wf.status, WorkflowStatus::Running);

    // Everything completed: workflow completed.
    assert_eq!(complete_next(&pool).await, a);
    aggregate_workflows(&pool, &journal()).await.unwrap();
    let wf = workflow_db::get_workflow(&pool, "wf1").await.unwrap().unwrap();
    assert_eq!(wf.status, WorkflowStatus::Completed);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn aggregation_fails_workflow_only_once_settled() {
    let (pool, db_name) = create_test_db().await;
    workflow_db::insert_workflow(&pool, "wf1", "goal").await.unwrap();

    let a = seed_task(&pool, "wf1", "a", TaskStatus::Pending, 0, &[]).await;
    let b = seed_task(&pool, "wf1", "b", TaskStatus::Pending, 3, &[]).await;

    // Fail A terminally while B is still pending: the workflow keeps
    // running, failure is not settled yet. FIFO claims A first.
    let types = vec!["search".to_string()];
    let claimed = task_db::claim_next_task(&pool, "w-1", &types)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, a);
    task_db::fail_task_terminal(&pool, &a, "w-1", 1, "boom")
        .await
        .unwrap();
    aggregate_workflows(&pool, &journal()).await.unwrap();
    let wf = workflow_db::get_workflow(&pool, "wf1").await.unwrap().unwrap();
    assert_eq!(wf.status, WorkflowStatus::Running);

    // B completes: one failed, nothing runnable left -> failed.
    assert_eq!(complete_next(&pool).await, b);
    aggregate_workflows(&pool, &journal()).await.unwrap();
    let wf = workflow_db::get_workflow(&pool, "wf1").await.unwrap().unwrap();
    assert_eq!(wf.status, WorkflowStatus::Failed);

    pool.close().await;
    drop_test_db(&db_name).await;
}

// ===========================================================================
// Idempotence
// ===========================================================================

#[tokio::test]
async fn back_to_back_ticks_are_idempotent() {
    let (pool, db_name) = create_test_db().await;
    workflow_db::insert_workflow(&pool, "wf1", "goal").await.unwrap();

    let a = seed_task(&pool, "wf1", "a", TaskStatus::Pending, 3, &[]).await;
    seed_task(&pool, "wf1", "b", TaskStatus::Blocked, 3, &["a"]).await;
    seed_task(&pool, "wf1", "c", TaskStatus::Blocked, 3, &["a"]).await;
    assert_eq!(complete_next(&pool).await, a);

    let snapshot = |tasks: Vec<relay_db::models::Task>| {
        tasks
            .into_iter()
            .map(|t| {
                serde_json::json!({
                    "id": t.id,
                    "status": t.status,
                    "retry_count": t.retry_count,
                    "input_context": t.input_context,
                    "output_artifact": t.output_artifact,
                    "last_error": t.last_error,
                })
            })
            .collect::<Vec<_>>()
    };

    // First tick does the work...
    resolve_dependencies(&pool, &journal()).await.unwrap();
    reclaim_expired_leases(&pool, 300.0, &journal()).await.unwrap();
    aggregate_workflows(&pool, &journal()).await.unwrap();
    let first = snapshot(task_db::list_tasks(&pool, Some("wf1"), None).await.unwrap());
    let wf_first = workflow_db::get_workflow(&pool, "wf1").await.unwrap().unwrap().status;

    // ...and a second tick with no worker activity changes nothing.
    resolve_dependencies(&pool, &journal()).await.unwrap();
    reclaim_expired_leases(&pool, 300.0, &journal()).await.unwrap();
    aggregate_workflows(&pool, &journal()).await.unwrap();
    let second = snapshot(task_db::list_tasks(&pool, Some("wf1"), None).await.unwrap());
    let wf_second = workflow_db::get_workflow(&pool, "wf1").await.unwrap().unwrap().status;

    assert_eq!(first, second);
    assert_eq!(wf_first, wf_second);

    pool.close().await;
    drop_test_db(&db_name).await;
}
