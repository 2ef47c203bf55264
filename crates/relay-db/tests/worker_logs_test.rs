//! Integration tests for worker registrations and the engine log.

use relay_db::models::{LogLevel, WorkerStatus};
use relay_db::queries::logs::{self, NewLogEntry};
use relay_db::queries::workers;
use relay_db::queries::workflows;
use relay_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn worker_registration_upserts_heartbeat() {
    let (pool, db_name) = create_test_db().await;

    let types = vec!["search".to_string(), "analyze".to_string()];
    let first = workers::upsert_worker(&pool, "w-1", "alpha", &types)
        .await
        .expect("first upsert");
    assert_eq!(first.status, WorkerStatus::Online);
    assert_eq!(first.task_types, types);

    // A later tick refreshes the heartbeat in place.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let second = workers::upsert_worker(&pool, "w-1", "alpha", &types)
        .await
        .expect("second upsert");
    assert!(second.last_heartbeat >= first.last_heartbeat);

    let all = workers::list_workers(&pool).await.unwrap();
    assert_eq!(all.len(), 1, "upsert must not duplicate the registration");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn offline_worker_returns_on_next_heartbeat() {
    let (pool, db_name) = create_test_db().await;

    let types = vec!["plan".to_string()];
    workers::upsert_worker(&pool, "w-1", "alpha", &types)
        .await
        .unwrap();
    workers::mark_worker_offline(&pool, "w-1").await.unwrap();

    let all = workers::list_workers(&pool).await.unwrap();
    assert_eq!(all[0].status, WorkerStatus::Offline);

    // A restarted worker with the same id simply comes back online.
    workers::upsert_worker(&pool, "w-1", "alpha", &types)
        .await
        .unwrap();
    let all = workers::list_workers(&pool).await.unwrap();
    assert_eq!(all[0].status, WorkerStatus::Online);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn logs_are_returned_most_recent_first() {
    let (pool, db_name) = create_test_db().await;
    workflows::insert_workflow(&pool, "wf1", "goal").await.unwrap();
    workflows::insert_workflow(&pool, "wf2", "goal").await.unwrap();

    for (i, wf) in [(1, "wf1"), (2, "wf2"), (3, "wf1")] {
        logs::insert_log(
            &pool,
            &NewLogEntry {
                level: LogLevel::Info,
                component: "test".to_string(),
                message: format!("event {i}"),
                workflow_id: Some(wf.to_string()),
                task_id: None,
            },
        )
        .await
        .unwrap();
    }

    let all = logs::recent_logs(&pool, None, 10).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].message, "event 3");
    assert_eq!(all[2].message, "event 1");

    // Workflow filter.
    let wf1_only = logs::recent_logs(&pool, Some("wf1"), 10).await.unwrap();
    assert_eq!(wf1_only.len(), 2);
    assert!(wf1_only.iter().all(|e| e.workflow_id.as_deref() == Some("wf1")));

    // Limit applies after ordering.
    let latest = logs::recent_logs(&pool, None, 1).await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].message, "event 3");

    pool.close().await;
    drop_test_db(&db_name).await;
}
