//! `relay serve` command: the read-only control-plane HTTP API.
//!
//! External collaborators (dashboards, callers polling progress) observe
//! the engine through these endpoints; the store remains authoritative
//! and nothing here mutates task state except the submit endpoint, which
//! performs the same insert as `relay submit`.

use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;

use relay_db::models::{Task, TaskStatus, Workflow};
use relay_db::queries::tasks::{self as task_db, TaskStatusCounts};
use relay_db::queries::workers as worker_db;
use relay_db::queries::workflows as workflow_db;
use relay_db::queries::logs as log_db;

use crate::submit_cmd::submit_workflow;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub blocked: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}

impl From<TaskStatusCounts> for ProgressResponse {
    fn from(c: TaskStatusCounts) -> Self {
        Self {
            blocked: c.blocked,
            pending: c.pending,
            in_progress: c.in_progress,
            completed: c.completed,
            failed: c.failed,
            total: c.total,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WorkflowSummaryResponse {
    #[serde(flatten)]
    pub workflow: Workflow,
    pub progress: ProgressResponse,
}

#[derive(Debug, Serialize)]
pub struct WorkflowDetailResponse {
    #[serde(flatten)]
    pub workflow: Workflow,
    pub progress: ProgressResponse,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Serialize)]
pub struct TaskDetailResponse {
    #[serde(flatten)]
    pub task: Task,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub goal: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub workflow_id: String,
    pub plan_task_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TaskFilter {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogFilter {
    pub workflow_id: Option<String>,
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(pool: PgPool) -> Router {
    Router::new()
        .route("/api/workers", get(list_workers))
        .route("/api/workflows", get(list_workflows).post(submit))
        .route("/api/workflows/{id}", get(get_workflow_detail))
        .route("/api/workflows/{id}/tasks", get(list_workflow_tasks))
        .route("/api/tasks/{id}", get(get_task_detail))
        .route("/api/logs", get(get_logs))
        .layer(CorsLayer::permissive())
        .with_state(pool)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(pool: PgPool, addr: &str) -> Result<()> {
    let app = build_router(pool);
    let addr: SocketAddr = addr.parse()?;
    tracing::info!("relay serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("relay serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn list_workers(State(pool): State<PgPool>) -> Result<axum::response::Response, AppError> {
    let workers = worker_db::list_workers(&pool)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(workers).into_response())
}

async fn list_workflows(
    State(pool): State<PgPool>,
) -> Result<axum::response::Response, AppError> {
    let workflows = workflow_db::list_workflows(&pool)
        .await
        .map_err(AppError::internal)?;

    let mut results = Vec::with_capacity(workflows.len());
    for workflow in workflows {
        let counts = task_db::count_tasks_by_status(&pool, &workflow.id)
            .await
            .map_err(AppError::internal)?;
        results.push(WorkflowSummaryResponse {
            workflow,
            progress: counts.into(),
        });
    }

    Ok(Json(results).into_response())
}

async fn get_workflow_detail(
    State(pool): State<PgPool>,
    Path(id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let workflow = workflow_db::get_workflow(&pool, &id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("workflow {id} not found")))?;

    let counts = task_db::count_tasks_by_status(&pool, &id)
        .await
        .map_err(AppError::internal)?;

    let tasks = task_db::list_tasks(&pool, Some(&id), None)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(WorkflowDetailResponse {
        workflow,
        progress: counts.into(),
        tasks,
    })
    .into_response())
}

async fn list_workflow_tasks(
    State(pool): State<PgPool>,
    Path(id): Path<String>,
    Query(filter): Query<TaskFilter>,
) -> Result<axum::response::Response, AppError> {
    let status = filter
        .status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()
        .map_err(|e| AppError::bad_request(e.to_string()))?;

    let tasks = task_db::list_tasks(&pool, Some(&id), status)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(tasks).into_response())
}

async fn get_task_detail(
    State(pool): State<PgPool>,
    Path(id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let task = task_db::get_task(&pool, &id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;

    let dependencies = task_db::get_task_dependencies(&pool, &id)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(TaskDetailResponse { task, dependencies }).into_response())
}

async fn get_logs(
    State(pool): State<PgPool>,
    Query(filter): Query<LogFilter>,
) -> Result<axum::response::Response, AppError> {
    let limit = filter.limit.unwrap_or(100).clamp(1, 1000);
    let entries = log_db::recent_logs(&pool, filter.workflow_id.as_deref(), limit)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(entries).into_response())
}

async fn submit(
    State(pool): State<PgPool>,
    Json(request): Json<SubmitRequest>,
) -> Result<axum::response::Response, AppError> {
    if request.goal.trim().is_empty() {
        return Err(AppError::bad_request("goal must not be empty"));
    }

    let (workflow, plan_task) = submit_workflow(&pool, request.goal.trim())
        .await
        .map_err(AppError::internal)?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            workflow_id: workflow.id,
            plan_task_id: plan_task.id,
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sqlx::PgPool;
    use tower::ServiceExt;

    use relay_db::models::{TaskStatus, TaskType};
    use relay_db::queries::tasks::{NewTask, insert_task};
    use relay_db::queries::workflows::insert_workflow;
    use relay_test_utils::{create_test_db, drop_test_db};

    async fn send_request(pool: PgPool, uri: &str) -> axum::response::Response {
        let app = super::build_router(pool);
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn seed_workflow(pool: &PgPool) -> String {
        let workflow = insert_workflow(pool, "wf1", "test goal").await.unwrap();
        insert_task(
            pool,
            &NewTask {
                id: "wf1_a".to_string(),
                workflow_id: workflow.id.clone(),
                task_type: TaskType::Search,
                status: TaskStatus::Pending,
                max_retries: 3,
                input_context: serde_json::json!({}),
            },
        )
        .await
        .unwrap();
        workflow.id
    }

    #[tokio::test]
    async fn workers_endpoint_returns_empty_list() {
        let (pool, db_name) = create_test_db().await;

        let response = send_request(pool.clone(), "/api/workers").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json, serde_json::json!([]));

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn workflow_detail_includes_tasks_and_progress() {
        let (pool, db_name) = create_test_db().await;
        let workflow_id = seed_workflow(&pool).await;

        let response = send_request(pool.clone(), &format!("/api/workflows/{workflow_id}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["id"], "wf1");
        assert_eq!(json["progress"]["pending"], 1);
        assert_eq!(json["tasks"].as_array().unwrap().len(), 1);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn missing_workflow_is_404() {
        let (pool, db_name) = create_test_db().await;

        let response = send_request(pool.clone(), "/api/workflows/nope").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn bad_status_filter_is_400() {
        let (pool, db_name) = create_test_db().await;
        let workflow_id = seed_workflow(&pool).await;

        let response = send_request(
            pool.clone(),
            &format!("/api/workflows/{workflow_id}/tasks?status=sideways"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn submit_creates_workflow_and_plan_task() {
        let (pool, db_name) = create_test_db().await;

        let app = super::build_router(pool.clone());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/workflows")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"goal": "write a report"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;

        let workflow_id = json["workflow_id"].as_str().unwrap();
        let plan_task_id = json["plan_task_id"].as_str().unwrap();
        assert_eq!(plan_task_id, format!("{workflow_id}_plan"));

        let task = relay_db::queries::tasks::get_task(&pool, plan_task_id)
            .await
            .unwrap()
            .expect("plan task should exist");
        assert_eq!(task.task_type, TaskType::Plan);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.input_context["goal"], "write a report");

        pool.close().await;
        drop_test_db(&db_name).await;
    }
}
