//! Task query and management endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use tracing::info;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::models::api::TaskView;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(list_tasks, get_task, delete_task, clear_tasks))]
pub struct TasksApi;

/// Register task routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks", get(list_tasks).delete(clear_tasks))
        .route("/tasks/{id}", get(get_task).delete(delete_task))
}

/// List all tasks, newest first (`GET /v1/tasks`).
#[utoipa::path(
    get,
    path = "/v1/tasks",
    tag = "tasks",
    responses(
        (status = 200, description = "Task list", body = [TaskView]),
    )
)]
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TaskView>>, ServerError> {
    let tasks = state.manager.tasks().await;
    Ok(Json(tasks.into_iter().map(TaskView::from).collect()))
}

/// Fetch one task (`GET /v1/tasks/{id}`).
#[utoipa::path(
    get,
    path = "/v1/tasks/{id}",
    tag = "tasks",
    responses(
        (status = 200, description = "Task", body = TaskView),
        (status = 404, description = "Task not found"),
    )
)]
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskView>, ServerError> {
    let task = state
        .manager
        .get_task(&id)
        .await
        .ok_or_else(|| ServerError::NotFound(format!("task {id} not found")))?;
    Ok(Json(TaskView::from(task)))
}

/// Delete one task (`DELETE /v1/tasks/{id}`).
#[utoipa::path(
    delete,
    path = "/v1/tasks/{id}",
    tag = "tasks",
    responses(
        (status = 200, description = "Task deleted"),
        (status = 404, description = "Task not found"),
    )
)]
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state.manager.delete_task(&id).await?;
    info!(task_id = %id, "task deleted");
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// Delete all tasks (`DELETE /v1/tasks`).
#[utoipa::path(
    delete,
    path = "/v1/tasks",
    tag = "tasks",
    responses(
        (status = 200, description = "All tasks deleted"),
    )
)]
pub async fn clear_tasks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state.manager.clear_tasks().await?;
    info!("task list cleared");
    Ok(Json(serde_json::json!({ "deleted": true })))
}
