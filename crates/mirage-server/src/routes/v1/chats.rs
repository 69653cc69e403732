//! Chat task routes.
//!
//! A chat task is opened idle and submitted by its first message; the
//! generated media reference lands on the task like any other kind.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use tracing::debug;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::models::api::{ChatMessageRequest, CreateChatRequest, SubmitGenerationResponse};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(create_chat, send_message))]
pub struct ChatsApi;

/// Register chat routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chats", post(create_chat))
        .route("/chats/{id}/messages", post(send_message))
}

/// Open a chat task (`POST /v1/chats`).  The task sits idle until its
/// first message arrives.
#[utoipa::path(
    post,
    path = "/v1/chats",
    tag = "chats",
    request_body = CreateChatRequest,
    responses(
        (status = 200, description = "Chat task created", body = SubmitGenerationResponse),
        (status = 429, description = "Quota exceeded"),
    )
)]
pub async fn create_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateChatRequest>,
) -> Result<Json<SubmitGenerationResponse>, ServerError> {
    if req.model.trim().is_empty() {
        return Err(ServerError::BadRequest("model must not be empty".into()));
    }
    let task_id = state.manager.create_chat(req.model).await?;
    Ok(Json(SubmitGenerationResponse { task_id }))
}

/// Submit the first message of an idle chat task
/// (`POST /v1/chats/{id}/messages`).
#[utoipa::path(
    post,
    path = "/v1/chats/{id}/messages",
    tag = "chats",
    request_body = ChatMessageRequest,
    responses(
        (status = 200, description = "Message accepted"),
        (status = 404, description = "Task not found"),
        (status = 409, description = "Task is not awaiting a message"),
    )
)]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ChatMessageRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    if req.message.trim().is_empty() {
        return Err(ServerError::BadRequest("message must not be empty".into()));
    }
    debug!(task_id = %id, message_len = req.message.len(), "chat message");
    state.manager.send_message(&id, req.message).await?;
    Ok(Json(serde_json::json!({ "accepted": true })))
}
