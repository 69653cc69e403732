//! Generation submission route.
//!
//! Validates the request, parses the task kind, and hands off to the task
//! manager.  The response returns as soon as the task is durably created
//! and visible in the task list; completion arrives via polling
//! `GET /v1/tasks` or the `/v1/events` feed.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use mirage_core::TaskKind;
use tracing::debug;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::models::api::{SubmitGenerationRequest, SubmitGenerationResponse};
use crate::state::AppState;

/// Maximum allowed prompt length in bytes to prevent memory exhaustion.
const MAX_PROMPT_BYTES: usize = 32 * 1024; // 32 KiB

#[derive(OpenApi)]
#[openapi(paths(submit_generation))]
pub struct GenerationsApi;

/// Register generation routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/generations", post(submit_generation))
}

/// Submit a generation task (`POST /v1/generations`).
#[utoipa::path(
    post,
    path = "/v1/generations",
    tag = "generations",
    request_body = SubmitGenerationRequest,
    responses(
        (status = 200, description = "Task created", body = SubmitGenerationResponse),
        (status = 400, description = "Bad request"),
        (status = 429, description = "Quota exceeded"),
    )
)]
pub async fn submit_generation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitGenerationRequest>,
) -> Result<Json<SubmitGenerationResponse>, ServerError> {
    let kind = TaskKind::from_str(&req.kind)
        .map_err(|_| ServerError::BadRequest(format!("unknown task kind: {}", req.kind)))?;

    if req.prompt.trim().is_empty() {
        return Err(ServerError::BadRequest("prompt must not be empty".into()));
    }
    if req.prompt.len() > MAX_PROMPT_BYTES {
        return Err(ServerError::BadRequest(format!(
            "prompt too large ({} bytes); maximum is {} bytes",
            req.prompt.len(),
            MAX_PROMPT_BYTES,
        )));
    }
    if req.model.trim().is_empty() {
        return Err(ServerError::BadRequest("model must not be empty".into()));
    }

    debug!(kind = %kind, model = %req.model, prompt_len = req.prompt.len(), "generation request");

    let task_id = state
        .manager
        .submit(kind, req.prompt, req.model, req.image.map(Into::into))
        .await?;

    Ok(Json(SubmitGenerationResponse { task_id }))
}

// ── Tests ──────────────────────────────────────────────────────────────────────
