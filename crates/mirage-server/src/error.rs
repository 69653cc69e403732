//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors are automatically converted
//! to a JSON-body HTTP response with an appropriate status code.
//!
//! Store-layer failures are logged with full detail but only a generic
//! message is returned to the caller.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mirage_core::SubmitError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// All errors that can occur in the mirage-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from the task manager.
    #[error("submission error: {0}")]
    Submit(#[from] SubmitError),

    /// The caller referenced a resource that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match self {
            ServerError::Submit(SubmitError::QuotaExceeded { used, limit }) => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": format!("quota exceeded: {used}/{limit}"),
                    "used": used,
                    "limit": limit,
                })),
            )
                .into_response(),
            ServerError::Submit(SubmitError::Unauthenticated) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "not authenticated" })),
            )
                .into_response(),
            ServerError::Submit(SubmitError::TaskNotFound(id)) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("task {id} not found") })),
            )
                .into_response(),
            ServerError::Submit(err @ SubmitError::NotAwaitingMessage { .. }) => (
                StatusCode::CONFLICT,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response(),
            ServerError::Submit(SubmitError::Store(detail)) => {
                error!(error = %detail, "task store error");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "error": "task store unavailable" })),
                )
                    .into_response()
            }
            ServerError::NotFound(m) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": m }))).into_response()
            }
            ServerError::BadRequest(m) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": m }))).into_response()
            }
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        // Log the full error chain before discarding it so that diagnostic
        // detail is preserved in the server logs even though clients only
        // see a generic message.
        error!(error = ?e, "converting anyhow error to ServerError::Internal");
        ServerError::Internal(e.to_string())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exceeded_maps_to_429() {
        let response =
            ServerError::Submit(SubmitError::QuotaExceeded { used: 5, limit: 5 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn task_not_found_maps_to_404() {
        let response = ServerError::Submit(SubmitError::TaskNotFound("x".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn store_detail_is_not_leaked() {
        let response =
            ServerError::Submit(SubmitError::Store("password@host refused".into())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
