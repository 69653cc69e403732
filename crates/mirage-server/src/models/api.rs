//! API v1 request / response types.

use mirage_core::{GenerationTask, ImageInput};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ── Generations ──────────────────────────────────────────────────────────────

/// Inline image attached to an image-editing submission.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ImageInputBody {
    /// Base64-encoded image bytes.
    pub data: String,
    /// Declared MIME type, e.g. `"image/png"`.
    pub mime_type: String,
}

impl From<ImageInputBody> for ImageInput {
    fn from(body: ImageInputBody) -> Self {
        ImageInput {
            data: body.data,
            mime_type: body.mime_type,
        }
    }
}

/// Request body for `POST /v1/generations`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitGenerationRequest {
    /// Task kind: `"video"`, `"image"`, or `"chat"`.
    pub kind: String,
    /// User prompt; immutable after creation.
    pub prompt: String,
    /// Upstream model identifier, e.g. `"sora2-landscape-10s"`.
    pub model: String,
    /// Optional inline source image (image editing).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image: Option<ImageInputBody>,
}

/// Response body for submissions.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitGenerationResponse {
    pub task_id: String,
}

// ── Chats ────────────────────────────────────────────────────────────────────

/// Request body for `POST /v1/chats`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateChatRequest {
    /// Upstream model identifier for this conversation.
    pub model: String,
}

/// Request body for `POST /v1/chats/{id}/messages`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatMessageRequest {
    pub message: String,
}

// ── Tasks ────────────────────────────────────────────────────────────────────

/// A task as returned to UI clients.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskView {
    pub id: String,
    pub kind: String,
    pub status: String,
    pub prompt: String,
    pub model: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    /// Media URL or inline-data URI; present iff completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    /// Present iff failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<GenerationTask> for TaskView {
    fn from(task: GenerationTask) -> Self {
        TaskView {
            id: task.id,
            kind: task.kind.to_string(),
            status: task.status.to_string(),
            prompt: task.prompt,
            model: task.model,
            created_at: task.created_at.to_rfc3339(),
            completed_at: task.completed_at.map(|t| t.to_rfc3339()),
            result_ref: task.result_ref,
            error_message: task.error_message,
        }
    }
}

// ── Quota ────────────────────────────────────────────────────────────────────

/// Response body for `GET /v1/quota/{kind}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuotaView {
    pub kind: String,
    pub used: u32,
    pub limit: u32,
}

// ── Tests ──────────────────────────────────────────────────────────────────────
