use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a generation task, assigned by the task store.
pub type TaskId = String;

/// What a task produces.  Fixed at creation, never changes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskKind {
    Video,
    Image,
    Chat,
}

/// High-level lifecycle state of a generation task.
///
/// Transitions are forward-only: `Idle` (chat tasks before their first
/// message) → `Generating` → `Completed` | `Failed`.  There is no way back
/// out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    /// Chat task created but no message submitted yet.
    Idle,
    /// Upstream generation is (or may still be) in flight.
    Generating,
    /// Generation produced a result reference.
    Completed,
    /// Generation failed with an explicit upstream or extraction error.
    Failed,
}

impl TaskStatus {
    /// Returns `true` once the task has reached a final state.
    ///
    /// Callers deciding whether a status signal may still be applied should
    /// use this rather than matching variants, so the terminal set stays in
    /// one place.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// One user-submitted generation job.
///
/// Records are replaced whole on every transition; readers never observe a
/// half-updated task.  Exactly one of `result_ref` / `error_message` is set
/// once the status is terminal; neither is set before that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationTask {
    pub id: TaskId,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub prompt: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    /// Set exactly once, at the `Generating` → terminal transition.
    pub completed_at: Option<DateTime<Utc>>,
    /// Media URL or inline-data URI; present iff `Completed`.
    pub result_ref: Option<String>,
    /// Present iff `Failed`.
    pub error_message: Option<String>,
}

impl GenerationTask {
    /// Create a task that is already generating (video, image, or a chat
    /// task submitted with its first message).
    pub fn new(id: TaskId, kind: TaskKind, prompt: String, model: String) -> Self {
        Self {
            id,
            kind,
            status: TaskStatus::Generating,
            prompt,
            model,
            created_at: Utc::now(),
            completed_at: None,
            result_ref: None,
            error_message: None,
        }
    }

    /// Create an idle chat task awaiting its first message.
    pub fn new_idle_chat(id: TaskId, model: String) -> Self {
        Self {
            id,
            kind: TaskKind::Chat,
            status: TaskStatus::Idle,
            prompt: String::new(),
            model,
            created_at: Utc::now(),
            completed_at: None,
            result_ref: None,
            error_message: None,
        }
    }

    /// Consume this record and return the `Completed` replacement.
    pub fn completed(mut self, result_ref: String) -> Self {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.result_ref = Some(result_ref);
        self.error_message = None;
        self
    }

    /// Consume this record and return the `Failed` replacement.
    pub fn failed(mut self, error_message: String) -> Self {
        self.status = TaskStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.result_ref = None;
        self.error_message = Some(error_message);
        self
    }

    /// Consume this record and return the `Generating` replacement (chat
    /// task leaving `Idle` on its first message).
    pub fn generating(mut self) -> Self {
        self.status = TaskStatus::Generating;
        self
    }
}

/// Inline image attached to an image-editing submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInput {
    /// Base64-encoded image bytes, as delivered by the UI.
    pub data: String,
    /// Declared MIME type, e.g. `"image/png"`.
    pub mime_type: String,
}

// ── Tests ──────────────────────────────────────────────────────────────────────
