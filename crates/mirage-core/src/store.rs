//! Task persistence abstraction.
//!
//! [`TaskStore`] mirrors the surface of the document-store collaborator
//! that owns durable task records.  The core never assumes anything beyond
//! this trait: `update_task` is last-write-wins at the storage layer and
//! the terminal-state invariant is enforced by the task manager, not here.
//!
//! [`MemoryStore`] is the in-process implementation used by the server
//! binary and the test suite.  Swap in another implementation to back the
//! service with a real document database without touching the core.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::quota::{QuotaCounter, QuotaLimits, QuotaStatus};
use crate::types::{GenerationTask, TaskId, TaskKind, TaskStatus};

/// Result of a successful durable task creation.
#[derive(Debug, Clone)]
pub struct CreatedTask {
    pub id: TaskId,
    /// Quota usage for the task's kind after this creation was counted.
    pub quota_after: QuotaStatus,
}

/// Status patch applied by `update_task`.
#[derive(Debug, Clone)]
pub struct TaskPatch {
    pub status: TaskStatus,
    pub result_ref: Option<String>,
    pub error_message: Option<String>,
}

impl From<&GenerationTask> for TaskPatch {
    fn from(task: &GenerationTask) -> Self {
        Self {
            status: task.status,
            result_ref: task.result_ref.clone(),
            error_message: task.error_message.clone(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("quota exceeded: {used}/{limit}")]
    QuotaExceeded { used: u32, limit: u32 },

    #[error("not authenticated")]
    Unauthenticated,

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// The persistence collaborator surface consumed by the core.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    /// Durably create a task and count it against the kind's quota window.
    /// Chat tasks are created `Idle` when the prompt is empty.
    async fn create_task(
        &self,
        kind: TaskKind,
        prompt: &str,
        model: &str,
    ) -> Result<CreatedTask, StoreError>;

    /// Apply a status patch.  Idempotent; last write wins here.
    async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<(), StoreError>;

    /// Authoritative task list, newest first.  Consumed by the
    /// reconciliation poller.
    async fn list_tasks(&self) -> Result<Vec<GenerationTask>, StoreError>;

    async fn delete_task(&self, id: &str) -> Result<(), StoreError>;

    async fn clear_tasks(&self) -> Result<(), StoreError>;
}

/// In-process document store.
#[derive(Debug)]
pub struct MemoryStore {
    tasks: RwLock<HashMap<TaskId, GenerationTask>>,
    quotas: Mutex<HashMap<TaskKind, QuotaCounter>>,
}

impl MemoryStore {
    pub fn new(limits: QuotaLimits) -> Self {
        let quotas = [TaskKind::Video, TaskKind::Image, TaskKind::Chat]
            .into_iter()
            .map(|kind| (kind, QuotaCounter::new(limits.for_kind(kind))))
            .collect();
        Self {
            tasks: RwLock::new(HashMap::new()),
            quotas: Mutex::new(quotas),
        }
    }

    fn reserve_quota(&self, kind: TaskKind) -> Result<QuotaStatus, StoreError> {
        let mut quotas = self.quotas.lock().expect("quota lock poisoned");
        let counter = quotas.get_mut(&kind).expect("all kinds registered");
        counter
            .try_reserve(chrono::Utc::now())
            .map_err(|(used, limit)| StoreError::QuotaExceeded { used, limit })
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create_task(
        &self,
        kind: TaskKind,
        prompt: &str,
        model: &str,
    ) -> Result<CreatedTask, StoreError> {
        let quota_after = self.reserve_quota(kind)?;
        let id = Uuid::new_v4().to_string();
        let task = if kind == TaskKind::Chat && prompt.is_empty() {
            GenerationTask::new_idle_chat(id.clone(), model.to_owned())
        } else {
            GenerationTask::new(id.clone(), kind, prompt.to_owned(), model.to_owned())
        };
        self.tasks.write().await.insert(id.clone(), task);
        Ok(CreatedTask { id, quota_after })
    }

    async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;
        task.status = patch.status;
        task.result_ref = patch.result_ref;
        task.error_message = patch.error_message;
        if patch.status.is_terminal() && task.completed_at.is_none() {
            task.completed_at = Some(chrono::Utc::now());
        }
        Ok(())
    }

    async fn list_tasks(&self) -> Result<Vec<GenerationTask>, StoreError> {
        let tasks = self.tasks.read().await;
        let mut list: Vec<GenerationTask> = tasks.values().cloned().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn delete_task(&self, id: &str) -> Result<(), StoreError> {
        self.tasks
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))
    }

    async fn clear_tasks(&self) -> Result<(), StoreError> {
        self.tasks.write().await.clear();
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tight_limits() -> QuotaLimits {
        QuotaLimits {
            video: 2,
            image: 1,
            chat: 5,
        }
    }

    #[tokio::test]
    async fn create_counts_quota_and_returns_usage() {
        let store = MemoryStore::new(tight_limits());
        let first = store
            .create_task(TaskKind::Video, "a cat", "sora2")
            .await
            .unwrap();
        assert_eq!(first.quota_after, QuotaStatus { used: 1, limit: 2 });

        let second = store
            .create_task(TaskKind::Video, "a dog", "sora2")
            .await
            .unwrap();
        assert_eq!(second.quota_after.used, 2);

        match store.create_task(TaskKind::Video, "a fox", "sora2").await {
            Err(StoreError::QuotaExceeded { used, limit }) => assert_eq!((used, limit), (2, 2)),
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn chat_without_prompt_is_created_idle() {
        let store = MemoryStore::new(tight_limits());
        let created = store.create_task(TaskKind::Chat, "", "sora2-chat").await.unwrap();
        let tasks = store.list_tasks().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, created.id);
        assert_eq!(tasks[0].status, TaskStatus::Idle);
    }

    #[tokio::test]
    async fn update_sets_completion_timestamp_once() {
        let store = MemoryStore::new(tight_limits());
        let created = store
            .create_task(TaskKind::Image, "a sunset", "gemini-image")
            .await
            .unwrap();

        store
            .update_task(
                &created.id,
                TaskPatch {
                    status: TaskStatus::Completed,
                    result_ref: Some("data:image/png;base64,QQ==".into()),
                    error_message: None,
                },
            )
            .await
            .unwrap();

        let first_stamp = store.list_tasks().await.unwrap()[0].completed_at;
        assert!(first_stamp.is_some());

        // A redundant write must not move the timestamp.
        store
            .update_task(
                &created.id,
                TaskPatch {
                    status: TaskStatus::Completed,
                    result_ref: Some("data:image/png;base64,QQ==".into()),
                    error_message: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(store.list_tasks().await.unwrap()[0].completed_at, first_stamp);
    }

    #[tokio::test]
    async fn delete_and_clear_remove_records() {
        let store = MemoryStore::new(tight_limits());
        let a = store.create_task(TaskKind::Chat, "hi", "m").await.unwrap();
        let _b = store.create_task(TaskKind::Chat, "yo", "m").await.unwrap();

        store.delete_task(&a.id).await.unwrap();
        assert_eq!(store.list_tasks().await.unwrap().len(), 1);
        assert!(matches!(
            store.delete_task(&a.id).await,
            Err(StoreError::NotFound(_))
        ));

        store.clear_tasks().await.unwrap();
        assert!(store.list_tasks().await.unwrap().is_empty());
    }
}
