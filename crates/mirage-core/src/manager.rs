//! The task manager: one service object owning all session state.
//!
//! Submissions flow quota gate → durable creation → local insert →
//! submission queue → upstream adapter → outcome application.  The manager
//! is the only component that transitions task status, and it enforces the
//! two state-machine rules everything else relies on: terminal states are
//! final, and inconclusive failures leave a task `Generating` for the
//! reconciliation poller instead of marking it `Failed`.
//!
//! Subscribers observe every visible transition through a broadcast
//! channel; the in-memory collection is only ever appended to or updated by
//! whole-record replacement, so readers always see a consistent task.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, broadcast};
use tracing::{info, warn};

use crate::error::{SubmitError, UpstreamError};
use crate::quota::{QuotaGate, QuotaLimits, QuotaStatus};
use crate::queue::SubmissionQueue;
use crate::reconcile;
use crate::store::{TaskPatch, TaskStore};
use crate::types::{GenerationTask, ImageInput, TaskId, TaskKind, TaskStatus};
use crate::upstream::{GenerationBackend, GenerationRequest};

/// Event-channel capacity; slow subscribers lag rather than block.
const EVENT_CAPACITY: usize = 256;

/// Construction options for [`TaskManager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Maximum simultaneously active upstream calls.
    pub max_concurrent: usize,
    /// Reconciliation poll interval.
    pub poll_interval: Duration,
    /// Admission-gate limits (mirrors the store's quota windows).
    pub quota: QuotaLimits,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            poll_interval: Duration::from_secs(3),
            quota: QuotaLimits::default(),
        }
    }
}

/// Session-scoped task service.  Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct TaskManager {
    pub(crate) store: Arc<dyn TaskStore>,
    backend: Arc<dyn GenerationBackend>,
    quota: QuotaGate,
    tasks: Arc<RwLock<HashMap<TaskId, GenerationTask>>>,
    events: broadcast::Sender<GenerationTask>,
    queue: SubmissionQueue,
    pub(crate) poll_interval: Duration,
    poller_running: Arc<AtomicBool>,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl TaskManager {
    /// Build the manager and start its queue worker.  Must be called inside
    /// a Tokio runtime.
    pub fn new(
        store: Arc<dyn TaskStore>,
        backend: Arc<dyn GenerationBackend>,
        options: ManagerOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            backend,
            quota: QuotaGate::new(options.quota),
            tasks: Arc::new(RwLock::new(HashMap::new())),
            events,
            queue: SubmissionQueue::start(options.max_concurrent),
            poll_interval: options.poll_interval,
            poller_running: Arc::new(AtomicBool::new(false)),
        }
    }

    // ── Submission ───────────────────────────────────────────────────────────

    /// Submit a generation task.  Returns as soon as the task is durably
    /// created and visible in the local list; the upstream call runs
    /// through the submission queue in the background.
    pub async fn submit(
        &self,
        kind: TaskKind,
        prompt: String,
        model: String,
        image: Option<ImageInput>,
    ) -> Result<TaskId, SubmitError> {
        self.quota.reserve(kind)?;
        let created = match self.store.create_task(kind, &prompt, &model).await {
            Ok(created) => created,
            Err(err) => {
                // Both-or-neither: a reservation without a task is returned.
                self.quota.release(kind);
                return Err(err.into());
            }
        };

        let task = GenerationTask::new(created.id.clone(), kind, prompt.clone(), model.clone());
        self.insert(task).await;
        self.dispatch(
            created.id.clone(),
            GenerationRequest {
                kind,
                prompt,
                model,
                image,
            },
        );

        info!(
            task_id = %created.id,
            kind = %kind,
            quota_used = created.quota_after.used,
            "task submitted"
        );
        Ok(created.id)
    }

    /// Open a chat task.  The task sits `Idle` until its first message.
    pub async fn create_chat(&self, model: String) -> Result<TaskId, SubmitError> {
        self.quota.reserve(TaskKind::Chat)?;
        let created = match self.store.create_task(TaskKind::Chat, "", &model).await {
            Ok(created) => created,
            Err(err) => {
                self.quota.release(TaskKind::Chat);
                return Err(err.into());
            }
        };

        let task = GenerationTask::new_idle_chat(created.id.clone(), model);
        self.insert(task).await;
        info!(task_id = %created.id, "chat task opened");
        Ok(created.id)
    }

    /// Submit the first message of an `Idle` chat task, moving it to
    /// `Generating` and dispatching upstream.
    pub async fn send_message(&self, id: &str, message: String) -> Result<(), SubmitError> {
        let task = {
            let mut tasks = self.tasks.write().await;
            let Some(current) = tasks.get(id) else {
                return Err(SubmitError::TaskNotFound(id.to_owned()));
            };
            if current.kind != TaskKind::Chat || current.status != TaskStatus::Idle {
                return Err(SubmitError::NotAwaitingMessage {
                    id: id.to_owned(),
                    status: current.status.to_string(),
                });
            }
            let updated = current.clone().generating();
            tasks.insert(id.to_owned(), updated.clone());
            updated
        };

        self.emit(task.clone());
        self.ensure_poller();
        if let Err(err) = self.store.update_task(id, TaskPatch::from(&task)).await {
            warn!(task_id = %id, error = %err, "failed to persist chat transition");
        }

        self.dispatch(
            id.to_owned(),
            GenerationRequest {
                kind: TaskKind::Chat,
                prompt: message,
                model: task.model,
                image: None,
            },
        );
        Ok(())
    }

    fn dispatch(&self, id: TaskId, request: GenerationRequest) {
        let manager = self.clone();
        let task_id = id.clone();
        let enqueued = self.queue.enqueue(async move {
            let outcome = manager.backend.generate(&request).await;
            manager.apply_outcome(&task_id, outcome).await;
        });
        if !enqueued {
            warn!(task_id = %id, "submission queue stopped; task left generating");
        }
    }

    // ── State transitions ────────────────────────────────────────────────────

    /// Apply a settled upstream outcome to a task.
    ///
    /// Terminal tasks ignore the signal (a slow success confirmed by
    /// reconciliation must not be overwritten by a late local failure), and
    /// inconclusive failures change nothing; the reconciliation poller owns
    /// resolving those.
    pub(crate) async fn apply_outcome(&self, id: &str, outcome: Result<String, UpstreamError>) {
        let updated = {
            let mut tasks = self.tasks.write().await;
            let Some(current) = tasks.get(id) else {
                return;
            };
            if current.status.is_terminal() {
                return;
            }
            let updated = match outcome {
                Ok(result_ref) => current.clone().completed(result_ref),
                Err(err) if err.is_inconclusive() => {
                    warn!(
                        task_id = %id,
                        reason = err.message(),
                        "inconclusive attempt; task stays generating"
                    );
                    return;
                }
                Err(err) => current.clone().failed(err.message().to_owned()),
            };
            tasks.insert(id.to_owned(), updated.clone());
            updated
        };

        match updated.status {
            TaskStatus::Completed => info!(task_id = %id, "task completed"),
            TaskStatus::Failed => info!(
                task_id = %id,
                error = updated.error_message.as_deref().unwrap_or(""),
                "task failed"
            ),
            _ => {}
        }
        self.emit(updated.clone());

        if let Err(err) = self
            .store
            .update_task(&updated.id, TaskPatch::from(&updated))
            .await
        {
            warn!(task_id = %id, error = %err, "failed to persist task outcome");
        }
    }

    /// Merge an authoritative task list into the local collection.
    pub(crate) async fn merge_authoritative(&self, authoritative: Vec<GenerationTask>) {
        let mut changed = Vec::new();
        {
            let mut tasks = self.tasks.write().await;
            for remote in authoritative {
                let Some(local) = tasks.get(&remote.id) else {
                    continue;
                };
                if let Some(merged) = reconcile::merge(local, &remote) {
                    tasks.insert(merged.id.clone(), merged.clone());
                    changed.push(merged);
                }
            }
        }
        for task in changed {
            info!(task_id = %task.id, status = %task.status, "task reconciled from store");
            self.emit(task);
        }
    }

    // ── Queries & subscriptions ──────────────────────────────────────────────

    /// Subscribe to task transitions.  Every visible status change is
    /// broadcast as the full replacement record.
    pub fn subscribe(&self) -> broadcast::Receiver<GenerationTask> {
        self.events.subscribe()
    }

    /// Snapshot of all locally-tracked tasks, newest first.
    pub async fn tasks(&self) -> Vec<GenerationTask> {
        let tasks = self.tasks.read().await;
        let mut list: Vec<GenerationTask> = tasks.values().cloned().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    pub async fn get_task(&self, id: &str) -> Option<GenerationTask> {
        self.tasks.read().await.get(id).cloned()
    }

    pub fn quota_status(&self, kind: TaskKind) -> QuotaStatus {
        self.quota.status(kind)
    }

    pub async fn delete_task(&self, id: &str) -> Result<(), SubmitError> {
        self.store.delete_task(id).await?;
        self.tasks.write().await.remove(id);
        Ok(())
    }

    pub async fn clear_tasks(&self) -> Result<(), SubmitError> {
        self.store.clear_tasks().await?;
        self.tasks.write().await.clear();
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────────────

    async fn insert(&self, task: GenerationTask) {
        let generating = task.status == TaskStatus::Generating;
        self.tasks.write().await.insert(task.id.clone(), task.clone());
        self.emit(task);
        if generating {
            self.ensure_poller();
        }
    }

    fn emit(&self, task: GenerationTask) {
        // No subscribers is fine.
        let _ = self.events.send(task);
    }

    pub(crate) async fn has_generating(&self) -> bool {
        self.tasks
            .read()
            .await
            .values()
            .any(|task| task.status == TaskStatus::Generating)
    }

    pub(crate) fn ensure_poller(&self) {
        if self
            .poller_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let manager = self.clone();
            tokio::spawn(async move {
                reconcile::run(manager).await;
            });
        }
    }

    pub(crate) fn poller_finished(&self) {
        self.poller_running.store(false, Ordering::SeqCst);
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Backend scripted per prompt; unknown prompts hang behind a delay so
    /// ordering tests can observe the `Generating` window.
    struct ScriptedBackend {
        outcomes: Mutex<HashMap<String, Result<String, UpstreamError>>>,
        delay: Duration,
    }

    impl ScriptedBackend {
        fn new(delay: Duration) -> Self {
            Self {
                outcomes: Mutex::new(HashMap::new()),
                delay,
            }
        }

        fn script(&self, prompt: &str, outcome: Result<String, UpstreamError>) {
            self.outcomes.lock().unwrap().insert(prompt.to_owned(), outcome);
        }
    }

    #[async_trait::async_trait]
    impl GenerationBackend for ScriptedBackend {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, UpstreamError> {
            tokio::time::sleep(self.delay).await;
            self.outcomes
                .lock()
                .unwrap()
                .get(&request.prompt)
                .cloned()
                .unwrap_or(Err(UpstreamError::Inconclusive {
                    reason: "unscripted prompt".into(),
                }))
        }
    }

    fn options() -> ManagerOptions {
        ManagerOptions {
            max_concurrent: 3,
            poll_interval: Duration::from_millis(50),
            quota: QuotaLimits::default(),
        }
    }

    fn manager_with(
        backend: Arc<ScriptedBackend>,
        options: ManagerOptions,
    ) -> (TaskManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new(options.quota));
        let manager = TaskManager::new(store.clone(), backend, options);
        (manager, store)
    }

    async fn wait_for_status(manager: &TaskManager, id: &str, status: TaskStatus) -> GenerationTask {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(task) = manager.get_task(id).await {
                    if task.status == status {
                        return task;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("task {id} never reached {status}"))
    }

    #[tokio::test]
    async fn submitted_video_completes_with_result_ref() {
        let backend = Arc::new(ScriptedBackend::new(Duration::from_millis(10)));
        backend.script("cat", Ok("https://x.test/v.mp4".into()));
        let (manager, _) = manager_with(backend, options());

        let id = manager
            .submit(TaskKind::Video, "cat".into(), "sora2-landscape-10s".into(), None)
            .await
            .unwrap();

        // Local insert precedes the upstream call settling.
        let pending = manager.get_task(&id).await.expect("task visible immediately");
        assert_eq!(pending.status, TaskStatus::Generating);

        let done = wait_for_status(&manager, &id, TaskStatus::Completed).await;
        assert_eq!(done.result_ref.as_deref(), Some("https://x.test/v.mp4"));
        assert!(done.completed_at.is_some());
        assert!(done.error_message.is_none());
    }

    #[tokio::test]
    async fn explicit_upstream_error_fails_the_task() {
        let backend = Arc::new(ScriptedBackend::new(Duration::from_millis(5)));
        backend.script(
            "cat",
            Err(UpstreamError::Rejected {
                message: "quota exceeded upstream".into(),
            }),
        );
        let (manager, _) = manager_with(backend, options());

        let id = manager
            .submit(TaskKind::Video, "cat".into(), "sora2-landscape-10s".into(), None)
            .await
            .unwrap();
        let failed = wait_for_status(&manager, &id, TaskStatus::Failed).await;
        assert!(
            failed
                .error_message
                .as_deref()
                .unwrap()
                .contains("quota exceeded upstream")
        );
        assert!(failed.result_ref.is_none());
    }

    #[tokio::test]
    async fn inconclusive_failure_leaves_task_generating() {
        let backend = Arc::new(ScriptedBackend::new(Duration::from_millis(5)));
        backend.script(
            "cat",
            Err(UpstreamError::Inconclusive {
                reason: "connection reset".into(),
            }),
        );
        let (manager, _) = manager_with(backend, options());

        let id = manager
            .submit(TaskKind::Video, "cat".into(), "sora2".into(), None)
            .await
            .unwrap();

        // Give the attempt plenty of time to settle, then confirm no
        // failure was recorded.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let task = manager.get_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Generating);
        assert!(task.error_message.is_none());
    }

    #[tokio::test]
    async fn reconciliation_resolves_an_inconclusive_task() {
        let backend = Arc::new(ScriptedBackend::new(Duration::from_millis(5)));
        backend.script(
            "cat",
            Err(UpstreamError::Inconclusive {
                reason: "gateway timeout".into(),
            }),
        );
        let (manager, store) = manager_with(backend, options());

        let id = manager
            .submit(TaskKind::Video, "cat".into(), "sora2".into(), None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The upstream actually finished server-side: the authoritative
        // record flips to completed out of band.
        store
            .update_task(
                &id,
                TaskPatch {
                    status: TaskStatus::Completed,
                    result_ref: Some("https://x.test/late.mp4".into()),
                    error_message: None,
                },
            )
            .await
            .unwrap();

        let done = wait_for_status(&manager, &id, TaskStatus::Completed).await;
        assert_eq!(done.result_ref.as_deref(), Some("https://x.test/late.mp4"));
    }

    #[tokio::test]
    async fn stale_failure_cannot_overwrite_completion() {
        let backend = Arc::new(ScriptedBackend::new(Duration::from_millis(1)));
        backend.script("cat", Ok("https://x.test/v.mp4".into()));
        let (manager, _) = manager_with(backend, options());

        let id = manager
            .submit(TaskKind::Video, "cat".into(), "sora2".into(), None)
            .await
            .unwrap();
        wait_for_status(&manager, &id, TaskStatus::Completed).await;

        // A late local timeout signal for the same attempt must be a no-op.
        manager
            .apply_outcome(
                &id,
                Err(UpstreamError::Rejected {
                    message: "late timeout".into(),
                }),
            )
            .await;
        let task = manager.get_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result_ref.as_deref(), Some("https://x.test/v.mp4"));
    }

    #[tokio::test]
    async fn quota_exhaustion_rejects_without_creating_a_task() {
        let backend = Arc::new(ScriptedBackend::new(Duration::from_millis(1)));
        let mut opts = options();
        opts.quota = QuotaLimits {
            video: 10,
            image: 3,
            chat: 10,
        };
        let (manager, _) = manager_with(backend.clone(), opts);

        for i in 0..3 {
            let prompt = format!("image {i}");
            backend.script(&prompt, Ok("data:image/png;base64,QQ==".into()));
            manager
                .submit(TaskKind::Image, prompt, "gemini-image".into(), None)
                .await
                .expect("within quota");
        }

        match manager
            .submit(TaskKind::Image, "one more".into(), "gemini-image".into(), None)
            .await
        {
            Err(SubmitError::QuotaExceeded { used, limit }) => {
                assert_eq!((used, limit), (3, 3));
            }
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }
        assert_eq!(manager.tasks().await.len(), 3);
    }

    #[tokio::test]
    async fn gate_reservation_rolls_back_when_store_rejects() {
        // Store enforces a tighter window than the gate: the second create
        // fails durably and the gate reservation must be returned.
        let backend = Arc::new(ScriptedBackend::new(Duration::from_millis(1)));
        backend.script("a", Ok("https://x.test/a.mp4".into()));
        let store = Arc::new(MemoryStore::new(QuotaLimits {
            video: 1,
            image: 1,
            chat: 1,
        }));
        let manager = TaskManager::new(store, backend, options());

        manager
            .submit(TaskKind::Video, "a".into(), "sora2".into(), None)
            .await
            .unwrap();
        let err = manager
            .submit(TaskKind::Video, "b".into(), "sora2".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::QuotaExceeded { .. }));

        // The gate counted one submission, not two.
        assert_eq!(manager.quota_status(TaskKind::Video).used, 1);
    }

    #[tokio::test]
    async fn chat_flow_idle_then_message_then_completion() {
        let backend = Arc::new(ScriptedBackend::new(Duration::from_millis(5)));
        backend.script("make me a sunset video", Ok("https://x.test/sunset.mp4".into()));
        let (manager, _) = manager_with(backend, options());

        let id = manager.create_chat("sora2-chat".into()).await.unwrap();
        assert_eq!(
            manager.get_task(&id).await.unwrap().status,
            TaskStatus::Idle
        );

        manager
            .send_message(&id, "make me a sunset video".into())
            .await
            .unwrap();
        let done = wait_for_status(&manager, &id, TaskStatus::Completed).await;
        assert_eq!(done.result_ref.as_deref(), Some("https://x.test/sunset.mp4"));

        // A second message hits a terminal task and is rejected.
        let err = manager
            .send_message(&id, "another one".into())
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::NotAwaitingMessage { .. }));
    }

    #[tokio::test]
    async fn subscribers_see_the_terminal_transition() {
        let backend = Arc::new(ScriptedBackend::new(Duration::from_millis(5)));
        backend.script("cat", Ok("https://x.test/v.mp4".into()));
        let (manager, _) = manager_with(backend, options());

        let mut events = manager.subscribe();
        let id = manager
            .submit(TaskKind::Video, "cat".into(), "sora2".into(), None)
            .await
            .unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let task = events.recv().await.expect("channel open");
                if task.id == id && task.status == TaskStatus::Completed {
                    return task;
                }
            }
        })
        .await
        .expect("completion event should arrive");
        assert_eq!(seen.result_ref.as_deref(), Some("https://x.test/v.mp4"));
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_submit_error() {
        struct DownStore;
        #[async_trait::async_trait]
        impl TaskStore for DownStore {
            async fn create_task(
                &self,
                _kind: TaskKind,
                _prompt: &str,
                _model: &str,
            ) -> Result<crate::store::CreatedTask, StoreError> {
                Err(StoreError::Unavailable("connection refused".into()))
            }
            async fn update_task(&self, _id: &str, _patch: TaskPatch) -> Result<(), StoreError> {
                Ok(())
            }
            async fn list_tasks(&self) -> Result<Vec<GenerationTask>, StoreError> {
                Ok(Vec::new())
            }
            async fn delete_task(&self, _id: &str) -> Result<(), StoreError> {
                Ok(())
            }
            async fn clear_tasks(&self) -> Result<(), StoreError> {
                Ok(())
            }
        }

        let backend = Arc::new(ScriptedBackend::new(Duration::from_millis(1)));
        let manager = TaskManager::new(Arc::new(DownStore), backend, options());
        let err = manager
            .submit(TaskKind::Video, "cat".into(), "sora2".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Store(_)));
        assert!(manager.tasks().await.is_empty());
    }
}
