//! Bounded-concurrency submission queue.
//!
//! Jobs are admitted strictly in enqueue order; at most `max_concurrent`
//! run at once.  The worker loop acquires an owned semaphore permit before
//! spawning each job, and the permit drops when the job settles (success
//! or failure), releasing capacity to the next queued item.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tracing::debug;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Handle to the queue worker.  Cheap to clone.
#[derive(Debug, Clone)]
pub struct SubmissionQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl SubmissionQueue {
    /// Start the worker loop with the given concurrency bound.
    pub fn start(max_concurrent: usize) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let semaphore = Arc::new(Semaphore::new(max_concurrent));

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                // FIFO admission: the next job is not spawned until a
                // permit frees up, so later items cannot overtake.
                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                tokio::spawn(async move {
                    job.await;
                    drop(permit);
                });
            }
            debug!("submission queue worker stopped");
        });

        Self { tx }
    }

    /// Enqueue a job.  Returns `false` if the worker has stopped.
    pub fn enqueue(&self, job: impl Future<Output = ()> + Send + 'static) -> bool {
        self.tx.send(Box::pin(job)).is_ok()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
