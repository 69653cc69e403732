//! Reconciliation against the authoritative task store.
//!
//! A locally-tracked task can be left `Generating` forever by an
//! inconclusive upstream attempt (client-side timeout, dropped connection).
//! While any such task exists, the poller re-fetches the authoritative list
//! on a fixed interval and merges status changes in.  The merge is
//! last-writer-wins, gated two ways: a terminal local status is never
//! overwritten (a stale `Failed` arriving after a confirmed `Completed` is
//! dropped), and identical statuses are left untouched to avoid churning
//! subscribers with redundant writes.

use tracing::{debug, warn};

use crate::manager::TaskManager;
use crate::types::GenerationTask;

/// Decide whether the authoritative record replaces the local one.
pub(crate) fn merge(
    local: &GenerationTask,
    authoritative: &GenerationTask,
) -> Option<GenerationTask> {
    if local.status.is_terminal() {
        return None;
    }
    if authoritative.status == local.status {
        return None;
    }
    Some(authoritative.clone())
}

/// Poll loop body.  Runs until no local task is `Generating`, then clears
/// the manager's running flag.
pub(crate) async fn run(manager: TaskManager) {
    debug!("reconciliation poller started");
    loop {
        tokio::time::sleep(manager.poll_interval).await;
        if !manager.has_generating().await {
            break;
        }
        match manager.store.list_tasks().await {
            Ok(authoritative) => manager.merge_authoritative(authoritative).await,
            Err(err) => warn!(error = %err, "reconciliation fetch failed; will retry"),
        }
    }
    manager.poller_finished();
    // A submission may have landed while this loop was deciding to stop;
    // restart rather than leave it unwatched.
    if manager.has_generating().await {
        manager.ensure_poller();
    }
    debug!("reconciliation poller stopped");
}

// ── Tests ──────────────────────────────────────────────────────────────────────
