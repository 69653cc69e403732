//! Per-kind daily quota accounting.
//!
//! Each task kind has a `{used, limit, window_start}` counter on a rolling
//! 24 h window.  Admission reserves a slot *before* the task-store
//! round-trip and releases it if creation fails, so the counter and the
//! task set move both-or-neither.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SubmitError;
use crate::types::TaskKind;

/// Current usage for one kind, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaStatus {
    pub used: u32,
    pub limit: u32,
}

/// Daily limits per kind.
#[derive(Debug, Clone, Copy)]
pub struct QuotaLimits {
    pub video: u32,
    pub image: u32,
    pub chat: u32,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            video: 10,
            image: 40,
            chat: 200,
        }
    }
}

impl QuotaLimits {
    pub fn for_kind(&self, kind: TaskKind) -> u32 {
        match kind {
            TaskKind::Video => self.video,
            TaskKind::Image => self.image,
            TaskKind::Chat => self.chat,
        }
    }
}

/// One rolling-window counter.  Never decremented except by
/// [`release`](Self::release) (rollback of a reservation whose task
/// creation failed).
#[derive(Debug, Clone)]
pub struct QuotaCounter {
    pub used: u32,
    pub limit: u32,
    pub window_start: DateTime<Utc>,
}

impl QuotaCounter {
    pub fn new(limit: u32) -> Self {
        Self {
            used: 0,
            limit,
            window_start: Utc::now(),
        }
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        if now - self.window_start > Duration::hours(24) {
            self.used = 0;
            self.window_start = now;
        }
    }

    /// Reserve one slot, or report `(used, limit)` on exhaustion.
    pub fn try_reserve(&mut self, now: DateTime<Utc>) -> Result<QuotaStatus, (u32, u32)> {
        self.roll(now);
        if self.used < self.limit {
            self.used += 1;
            Ok(QuotaStatus {
                used: self.used,
                limit: self.limit,
            })
        } else {
            Err((self.used, self.limit))
        }
    }

    /// Return a reserved slot after a failed creation.
    pub fn release(&mut self) {
        self.used = self.used.saturating_sub(1);
    }

    pub fn status(&mut self, now: DateTime<Utc>) -> QuotaStatus {
        self.roll(now);
        QuotaStatus {
            used: self.used,
            limit: self.limit,
        }
    }
}

/// Admission gate over all kinds.  Cheap to clone; clones share counters.
#[derive(Debug, Clone)]
pub struct QuotaGate {
    counters: Arc<Mutex<HashMap<TaskKind, QuotaCounter>>>,
}

impl QuotaGate {
    pub fn new(limits: QuotaLimits) -> Self {
        let counters = [TaskKind::Video, TaskKind::Image, TaskKind::Chat]
            .into_iter()
            .map(|kind| (kind, QuotaCounter::new(limits.for_kind(kind))))
            .collect();
        Self {
            counters: Arc::new(Mutex::new(counters)),
        }
    }

    /// Reserve a slot for `kind`, rejecting the submission on exhaustion.
    pub fn reserve(&self, kind: TaskKind) -> Result<QuotaStatus, SubmitError> {
        let mut counters = self.counters.lock().expect("quota lock poisoned");
        let counter = counters.get_mut(&kind).expect("all kinds registered");
        counter
            .try_reserve(Utc::now())
            .map_err(|(used, limit)| SubmitError::QuotaExceeded { used, limit })
    }

    /// Roll back a reservation whose task creation did not happen.
    pub fn release(&self, kind: TaskKind) {
        let mut counters = self.counters.lock().expect("quota lock poisoned");
        if let Some(counter) = counters.get_mut(&kind) {
            counter.release();
        }
    }

    pub fn status(&self, kind: TaskKind) -> QuotaStatus {
        let mut counters = self.counters.lock().expect("quota lock poisoned");
        counters
            .get_mut(&kind)
            .expect("all kinds registered")
            .status(Utc::now())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
