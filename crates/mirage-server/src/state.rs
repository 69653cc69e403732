//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use mirage_core::TaskManager;

use crate::config::Config;

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// The session task service; owns queue, poller, and quota gate.
    pub manager: TaskManager,
}
