//! Task-update event feed.
//!
//! Streams every visible task transition to UI clients as SSE, replacing
//! client-side status polling.  Slow consumers that lag behind the
//! broadcast buffer simply miss the dropped events and resync from
//! `GET /v1/tasks`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use futures::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;

use crate::models::api::TaskView;
use crate::state::AppState;

/// Register event-feed routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/events", get(task_events))
}

/// Subscribe to task transitions (`GET /v1/events`).
pub async fn task_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.manager.subscribe();
    let stream = BroadcastStream::new(receiver).filter_map(|item| async move {
        let task = item.ok()?;
        let event = Event::default().event("task").json_data(TaskView::from(task)).ok()?;
        Some(Ok(event))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
