pub mod chats;
pub mod events;
pub mod generations;
pub mod quota;
pub mod tasks;

use std::sync::Arc;

use axum::Router;
use utoipa::OpenApi;

use crate::state::AppState;

/// Routes nested under `/v1`.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(generations::router())
        .merge(chats::router())
        .merge(tasks::router())
        .merge(quota::router())
        .merge(events::router())
}

pub fn api_docs() -> utoipa::openapi::OpenApi {
    let mut spec = generations::GenerationsApi::openapi();
    spec.merge(chats::ChatsApi::openapi());
    spec.merge(tasks::TasksApi::openapi());
    spec.merge(quota::QuotaApi::openapi());
    spec
}
