//! Quota status endpoint.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use mirage_core::TaskKind;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::models::api::QuotaView;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_quota))]
pub struct QuotaApi;

/// Register quota routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/quota/{kind}", get(get_quota))
}

/// Current quota usage for one kind (`GET /v1/quota/{kind}`).
#[utoipa::path(
    get,
    path = "/v1/quota/{kind}",
    tag = "quota",
    responses(
        (status = 200, description = "Quota usage", body = QuotaView),
        (status = 400, description = "Unknown kind"),
    )
)]
pub async fn get_quota(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Json<QuotaView>, ServerError> {
    let parsed = TaskKind::from_str(&kind)
        .map_err(|_| ServerError::BadRequest(format!("unknown task kind: {kind}")))?;
    let status = state.manager.quota_status(parsed);
    Ok(Json(QuotaView {
        kind,
        used: status.used,
        limit: status.limit,
    }))
}
