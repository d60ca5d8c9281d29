//! Match info overlay. Anyone may read it; admins set and clear it.

use axum::extract::State;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody};
use crate::gateway::events::MatchInfoPayload;
use crate::models::match_info::MatchInfo;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/match-info", get(current_match_info))
        .route(
            "/admin/match-info",
            put(update_match_info).delete(clear_match_info),
        )
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MatchInfoResponse {
    /// `null` when nothing is on screen or the last update expired.
    pub match_info: Option<MatchInfo>,
}

#[utoipa::path(
    get,
    path = "/api/v1/match-info",
    tag = "Channel",
    responses(
        (status = 200, description = "Current match info", body = MatchInfoResponse),
    ),
)]
pub async fn current_match_info(
    State(state): State<AppState>,
) -> Result<Json<MatchInfoResponse>, ApiError> {
    let match_info = state.gateway.match_info().await?;
    Ok(Json(MatchInfoResponse { match_info }))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/match-info",
    tag = "Admin",
    security(("bearer" = [])),
    request_body = MatchInfoPayload,
    responses(
        (status = 200, description = "Match info broadcast", body = MatchInfo),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Forbidden", body = ApiErrorBody),
    ),
)]
pub async fn update_match_info(
    AuthUser { identity }: AuthUser,
    State(state): State<AppState>,
    Json(body): Json<MatchInfoPayload>,
) -> Result<Json<MatchInfo>, ApiError> {
    let info = state.gateway.update_match_info(Some(&identity), body).await?;
    Ok(Json(info))
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/match-info",
    tag = "Admin",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Match info cleared", body = MatchInfoResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Forbidden", body = ApiErrorBody),
    ),
)]
pub async fn clear_match_info(
    AuthUser { identity }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<MatchInfoResponse>, ApiError> {
    state.gateway.clear_match_info(Some(&identity)).await?;
    Ok(Json(MatchInfoResponse { match_info: None }))
}
