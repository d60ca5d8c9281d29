//! Channel status as seen by viewers.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/channel", get(channel_status))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChannelStatusResponse {
    /// `false` once the stream has ended; submissions are rejected then.
    pub active: bool,
    pub viewer_count: usize,
}

#[utoipa::path(
    get,
    path = "/api/v1/channel",
    tag = "Channel",
    responses(
        (status = 200, description = "Channel status", body = ChannelStatusResponse),
    ),
)]
pub async fn channel_status(State(state): State<AppState>) -> Json<ChannelStatusResponse> {
    Json(ChannelStatusResponse {
        active: state.gateway.is_channel_active(),
        viewer_count: state.hub.viewer_count(),
    })
}
