//! Public comment history.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::{ApiError, ApiErrorBody};
use crate::models::comment::PublicComment;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/comments", get(list_comments))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListCommentsQuery {
    /// Number of comments to return (1-100, default from `HISTORY_LIMIT`).
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListCommentsResponse {
    /// Oldest first.
    pub comments: Vec<PublicComment>,
}

// ---------------------------------------------------------------------------
// GET /api/v1/comments
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/comments",
    tag = "Comments",
    params(ListCommentsQuery),
    responses(
        (status = 200, description = "Recent comments, oldest first", body = ListCommentsResponse),
        (status = 500, description = "Storage failure", body = ApiErrorBody),
    ),
)]
pub async fn list_comments(
    State(state): State<AppState>,
    Query(query): Query<ListCommentsQuery>,
) -> Result<Json<ListCommentsResponse>, ApiError> {
    let comments = state.gateway.recent(query.limit).await?;
    Ok(Json(ListCommentsResponse {
        comments: comments.iter().map(PublicComment::from).collect(),
    }))
}
