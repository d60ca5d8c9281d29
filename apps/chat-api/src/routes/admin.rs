//! Moderation endpoints. Every route takes an admin bearer token; the
//! gateway makes the admin check so REST and WebSocket agree on it.

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody};
use crate::gateway::events::BlockIpPayload;
use crate::models::blocked_ip::BlockedIp;
use crate::models::comment::Comment;
use crate::routes::channel::ChannelStatusResponse;
use crate::routes::comments::ListCommentsQuery;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/comments", get(list_comments))
        .route("/admin/comments/{comment_id}", delete(delete_comment))
        .route("/admin/blocked-ips", get(list_blocked_ips))
        .route("/admin/blocked-ips/{ip}", put(block_ip))
        .route("/admin/channel", post(set_channel_status))
}

// ---------------------------------------------------------------------------
// GET /api/v1/admin/comments
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminCommentsResponse {
    /// Oldest first, with sender IPs.
    pub comments: Vec<Comment>,
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/comments",
    tag = "Admin",
    security(("bearer" = [])),
    params(ListCommentsQuery),
    responses(
        (status = 200, description = "Recent comments with sender IPs", body = AdminCommentsResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Forbidden", body = ApiErrorBody),
    ),
)]
pub async fn list_comments(
    AuthUser { identity }: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<ListCommentsQuery>,
) -> Result<Json<AdminCommentsResponse>, ApiError> {
    state.gateway.require_admin(Some(&identity), "list_comments")?;
    let comments = state.gateway.recent(query.limit).await?;
    Ok(Json(AdminCommentsResponse { comments }))
}

// ---------------------------------------------------------------------------
// DELETE /api/v1/admin/comments/{comment_id}
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteCommentResponse {
    pub comment_id: i64,
    /// `false` if the comment had already been deleted.
    pub newly_deleted: bool,
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/comments/{comment_id}",
    tag = "Admin",
    security(("bearer" = [])),
    params(("comment_id" = i64, Path, description = "Comment ID")),
    responses(
        (status = 200, description = "Comment deleted", body = DeleteCommentResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Forbidden", body = ApiErrorBody),
        (status = 404, description = "Comment not found", body = ApiErrorBody),
    ),
)]
pub async fn delete_comment(
    AuthUser { identity }: AuthUser,
    State(state): State<AppState>,
    Path(comment_id): Path<i64>,
) -> Result<Json<DeleteCommentResponse>, ApiError> {
    let deletion = state.gateway.delete(Some(&identity), comment_id).await?;
    Ok(Json(DeleteCommentResponse {
        comment_id: deletion.comment.id,
        newly_deleted: deletion.newly_deleted,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/v1/admin/blocked-ips
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct BlockedIpsResponse {
    pub blocked_ips: Vec<BlockedIp>,
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/blocked-ips",
    tag = "Admin",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Blocked IPs, oldest first", body = BlockedIpsResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Forbidden", body = ApiErrorBody),
    ),
)]
pub async fn list_blocked_ips(
    AuthUser { identity }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<BlockedIpsResponse>, ApiError> {
    state.gateway.require_admin(Some(&identity), "list_blocked_ips")?;
    Ok(Json(BlockedIpsResponse {
        blocked_ips: state.gateway.blocked_ips(),
    }))
}

// ---------------------------------------------------------------------------
// PUT /api/v1/admin/blocked-ips/{ip}
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct BlockIpRequest {
    pub reason: Option<String>,
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/blocked-ips/{ip}",
    tag = "Admin",
    security(("bearer" = [])),
    params(("ip" = String, Path, description = "IP address to block")),
    request_body = BlockIpRequest,
    responses(
        (status = 200, description = "IP blocked (or already blocked)", body = BlockedIp),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Forbidden", body = ApiErrorBody),
    ),
)]
pub async fn block_ip(
    AuthUser { identity }: AuthUser,
    State(state): State<AppState>,
    Path(ip): Path<String>,
    Json(body): Json<BlockIpRequest>,
) -> Result<Json<BlockedIp>, ApiError> {
    let entry = state
        .gateway
        .block(
            Some(&identity),
            BlockIpPayload {
                ip_address: ip,
                reason: body.reason,
            },
        )
        .await?;
    Ok(Json(entry))
}

// ---------------------------------------------------------------------------
// POST /api/v1/admin/channel
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChannelStatusRequest {
    pub active: bool,
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/channel",
    tag = "Admin",
    security(("bearer" = [])),
    request_body = ChannelStatusRequest,
    responses(
        (status = 200, description = "Channel status updated", body = ChannelStatusResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Forbidden", body = ApiErrorBody),
    ),
)]
pub async fn set_channel_status(
    AuthUser { identity }: AuthUser,
    State(state): State<AppState>,
    Json(body): Json<ChannelStatusRequest>,
) -> Result<Json<ChannelStatusResponse>, ApiError> {
    let active = state.gateway.set_channel_active(Some(&identity), body.active)?;
    Ok(Json(ChannelStatusResponse {
        active,
        viewer_count: state.hub.viewer_count(),
    }))
}
