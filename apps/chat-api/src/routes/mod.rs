pub mod admin;
pub mod channel;
pub mod comments;
pub mod health;
pub mod match_info;

use axum::Router;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .nest(
            "/api/v1",
            comments::router()
                .merge(channel::router())
                .merge(match_info::router())
                .merge(admin::router()),
        )
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::health,
        // Comments
        comments::list_comments,
        // Channel
        channel::channel_status,
        // Admin
        admin::list_comments,
        admin::delete_comment,
        admin::list_blocked_ips,
        admin::block_ip,
        admin::set_channel_status,
        // Match info
        match_info::current_match_info,
        match_info::update_match_info,
        match_info::clear_match_info,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::FieldError,
            // Models
            crate::models::comment::Comment,
            crate::models::comment::PublicComment,
            crate::models::blocked_ip::BlockedIp,
            crate::models::match_info::MatchInfo,
            crate::gateway::events::MatchInfoPayload,
            // Route request/response types
            health::HealthResponse,
            comments::ListCommentsResponse,
            channel::ChannelStatusResponse,
            admin::AdminCommentsResponse,
            admin::DeleteCommentResponse,
            admin::BlockedIpsResponse,
            admin::BlockIpRequest,
            admin::ChannelStatusRequest,
            match_info::MatchInfoResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Comments", description = "Comment history"),
        (name = "Channel", description = "Channel status"),
        (name = "Admin", description = "Moderation"),
    )
)]
pub struct ApiDoc;
