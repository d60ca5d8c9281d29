use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

/// Structured API error returned to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Failures of the comment pipeline and moderation commands.
///
/// Validation, authorization and moderation failures stay with the caller;
/// none of them ever produce a broadcast.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    /// Sender IP is blocked. The reason is never exposed to the sender.
    #[error("not allowed to comment")]
    Blocked,
    #[error("admin privileges required")]
    Forbidden,
    #[error("comment not found")]
    NotFound,
    #[error("commenting too fast")]
    RateLimited,
    #[error("the stream has ended")]
    ChannelEnded,
    #[error("storage failure: {0}")]
    Storage(String),
}

impl ChatError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Blocked => "BLOCKED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::RateLimited => "RATE_LIMITED",
            Self::ChannelEnded => "CHANNEL_ENDED",
            Self::Storage(_) => "INTERNAL_ERROR",
        }
    }

    /// Client-facing body. Storage details are kept out of it.
    pub fn detail(&self) -> ApiErrorDetail {
        let (message, details) = match self {
            Self::Validation(errors) => ("Validation failed".to_string(), Some(errors.clone())),
            Self::Storage(_) => ("An internal error occurred".to_string(), None),
            other => (other.to_string(), None),
        };
        ApiErrorDetail {
            code: self.code().to_string(),
            message,
            details,
        }
    }
}

impl From<diesel::result::Error> for ChatError {
    fn from(err: diesel::result::Error) -> Self {
        tracing::error!(?err, "database error");
        Self::Storage(err.to_string())
    }
}

impl From<diesel_async::pooled_connection::deadpool::PoolError> for ChatError {
    fn from(err: diesel_async::pooled_connection::deadpool::PoolError) -> Self {
        tracing::error!(?err, "pool error");
        Self::Storage(err.to_string())
    }
}

/// Application-level error type that converts into an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<Vec<FieldError>>,
}

impl ApiError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "UNAUTHORIZED".to_string(),
            message: message.into(),
            details: None,
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        let status = match &err {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::Blocked | ChatError::Forbidden => StatusCode::FORBIDDEN,
            ChatError::NotFound => StatusCode::NOT_FOUND,
            ChatError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ChatError::ChannelEnded => StatusCode::CONFLICT,
            ChatError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let detail = err.detail();
        Self {
            status,
            code: detail.code,
            message: detail.message,
            details: detail.details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorDetail {
                code: self.code,
                message: self.message,
                details: self.details,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_hide_the_cause() {
        let detail = ChatError::Storage("connection reset by peer".into()).detail();
        assert_eq!(detail.code, "INTERNAL_ERROR");
        assert!(!detail.message.contains("connection reset"));
    }

    #[test]
    fn validation_errors_carry_field_details() {
        let err = ChatError::Validation(vec![FieldError::new("content", "too long")]);
        let api: ApiError = err.into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert_eq!(api.code, "VALIDATION_ERROR");
        assert_eq!(api.details.unwrap()[0].field, "content");
    }

    #[test]
    fn blocked_maps_to_forbidden_without_reason() {
        let api: ApiError = ChatError::Blocked.into();
        assert_eq!(api.status, StatusCode::FORBIDDEN);
        assert_eq!(api.code, "BLOCKED");
        assert_eq!(api.message, "not allowed to comment");
    }
}
