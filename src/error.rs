use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::video::VideoStatus;
use crate::publisher::PublishError;
use crate::store::StoreError;
use crate::workflow::lifecycle::VideoEvent;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,
    #[error("Insufficient permissions")]
    Forbidden,
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Cannot {event} a video that is {from} (allowed: {})", join_events(.allowed))]
    InvalidTransition {
        from: VideoStatus,
        event: VideoEvent,
        allowed: Vec<VideoEvent>,
    },
    #[error("{0}")]
    Conflict(String),
    #[error("Publishing failed: {0}")]
    PublishFailed(String),
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

fn join_events(events: &[VideoEvent]) -> String {
    if events.is_empty() {
        return "none".to_string();
    }
    events
        .iter()
        .map(|e| e.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidTransition { .. } | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PublishFailed(_) => StatusCode::BAD_GATEWAY,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "{self}");
        } else {
            tracing::warn!(status = status.as_u16(), "{self}");
        }

        let body = match &self {
            Self::InvalidTransition { from, event, allowed } => json!({
                "error": self.to_string(),
                "current_status": from,
                "event": event,
                "allowed_events": allowed,
            }),
            Self::Internal(_) => json!({ "error": "Internal server error" }),
            _ => json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            StoreError::Backend(msg) => Self::Internal(msg),
        }
    }
}

impl From<PublishError> for AppError {
    fn from(e: PublishError) -> Self {
        Self::PublishFailed(e.to_string())
    }
}
