use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::document::UnknownSection;
use crate::session::SessionError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Gone: {0}")]
    Gone(String),

    #[error("Save failed: {0}")]
    Persistence(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::DocumentNotFound(_) | SessionError::UnknownSession(_) => {
                AppError::NotFound(err.to_string())
            }
            SessionError::UnknownSection(e) => AppError::Validation(e.to_string()),
            SessionError::Closed => AppError::Gone(err.to_string()),
            SessionError::Store(e) => AppError::Internal(anyhow::Error::new(e)),
        }
    }
}

impl From<UnknownSection> for AppError {
    fn from(err: UnknownSection) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Gone(msg) => (StatusCode::GONE, "SESSION_CLOSED", msg.clone()),
            AppError::Persistence(msg) => {
                tracing::warn!("Manual save failed: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "SAVE_FAILED",
                    "Your changes could not be saved right now; they are kept in the session".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_session_errors_map_to_status_codes() {
        let cases = [
            (SessionError::DocumentNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (SessionError::UnknownSession(Uuid::nil()), StatusCode::NOT_FOUND),
            (
                SessionError::UnknownSection(UnknownSection("hobbies".into())),
                StatusCode::BAD_REQUEST,
            ),
            (SessionError::Closed, StatusCode::GONE),
        ];
        for (err, expected) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_persistence_is_bad_gateway() {
        let response = AppError::Persistence("timeout".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
