//! Unified error handling for the relay.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tessera_engine::protocol::relay::ErrorBody;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A held lock, a taken username
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let error = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                "Database error".to_string()
            }
            AppError::Unauthorized => "Unauthorized".to_string(),
            AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::Forbidden(msg)
            | AppError::Conflict(msg) => msg.clone(),
        };

        let body = Json(ErrorBody {
            error,
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_lock_maps_to_conflict() {
        let response = AppError::Conflict("lock held".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn database_errors_are_not_leaked() {
        let response = AppError::Database(sqlx::Error::RowNotFound).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            AppError::NotFound("room".into()).status_and_code(),
            (StatusCode::NOT_FOUND, "not_found")
        );
        assert_eq!(
            AppError::Forbidden("not a member".into()).status_and_code(),
            (StatusCode::FORBIDDEN, "forbidden")
        );
        assert_eq!(
            AppError::Unauthorized.status_and_code().0,
            StatusCode::UNAUTHORIZED
        );
    }
}
