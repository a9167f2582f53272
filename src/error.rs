use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Dependency not met: {0}")]
    DependencyNotMet(String),

    #[error("Roll already done for this date")]
    RollAlreadyDone,

    #[error("Roll not available: {0}")]
    RollNotAvailable(String),

    // Internal-only: finalization raced another caller and lost.
    #[error("Day {0} is already finalized")]
    AlreadyFinalized(NaiveDate),

    #[error("Backup error: {0}")]
    Backup(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::DependencyNotMet(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::RollAlreadyDone => (StatusCode::CONFLICT, self.to_string()),
            AppError::RollNotAvailable(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::AlreadyFinalized(_) => (StatusCode::CONFLICT, self.to_string()),
            AppError::Backup(msg) => {
                tracing::error!(error = %msg, "Backup error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Backup failed".into())
            }
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".into(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!(error = %e, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".into(),
                )
            }
        };

        let body = json!({
            "error": {
                "message": message,
                "code": status.as_u16(),
            }
        });

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
