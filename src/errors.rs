use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use sqlx::Error as SqlxError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Password error: {0}")]
    PasswordError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] SqlxError),

    #[error("Migration error: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),
}

impl AppError {
    /// Messages for server-side failures never leave the process.
    fn is_internal(&self) -> bool {
        matches!(
            self,
            AppError::Config(_)
                | AppError::PasswordError(_)
                | AppError::Internal(_)
                | AppError::IoError(_)
                | AppError::SqlxError(_)
                | AppError::MigrateError(_)
        )
    }
}

/// Maps a unique-constraint violation to `Conflict`, anything else stays a database error.
pub fn conflict_on_unique(err: SqlxError, message: &str) -> AppError {
    match &err {
        SqlxError::Database(db_err) if db_err.is_unique_violation() => {
            log::info!("Unique constraint violated: {}", db_err);
            AppError::Conflict(message.to_owned())
        }
        _ => AppError::SqlxError(err),
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Config(_)
            | AppError::PasswordError(_)
            | AppError::Internal(_)
            | AppError::IoError(_)
            | AppError::SqlxError(_)
            | AppError::MigrateError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = if self.is_internal() {
            log::error!("Request failed: {}", self);
            "Internal server error".to_owned()
        } else {
            self.to_string()
        };
        HttpResponse::build(self.status_code()).json(json!({ "message": message }))
    }
}

impl From<AppError> for std::io::Error {
    fn from(err: AppError) -> Self {
        std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
    }
}
