use axum::Json;
use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::middleware::AuthFailure;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
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

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error("unauthenticated: {0:?}")]
    Unauthenticated(AuthFailure),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("resource not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64, message: String },
    #[error("internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<FieldError>,
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation(vec![FieldError::new(field, message)])
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut retry_after = None;

        let (message, errors) = match self {
            AppError::Validation(errors) => ("Validation error".to_string(), errors),
            // 不区分具体原因，避免泄露 token 是否存在
            AppError::Unauthenticated(AuthFailure::InvalidCredentials) => {
                ("Invalid email or password".to_string(), Vec::new())
            }
            AppError::Unauthenticated(_) => ("Authentication required".to_string(), Vec::new()),
            AppError::Forbidden(message) => (message, Vec::new()),
            AppError::NotFound => ("Resource not found".to_string(), Vec::new()),
            AppError::Conflict(message) => (message, Vec::new()),
            AppError::RateLimited {
                retry_after: secs,
                message,
            } => {
                retry_after = Some(secs);
                (message, Vec::new())
            }
            AppError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error");
                ("Internal server error".to_string(), Vec::new())
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            errors,
        });

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::Conflict("Resource already exists".into())
            }
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => AppError::NotFound,
            _ => AppError::Internal(err.to_string()),
        }
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(err: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("password hashing failed: {err}"))
    }
}
