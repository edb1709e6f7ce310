use axum::extract::{FromRequest, FromRequestParts, rejection::{JsonRejection, QueryRejection}};

use crate::error::{AppError, FieldError};

/// 请求体解析失败时返回统一的 400 校验错误
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(vec![FieldError::new("body", rejection.body_text())])
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(vec![FieldError::new("query", rejection.body_text())])
    }
}

/// 路径中的资源 ID，格式错误时返回 400
pub fn parse_id(raw: &str) -> Result<uuid::Uuid, AppError> {
    uuid::Uuid::parse_str(raw).map_err(|_| AppError::validation("id", "must be a UUID"))
}
