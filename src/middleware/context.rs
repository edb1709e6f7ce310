use std::time::Instant;

use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::AppError;

/// 请求级上下文，由日志中间件在入口处创建一次，之后只读
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub started_at: Instant,
}

impl RequestContext {
    pub fn new(request_id: Option<&str>) -> Self {
        Self {
            request_id: request_id
                .filter(|id| !id.is_empty() && id.len() <= 128)
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            started_at: Instant::now(),
        }
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| AppError::Internal("request context missing".into()))
    }
}
