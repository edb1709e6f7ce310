//! 仅开发环境挂载的错误触发路由，用于检查日志与指标输出

use std::time::Duration;

use axum::{
    Json, Router,
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::{AppError, AppResult, FieldError},
    extract::AppJson,
    middleware::RequestContext,
    result::message_to_api_response,
};

pub fn routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/", get(info))
        .route("/error/{kind}", get(trigger_error))
        .route("/error/validation", post(validation))
        .route("/slow", get(slow))
}

async fn info() -> impl IntoResponse {
    Json(json!({
        "success": true,
        "message": "Test routes for error logging",
        "routes": [
            { "path": "/api/test/error/400", "description": "Trigger 400 Bad Request" },
            { "path": "/api/test/error/404", "description": "Trigger 404 Not Found" },
            { "path": "/api/test/error/500", "description": "Trigger 500 Internal Server Error" },
            { "path": "/api/test/error/exception", "description": "Trigger unhandled error" },
            { "path": "/api/test/error/database", "description": "Trigger database error" },
            { "path": "/api/test/error/validation", "description": "Trigger validation error (POST)" },
            { "path": "/api/test/slow", "description": "Trigger slow request (800ms)" },
        ],
    }))
}

async fn trigger_error(ctx: RequestContext, Path(kind): Path<String>) -> AppResult<StatusCode> {
    tracing::info!(request_id = %ctx.request_id, kind = %kind, "Triggering test error");
    match kind.as_str() {
        "400" => Err(AppError::validation("test", "Bad Request - Test error")),
        "404" => Err(AppError::NotFound),
        "500" | "exception" => Err(AppError::Internal("Unhandled exception - Test error".into())),
        "database" => Err(AppError::from(sqlx::Error::PoolTimedOut)),
        _ => Err(AppError::NotFound),
    }
}

#[derive(Debug, Deserialize)]
struct Person {
    name: String,
    age: i64,
}

async fn validation(AppJson(person): AppJson<Person>) -> AppResult<impl IntoResponse> {
    let mut errors = Vec::new();
    if person.name.is_empty() {
        errors.push(FieldError::new("name", "must not be empty"));
    }
    if person.age < 18 {
        errors.push(FieldError::new("age", "must be at least 18"));
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }
    Ok(message_to_api_response("Validation passed"))
}

async fn slow() -> impl IntoResponse {
    tokio::time::sleep(Duration::from_millis(800)).await;
    Json(json!({
        "success": true,
        "message": "Slow request completed",
        "duration": "800ms",
    }))
}
