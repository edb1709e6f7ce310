use axum::{
    body::{Body, to_bytes},
    http::Request,
    middleware::Next,
    response::Response,
};
use tracing::error;

use super::context::RequestContext;

// 只记录错误响应体的前 1KB
const MAX_LOGGED_BODY: usize = 1024;

pub async fn log_errors(req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone());
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    if response.status().is_server_error() {
        let (mut parts, body) = response.into_parts();
        let bytes = match to_bytes(body, usize::MAX).await {
            Ok(b) => b,
            Err(e) => {
                error!("Failed to read error response body: {}", e);
                return Response::from_parts(parts, Body::empty());
            }
        };
        let shown = &bytes[..bytes.len().min(MAX_LOGGED_BODY)];

        error!(
            request_id = ?request_id,
            path = %path,
            "Server error occurred - Status: {}, Body: {}",
            parts.status,
            String::from_utf8_lossy(shown)
        );

        // 重置body以便重新构建响应
        parts.headers.remove(axum::http::header::CONTENT_LENGTH);
        Response::from_parts(parts, Body::from(bytes))
    } else {
        response
    }
}
