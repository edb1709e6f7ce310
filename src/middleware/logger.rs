use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;

use super::context::RequestContext;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// 生成请求 ID 并记录访问日志
pub async fn request_logger(mut req: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext::new(
        req.headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|h| h.to_str().ok()),
    );
    req.extensions_mut().insert(ctx.clone());

    let method = req.method().clone();
    let uri = req.uri().clone();
    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());

    let span = tracing::info_span!("request", request_id = %ctx.request_id);

    async move {
        tracing::info!(method = %method, url = %uri, ip = ?ip, "Incoming request");

        let mut response = next.run(req).await;

        let status = response.status();
        let duration_ms = ctx.started_at.elapsed().as_millis() as u64;
        if status.is_server_error() {
            tracing::error!(method = %method, url = %uri, status = status.as_u16(), duration_ms, "Request completed with error");
        } else if status.is_client_error() {
            tracing::warn!(method = %method, url = %uri, status = status.as_u16(), duration_ms, "Request completed with client error");
        } else {
            tracing::info!(method = %method, url = %uri, status = status.as_u16(), duration_ms, "Request completed");
        }

        if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
    .instrument(span)
    .await
}
