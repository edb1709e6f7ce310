use axum::{
    body::{Body, to_bytes},
    extract::{OriginalUri, State},
    http::{HeaderValue, Method, Request, StatusCode, Uri, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    cache::{
        CacheLookup, ResponseCache,
        keys::{namespace_pattern, prefix_pattern, response_cache_key},
    },
    middleware::metrics::MetricsRecorder,
};

pub const CACHE_STATUS_HEADER: &str = "x-cache";

// 嵌套路由会剥离前缀，缓存键需要完整路径
fn full_uri(req: &Request<Body>) -> Uri {
    req.extensions()
        .get::<OriginalUri>()
        .map(|OriginalUri(uri)| uri.clone())
        .unwrap_or_else(|| req.uri().clone())
}

/// 单个可缓存 GET 路由的缓存策略
#[derive(Clone)]
pub struct CachePolicy {
    cache: ResponseCache,
    metrics: MetricsRecorder,
    ttl_secs: u64,
}

impl CachePolicy {
    pub fn new(cache: ResponseCache, metrics: MetricsRecorder, ttl_secs: u64) -> Self {
        Self {
            cache,
            metrics,
            ttl_secs,
        }
    }
}

fn cached_response(body: axum::body::Bytes) -> Response {
    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        body,
    )
        .into_response();
    response
        .headers_mut()
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("HIT"));
    response
}

pub async fn cache_aside(
    State(policy): State<CachePolicy>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if req.method() != Method::GET {
        return next.run(req).await;
    }

    let key = response_cache_key(&full_uri(&req));

    match policy.cache.lookup(&key).await {
        CacheLookup::Hit(body) => {
            tracing::info!(cache = "HIT", key = %key, ttl = policy.ttl_secs, "Cache hit - returning cached data");
            policy.metrics.record_cache("hit");
            return cached_response(body);
        }
        CacheLookup::Miss => {
            tracing::info!(cache = "MISS", key = %key, ttl = policy.ttl_secs, "Cache miss - fetching from origin");
            policy.metrics.record_cache("miss");
        }
        CacheLookup::BackendError(e) => {
            tracing::warn!(error = %e, key = %key, "Cache lookup failed - continuing without cache");
            policy.metrics.record_cache("error");
        }
    }

    let response = next.run(req).await;
    if !response.status().is_success() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, key = %key, "Failed to buffer response for caching");
            return Response::from_parts(parts, Body::empty());
        }
    };

    if policy.cache.store(&key, policy.ttl_secs, bytes.clone()).await {
        policy.metrics.record_cache("set");
    } else {
        policy.metrics.record_cache("error");
    }

    parts
        .headers
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("MISS"));
    Response::from_parts(parts, Body::from(bytes))
}

#[derive(Debug, Clone)]
enum Target {
    /// 某个列表路径下的全部查询组合
    Namespace(String),
    /// 以该路径开头的全部键
    Prefix(String),
    /// 当前请求路径对应的单项键
    RequestPath,
}

/// 变更路由成功后需要失效的键模式
#[derive(Clone)]
pub struct InvalidationPolicy {
    cache: ResponseCache,
    metrics: MetricsRecorder,
    targets: Vec<Target>,
}

impl InvalidationPolicy {
    pub fn new(cache: ResponseCache, metrics: MetricsRecorder) -> Self {
        Self {
            cache,
            metrics,
            targets: Vec::new(),
        }
    }

    pub fn namespace(mut self, path: impl Into<String>) -> Self {
        self.targets.push(Target::Namespace(path.into()));
        self
    }

    pub fn prefix(mut self, path: impl Into<String>) -> Self {
        self.targets.push(Target::Prefix(path.into()));
        self
    }

    pub fn request_path(mut self) -> Self {
        self.targets.push(Target::RequestPath);
        self
    }

    pub fn patterns_for(&self, uri: &Uri) -> Vec<String> {
        self.targets
            .iter()
            .map(|target| match target {
                Target::Namespace(path) => namespace_pattern(path),
                Target::Prefix(path) => prefix_pattern(path),
                Target::RequestPath => namespace_pattern(uri.path()),
            })
            .collect()
    }
}

/// 仅在变更成功 (2xx) 后失效；失效失败不影响响应
pub async fn invalidate_on_success(
    State(policy): State<InvalidationPolicy>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let patterns = policy.patterns_for(&full_uri(&req));

    let response = next.run(req).await;
    if response.status().is_success() {
        let report = policy.cache.invalidate(&patterns).await;
        policy.metrics.record_cache("invalidate");
        if !report.failed_patterns.is_empty() {
            tracing::warn!(
                failed = ?report.failed_patterns,
                deleted = report.deleted,
                "Cache invalidation partially failed"
            );
        }
    }
    response
}
