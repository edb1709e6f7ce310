//! 请求管线的端到端测试
//!
//! 使用桩处理函数与进程内存储搭建完整的中间件栈，不依赖 PostgreSQL 或 Redis。

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use rideshare_backend::{
    Pipeline,
    cache::{CacheError, CacheStore, MemoryCacheStore},
    config::{Config, RateLimitRule},
    middleware::{MemoryCounterStore, MetricsRecorder, RouteClass, SessionRecord, SessionStore},
};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use uuid::Uuid;

type OriginCalls = Arc<AtomicUsize>;

struct Sessions;

#[async_trait]
impl SessionStore for Sessions {
    async fn find_by_token(&self, token: &str) -> Result<Option<SessionRecord>, sqlx::Error> {
        let expires_at = match token {
            "valid-token" => Utc::now() + chrono::Duration::hours(1),
            "expired-token" => Utc::now() - chrono::Duration::hours(1),
            _ => return Ok(None),
        };
        Ok(Some(SessionRecord {
            session_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            email: "rider@example.com".into(),
            expires_at,
        }))
    }
}

struct DownCache;

#[async_trait]
impl CacheStore for DownCache {
    async fn get(&self, _key: &str) -> Result<Option<axum::body::Bytes>, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn set_ex(&self, _key: &str, _ttl: u64, _value: axum::body::Bytes) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn keys(&self, _pattern: &str) -> Result<Vec<String>, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn del(&self, _keys: &[String]) -> Result<u64, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
}

async fn list_items(State(calls): State<OriginCalls>, uri: Uri) -> Json<Value> {
    let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({ "success": true, "data": { "call": call, "query": uri.query() } }))
}

async fn missing_item(State(calls): State<OriginCalls>) -> StatusCode {
    calls.fetch_add(1, Ordering::SeqCst);
    StatusCode::NOT_FOUND
}

async fn create_item(Json(body): Json<Value>) -> Response {
    if body["valid"] == json!(false) {
        return (StatusCode::BAD_REQUEST, Json(json!({ "success": false }))).into_response();
    }
    (StatusCode::CREATED, Json(json!({ "success": true, "data": body }))).into_response()
}

async fn login(Json(body): Json<Value>) -> StatusCode {
    if body["password"] == json!("good") {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    }
}

fn test_config() -> Config {
    Config {
        cache_ttl_list_secs: 60,
        cache_ttl_item_secs: 60,
        ..Config::default()
    }
}

struct TestServer {
    base: String,
    client: reqwest::Client,
    calls: OriginCalls,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    async fn start(config: Config) -> Self {
        Self::start_with_cache(config, Arc::new(MemoryCacheStore::new())).await
    }

    async fn start_with_cache(config: Config, cache: Arc<dyn CacheStore>) -> Self {
        let pipeline = Pipeline::new(
            Arc::new(config),
            MetricsRecorder::new().unwrap(),
            cache,
            Arc::new(MemoryCounterStore::new()),
            Arc::new(Sessions),
        );
        let list_ttl = pipeline.config.cache_ttl_list_secs;
        let item_ttl = pipeline.config.cache_ttl_item_secs;

        let api = Router::new()
            .route(
                "/items",
                pipeline.cached(get(list_items), list_ttl).merge(pipeline.protected(
                    pipeline.invalidates(
                        post(create_item),
                        pipeline.invalidation().namespace(pipeline.api_path("/items")),
                    ),
                )),
            )
            .route("/missing", pipeline.cached(get(missing_item), item_ttl))
            .route(
                "/private",
                pipeline.protected(pipeline.cached(get(list_items), item_ttl)),
            )
            .route("/login", pipeline.rate_limited(post(login), RouteClass::Auth));

        let calls = OriginCalls::default();
        let app = pipeline
            .finish(pipeline.api_scope(api))
            .with_state(calls.clone());

        let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
        });

        Self {
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
            calls,
            _shutdown: tx,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    fn origin_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn cache_status(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get("x-cache")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[tokio::test]
async fn cache_hit_returns_identical_bytes_without_origin_call() {
    let server = TestServer::start(test_config()).await;

    let first = server.get("/api/items?page=1").await;
    assert_eq!(first.status(), 200);
    assert_eq!(cache_status(&first).as_deref(), Some("MISS"));
    let first_body = first.bytes().await.unwrap();

    let second = server.get("/api/items?page=1").await;
    assert_eq!(cache_status(&second).as_deref(), Some("HIT"));
    assert_eq!(
        second.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    assert_eq!(second.bytes().await.unwrap(), first_body);

    assert_eq!(server.origin_calls(), 1);
}

#[tokio::test]
async fn query_parameter_order_does_not_change_key() {
    let server = TestServer::start(test_config()).await;

    server.get("/api/items?b=2&a=1").await;
    let resp = server.get("/api/items?a=1&b=2").await;

    assert_eq!(cache_status(&resp).as_deref(), Some("HIT"));
    assert_eq!(server.origin_calls(), 1);
}

#[tokio::test]
async fn expired_entry_is_a_miss() {
    let server = TestServer::start(Config {
        cache_ttl_list_secs: 1,
        ..test_config()
    })
    .await;

    server.get("/api/items").await;
    assert_eq!(cache_status(&server.get("/api/items").await).as_deref(), Some("HIT"));

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let resp = server.get("/api/items").await;
    assert_eq!(cache_status(&resp).as_deref(), Some("MISS"));
    assert_eq!(server.origin_calls(), 2);
}

#[tokio::test]
async fn successful_mutation_invalidates_list() {
    let server = TestServer::start(test_config()).await;

    server.get("/api/items").await;
    server.get("/api/items?page=2").await;
    assert_eq!(cache_status(&server.get("/api/items").await).as_deref(), Some("HIT"));

    let created = server
        .client
        .post(server.url("/api/items"))
        .bearer_auth("valid-token")
        .json(&json!({ "name": "ride" }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);

    assert_eq!(cache_status(&server.get("/api/items").await).as_deref(), Some("MISS"));
    assert_eq!(
        cache_status(&server.get("/api/items?page=2").await).as_deref(),
        Some("MISS")
    );
    assert_eq!(server.origin_calls(), 4);
}

#[tokio::test]
async fn failed_mutation_keeps_cache() {
    let server = TestServer::start(test_config()).await;
    server.get("/api/items").await;

    let rejected = server
        .client
        .post(server.url("/api/items"))
        .bearer_auth("valid-token")
        .json(&json!({ "valid": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), 400);

    assert_eq!(cache_status(&server.get("/api/items").await).as_deref(), Some("HIT"));
    assert_eq!(server.origin_calls(), 1);
}

#[tokio::test]
async fn error_responses_are_not_cached() {
    let server = TestServer::start(test_config()).await;

    assert_eq!(server.get("/api/missing").await.status(), 404);
    let again = server.get("/api/missing").await;
    assert_eq!(again.status(), 404);
    assert!(cache_status(&again).is_none());

    assert_eq!(server.origin_calls(), 2);
}

#[tokio::test]
async fn unreachable_cache_fails_open() {
    let server = TestServer::start_with_cache(test_config(), Arc::new(DownCache)).await;

    for expected_call in 1..=2 {
        let resp = server.get("/api/items").await;
        assert_eq!(resp.status(), 200);
        assert_ne!(cache_status(&resp).as_deref(), Some("HIT"));
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["data"]["call"], json!(expected_call));
    }

    let created = server
        .client
        .post(server.url("/api/items"))
        .bearer_auth("valid-token")
        .json(&json!({ "name": "ride" }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);
}

#[tokio::test]
async fn unauthenticated_responses_are_uniform() {
    let server = TestServer::start(test_config()).await;

    let missing = server.get("/api/private").await;
    let unknown = server
        .client
        .get(server.url("/api/private"))
        .bearer_auth("no-such-token")
        .send()
        .await
        .unwrap();
    let expired = server
        .client
        .get(server.url("/api/private"))
        .header("authorization", "expired-token")
        .send()
        .await
        .unwrap();

    let mut bodies = Vec::new();
    for resp in [missing, unknown, expired] {
        assert_eq!(resp.status(), 401);
        bodies.push(resp.text().await.unwrap());
    }
    assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(server.origin_calls(), 0);

    let by_cookie = server
        .client
        .get(server.url("/api/private"))
        .header("cookie", "better-auth.session_token=valid-token")
        .send()
        .await
        .unwrap();
    assert_eq!(by_cookie.status(), 200);
}

#[tokio::test]
async fn api_window_rejects_and_resets() {
    let server = TestServer::start(Config {
        api_rate_limit: RateLimitRule {
            window_secs: 1,
            max_requests: 3,
        },
        ..test_config()
    })
    .await;

    for remaining in ["2", "1", "0"] {
        let resp = server.get("/api/items").await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["ratelimit-limit"], "3");
        assert_eq!(resp.headers()["ratelimit-remaining"], remaining);
    }

    let rejected = server.get("/api/items").await;
    assert_eq!(rejected.status(), 429);
    assert_eq!(rejected.headers()["retry-after"], "1");
    let body: Value = rejected.json().await.unwrap();
    assert_eq!(body["success"], json!(false));
    assert!(body["message"].is_string());

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(server.get("/api/items").await.status(), 200);
}

async fn attempt_login(server: &TestServer, password: &str) -> reqwest::Response {
    server
        .client
        .post(server.url("/api/login"))
        .json(&json!({ "email": "rider@example.com", "password": password }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn failed_logins_exhaust_auth_window() {
    let server = TestServer::start(test_config()).await;

    for _ in 0..5 {
        assert_eq!(attempt_login(&server, "wrong").await.status(), 401);
    }
    let blocked = attempt_login(&server, "good").await;
    assert_eq!(blocked.status(), 429);
    assert_eq!(blocked.headers()["ratelimit-limit"], "5");
}

#[tokio::test]
async fn successful_logins_are_not_counted() {
    let server = TestServer::start(test_config()).await;

    for _ in 0..5 {
        assert_eq!(attempt_login(&server, "good").await.status(), 200);
    }
    assert_eq!(attempt_login(&server, "good").await.status(), 200);
    assert_eq!(attempt_login(&server, "wrong").await.status(), 401);
}

#[tokio::test]
async fn rate_limit_bypass_flag() {
    let server = TestServer::start(Config {
        disable_rate_limit: true,
        ..test_config()
    })
    .await;

    for _ in 0..8 {
        let resp = attempt_login(&server, "wrong").await;
        assert_eq!(resp.status(), 401);
        assert!(resp.headers().get("ratelimit-limit").is_none());
    }
}

#[tokio::test]
async fn metrics_use_route_templates_and_skip_themselves() {
    let server = TestServer::start(test_config()).await;

    server.get("/api/items?page=1").await;
    server.get("/api/items?page=2").await;
    server.get("/nowhere/42").await;
    server.get("/metrics").await;

    let resp = server.get("/metrics").await;
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().get("x-request-id").is_none());
    let text = resp.text().await.unwrap();

    assert!(text.contains(
        "rideshare_http_request_duration_seconds_count{method=\"GET\",route=\"/api/items\",status_code=\"200\"} 2"
    ));
    assert!(text.contains("route=\"unmatched\",status_code=\"404\""));
    assert!(!text.contains("route=\"/metrics\""));
    assert!(text.contains("rideshare_cache_operations_total{result=\"miss\"} 2"));
}

#[tokio::test]
async fn request_id_is_echoed() {
    let server = TestServer::start(test_config()).await;

    let resp = server
        .client
        .get(server.url("/api/items"))
        .header("x-request-id", "trace-123")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-request-id"], "trace-123");

    let generated = server.get("/api/items").await;
    assert!(generated.headers().contains_key("x-request-id"));
}
