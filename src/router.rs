use std::sync::Arc;

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{MethodRouter, delete, get, patch, post},
};
use tower_http::cors::CorsLayer;

use crate::{
    AppState,
    cache::{CacheStore, ResponseCache},
    config::Config,
    middleware::{
        CachePolicy, CounterStore, InvalidationPolicy, MetricsRecorder, RateLimitGuard,
        RateLimiter, RouteClass, SessionAuthenticator, SessionStore, cache_aside,
        invalidate_on_success, log_errors, metrics_handler, rate_limit, request_logger,
        require_auth, track_metrics,
    },
    routes::{self, auth, profile, ride},
};

/// 请求管线的共享组件，启动时创建一次
///
/// 外层到内层的顺序：指标、访问日志、错误日志、api 限流、auth 限流、认证、缓存/失效、处理函数。
#[derive(Clone)]
pub struct Pipeline {
    pub config: Arc<Config>,
    pub metrics: MetricsRecorder,
    pub cache: ResponseCache,
    pub limiter: Arc<RateLimiter>,
    pub authenticator: Arc<SessionAuthenticator>,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        metrics: MetricsRecorder,
        cache_store: Arc<dyn CacheStore>,
        counter_store: Arc<dyn CounterStore>,
        session_store: Arc<dyn SessionStore>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(counter_store, metrics.clone(), &config));
        let authenticator = Arc::new(SessionAuthenticator::new(
            session_store,
            config.session_cookie_name.clone(),
        ));
        Self {
            cache: ResponseCache::new(cache_store),
            config,
            metrics,
            limiter,
            authenticator,
        }
    }

    /// 带前缀的完整路径，用于构造失效模式
    pub fn api_path(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_uri.trim_end_matches('/'), path)
    }

    pub fn cached<S>(&self, route: MethodRouter<S>, ttl_secs: u64) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let policy = CachePolicy::new(self.cache.clone(), self.metrics.clone(), ttl_secs);
        route.layer(from_fn_with_state(policy, cache_aside))
    }

    pub fn protected<S>(&self, route: MethodRouter<S>) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        route.layer(from_fn_with_state(self.authenticator.clone(), require_auth))
    }

    pub fn invalidation(&self) -> InvalidationPolicy {
        InvalidationPolicy::new(self.cache.clone(), self.metrics.clone())
    }

    pub fn invalidates<S>(&self, route: MethodRouter<S>, policy: InvalidationPolicy) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        route.layer(from_fn_with_state(policy, invalidate_on_success))
    }

    pub fn rate_limited<S>(&self, route: MethodRouter<S>, class: RouteClass) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let guard = RateLimitGuard::new(self.limiter.clone(), class);
        route.layer(from_fn_with_state(guard, rate_limit))
    }

    /// api 限流作用于整个前缀下的路由
    pub fn api_scope<S>(&self, routes: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let guard = RateLimitGuard::new(self.limiter.clone(), RouteClass::Api);
        Router::new().nest(
            &self.config.api_base_uri,
            routes.layer(from_fn_with_state(guard, rate_limit)),
        )
    }

    /// 添加日志与指标层；指标端点在这些层之后挂载，不计入自身统计
    pub fn finish<S>(&self, app: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let app = app
            .layer(from_fn(log_errors))
            .layer(from_fn(request_logger))
            .layer(from_fn_with_state(self.metrics.clone(), track_metrics))
            .route(
                &self.config.metrics_path,
                get(metrics_handler).with_state(self.metrics.clone()),
            );

        if self.config.development {
            tracing::debug!("Adding permissive CORS layer for development");
            app.layer(CorsLayer::permissive())
        } else {
            app
        }
    }
}

fn auth_routes(pipeline: &Pipeline) -> Router<AppState> {
    let register = pipeline.invalidates(
        post(auth::register),
        pipeline.invalidation().namespace(pipeline.api_path("/profiles")),
    );

    Router::new()
        .route("/register", pipeline.rate_limited(register, RouteClass::Auth))
        .route("/login", pipeline.rate_limited(post(auth::login), RouteClass::Auth))
        .route("/logout", post(auth::logout))
        .route("/session", pipeline.protected(get(auth::session)))
}

fn profile_routes(pipeline: &Pipeline) -> Router<AppState> {
    let config = &pipeline.config;
    // 资料变更会影响行程中的参与者信息
    let own_profile_changes = || {
        pipeline
            .invalidation()
            .prefix(pipeline.api_path("/profiles"))
            .prefix(pipeline.api_path("/rides"))
    };

    Router::new()
        .route(
            "/",
            pipeline.cached(get(profile::list_profiles), config.cache_ttl_list_secs),
        )
        .route(
            "/profile",
            pipeline.protected(
                get(profile::get_own_profile)
                    .merge(pipeline.invalidates(
                        patch(profile::update_own_profile),
                        own_profile_changes(),
                    ))
                    .merge(pipeline.invalidates(
                        delete(profile::delete_own_profile),
                        own_profile_changes(),
                    )),
            ),
        )
        .route(
            "/change-password",
            pipeline.protected(post(profile::change_password)),
        )
        .route(
            "/{id}",
            pipeline.cached(get(profile::get_profile), config.cache_ttl_item_secs),
        )
}

fn ride_routes(pipeline: &Pipeline) -> Router<AppState> {
    let config = &pipeline.config;
    let rides = pipeline.api_path("/rides");

    Router::new()
        .route(
            "/",
            pipeline
                .cached(get(ride::list_rides), config.cache_ttl_list_secs)
                .merge(pipeline.protected(pipeline.invalidates(
                    post(ride::create_ride),
                    pipeline.invalidation().namespace(rides.clone()),
                ))),
        )
        .route(
            "/{id}",
            pipeline
                .cached(get(ride::get_ride), config.cache_ttl_item_secs)
                .merge(pipeline.protected(pipeline.invalidates(
                    patch(ride::update_ride).delete(ride::delete_ride),
                    pipeline
                        .invalidation()
                        .namespace(rides.clone())
                        .request_path(),
                ))),
        )
}

pub fn build_router(state: AppState, pipeline: &Pipeline) -> Router {
    let mut api = Router::new()
        .nest("/auth", auth_routes(pipeline))
        .nest("/profiles", profile_routes(pipeline))
        .nest("/rides", ride_routes(pipeline));

    if pipeline.config.development {
        tracing::info!("Mounting test routes");
        api = api.nest("/test", routes::test::routes());
    }

    let app = Router::new()
        .route("/", get(routes::health))
        .merge(pipeline.api_scope(api));

    pipeline.finish(app).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache::MemoryCacheStore, middleware::MemoryCounterStore, middleware::PgSessionStore};
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    // 连接池惰性建立，这些用例都不会真正访问数据库
    fn app(development: bool) -> Router {
        let config = Arc::new(Config {
            database_url: "postgres://localhost/rideshare_test".into(),
            development,
            ..Config::default()
        });
        let pool = PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .unwrap();
        let pipeline = Pipeline::new(
            config.clone(),
            MetricsRecorder::new().unwrap(),
            Arc::new(MemoryCacheStore::new()),
            Arc::new(MemoryCounterStore::new()),
            Arc::new(PgSessionStore::new(pool.clone())),
        );
        let state = AppState {
            pool,
            config,
            authenticator: pipeline.authenticator.clone(),
        };
        build_router(state, &pipeline)
    }

    async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn health_document() {
        let (status, body) = send(app(false), "GET", "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn protected_routes_reject_before_handler() {
        for (method, uri) in [
            ("GET", "/api/auth/session"),
            ("GET", "/api/profiles/profile"),
            ("POST", "/api/rides"),
            ("DELETE", "/api/rides/6f1c1f0e-51a4-4a43-9a53-5d1c4f2a9b10"),
        ] {
            let (status, body) = send(app(false), method, uri).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {uri}");
            assert_eq!(body["message"], "Authentication required");
        }
    }

    #[tokio::test]
    async fn malformed_ride_id_is_a_validation_error() {
        let (status, body) = send(app(false), "GET", "/api/rides/not-a-uuid").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["field"], "id");
    }

    #[tokio::test]
    async fn test_routes_only_in_development() {
        let (status, _) = send(app(false), "GET", "/api/test/error/500").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(app(true), "GET", "/api/test/error/500").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
    }

    #[tokio::test]
    async fn metrics_endpoint_is_mounted() {
        let resp = app(false)
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
