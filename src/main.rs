use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use rideshare_backend::{
    AppState, Pipeline, build_router,
    cache::{CacheStore, MemoryCacheStore, RedisCacheStore, RedisConnection},
    config::Config,
    middleware::{
        CounterStore, MemoryCounterStore, MetricsRecorder, PgSessionStore, RedisCounterStore,
    },
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const IN_PROCESS_STORE: &str = "memory://";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Arc::new(Config::from_env()?);

    if config.disable_rate_limit {
        tracing::warn!("Rate limiting is disabled");
    }

    // 设置数据库连接池
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET application_name = 'rideshare_backend';")
                    .await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await?;

    // 缓存与限流计数共用一个后端
    let (cache_store, counter_store): (Arc<dyn CacheStore>, Arc<dyn CounterStore>) =
        if config.redis_url == IN_PROCESS_STORE {
            tracing::info!("Using in-process cache and rate-limit stores");
            (
                Arc::new(MemoryCacheStore::new()),
                Arc::new(MemoryCounterStore::new()),
            )
        } else {
            let redis = RedisConnection::new(redis::Client::open(config.redis_url.clone())?);
            (
                Arc::new(RedisCacheStore::new(redis.clone())),
                Arc::new(RedisCounterStore::new(redis)),
            )
        };

    let pipeline = Pipeline::new(
        config.clone(),
        MetricsRecorder::new()?,
        cache_store,
        counter_store,
        Arc::new(PgSessionStore::new(pool.clone())),
    );

    let state = AppState {
        pool,
        config: config.clone(),
        authenticator: pipeline.authenticator.clone(),
    };
    let app = build_router(state, &pipeline);

    let addr = SocketAddr::new(
        config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    tracing::info!("Metrics available at {}", config.metrics_path);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
