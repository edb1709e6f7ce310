use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client as RedisClient, RedisError};
use tokio::sync::OnceCell;

use super::{CacheError, CacheStore};

// 后端不可达时尽快失败，缓存与限流都按降级处理
const CONNECTION_TIMEOUT: Duration = Duration::from_millis(500);
const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);
const CONNECT_RETRIES: usize = 1;

/// 缓存与限流共用的 Redis 连接
///
/// 第一次使用时建立 `ConnectionManager`，之后所有克隆共享它，断线由它自动重连。
/// 建立失败不会缓存结果，下次调用会重试。
#[derive(Clone)]
pub struct RedisConnection {
    client: Arc<RedisClient>,
    manager: Arc<OnceCell<ConnectionManager>>,
}

impl RedisConnection {
    pub fn new(client: RedisClient) -> Self {
        Self {
            client: Arc::new(client),
            manager: Arc::new(OnceCell::new()),
        }
    }

    pub async fn get(&self) -> Result<ConnectionManager, RedisError> {
        let manager = self
            .manager
            .get_or_try_init(|| async {
                let config = ConnectionManagerConfig::new()
                    .set_connection_timeout(CONNECTION_TIMEOUT)
                    .set_response_timeout(RESPONSE_TIMEOUT)
                    .set_number_of_retries(CONNECT_RETRIES);
                tracing::info!("Opening shared redis connection");
                ConnectionManager::new_with_config(self.client.as_ref().clone(), config).await
            })
            .await?;
        Ok(manager.clone())
    }
}

#[derive(Clone)]
pub struct RedisCacheStore {
    redis: RedisConnection,
}

impl RedisCacheStore {
    pub fn new(redis: RedisConnection) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let mut conn = self.redis.get().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set_ex(&self, key: &str, ttl_secs: u64, value: Bytes) -> Result<(), CacheError> {
        let mut conn = self.redis.get().await?;
        let _: () = conn.set_ex(key, value.as_ref(), ttl_secs).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.redis.get().await?;
        let keys: Vec<String> = conn.keys(pattern).await?;
        Ok(keys)
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.redis.get().await?;
        let deleted: u64 = conn.del(keys).await?;
        Ok(deleted)
    }
}
