//! 缓存后端操作
//! `CacheStore` 对应 GET / SETEX / KEYS / DEL 四个原语

mod memory;
mod redis_store;
mod response;

pub use self::memory::MemoryCacheStore;
pub use self::redis_store::{RedisCacheStore, RedisConnection};
pub use self::response::ResponseCache;

use async_trait::async_trait;
use axum::body::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    async fn set_ex(&self, key: &str, ttl_secs: u64, value: Bytes) -> Result<(), CacheError>;

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    /// 返回实际删除的键数量
    async fn del(&self, keys: &[String]) -> Result<u64, CacheError>;
}
