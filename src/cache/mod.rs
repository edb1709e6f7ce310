// 缓存模块
// 键生成、后端存储抽象以及读缓存 (cache-aside) 逻辑

pub mod keys;
pub mod models;
pub mod operations;

pub use models::CacheLookup;
pub use operations::{
    CacheError, CacheStore, MemoryCacheStore, RedisCacheStore, RedisConnection, ResponseCache,
};
