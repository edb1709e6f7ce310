use std::sync::Arc;

use axum::body::Bytes;

use super::CacheStore;
use crate::cache::models::{CacheLookup, InvalidationReport};

/// 读缓存核心：查询、写入与按模式失效
///
/// 不做单飞合并，同一键的并发未命中会各自回源并写入相同结果。
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub async fn lookup(&self, key: &str) -> CacheLookup {
        match self.store.get(key).await {
            Ok(Some(value)) => CacheLookup::Hit(value),
            Ok(None) => CacheLookup::Miss,
            Err(e) => CacheLookup::BackendError(e),
        }
    }

    /// 写入失败只记录日志
    pub async fn store(&self, key: &str, ttl_secs: u64, value: Bytes) -> bool {
        match self.store.set_ex(key, ttl_secs, value).await {
            Ok(()) => {
                tracing::debug!(cache = "SET", key, ttl = ttl_secs, "Response cached");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, key, "Failed to cache response");
                false
            }
        }
    }

    /// 逐个模式枚举并批量删除；批次之间不保证原子性，失败的模式记录后跳过
    pub async fn invalidate(&self, patterns: &[String]) -> InvalidationReport {
        let mut report = InvalidationReport::default();

        for pattern in patterns {
            let result = match self.store.keys(pattern).await {
                Ok(keys) => self.store.del(&keys).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(0) => {}
                Ok(count) => {
                    tracing::info!(pattern = %pattern, count, "Cache invalidated");
                    report.deleted += count;
                }
                Err(e) => {
                    tracing::error!(error = %e, pattern = %pattern, "Failed to invalidate cache");
                    report.failed_patterns.push(pattern.clone());
                }
            }
        }

        report
    }
}
