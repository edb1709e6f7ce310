use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{CacheError, CacheStore};
use crate::cache::keys::glob_match;

struct Entry {
    value: Bytes,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// 进程内缓存，单实例部署或测试使用；写入和枚举时顺带清掉过期条目
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| e.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 包括尚未清理的过期条目在内的条目数
    pub async fn stored(&self) -> usize {
        self.entries.lock().await.len()
    }
}

fn purge_expired(entries: &mut HashMap<String, Entry>, now: Instant) {
    entries.retain(|_, entry| entry.is_live(now));
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, ttl_secs: u64, value: Bytes) -> Result<(), CacheError> {
        let now = Instant::now();
        let expires_at = now + Duration::from_secs(ttl_secs);
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, now);
        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, now);
        Ok(entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
        let mut entries = self.entries.lock().await;
        Ok(keys.iter().filter(|k| entries.remove(*k).is_some()).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryCacheStore::new();
        store
            .set_ex("/api/rides:all", 60, Bytes::from_static(b"[]"))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.get("/api/rides:all").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get("/api/rides:all").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn keys_and_del_follow_pattern() {
        let store = MemoryCacheStore::new();
        for key in ["/api/rides:all", "/api/rides:page=2", "/api/profiles:all"] {
            store.set_ex(key, 60, Bytes::from_static(b"{}")).await.unwrap();
        }

        let mut keys = store.keys("/api/rides:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["/api/rides:all", "/api/rides:page=2"]);

        assert_eq!(store.del(&keys).await.unwrap(), 2);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_purged_not_just_hidden() {
        let store = MemoryCacheStore::new();
        for i in 0..1000 {
            store
                .set_ex(&format!("/api/rides:page={i}"), 1, Bytes::from_static(b"[]"))
                .await
                .unwrap();
        }
        assert_eq!(store.stored().await, 1000);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(store.keys("/api/rides:*").await.unwrap().is_empty());
        assert_eq!(store.stored().await, 0);

        store
            .set_ex("/api/rides:all", 1, Bytes::from_static(b"[]"))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        store
            .set_ex("/api/profiles:all", 60, Bytes::from_static(b"[]"))
            .await
            .unwrap();
        assert_eq!(store.stored().await, 1);
    }
}
