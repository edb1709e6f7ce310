use axum::body::Bytes;

use crate::cache::operations::CacheError;

/// 一次缓存查询的结果，后端异常作为独立分支返回，由调用方决定降级
#[derive(Debug)]
pub enum CacheLookup {
    Hit(Bytes),
    Miss,
    BackendError(CacheError),
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }
}

/// 模式失效的统计，部分失败时 `failed_patterns` 非空
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InvalidationReport {
    pub deleted: u64,
    pub failed_patterns: Vec<String>,
}
