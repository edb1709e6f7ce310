use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::Script;
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

use crate::{
    cache::operations::RedisConnection,
    config::{Config, RateLimitRule},
    error::AppError,
    middleware::metrics::MetricsRecorder,
};

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Api,
    /// 登录注册等敏感路由，成功的请求不计数
    Auth,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Api => "api",
            RouteClass::Auth => "auth",
        }
    }

    fn rejection_message(&self) -> &'static str {
        match self {
            RouteClass::Api => "Too many requests, try again later",
            RouteClass::Auth => "Too many attempts, try again later",
        }
    }
}

/// 一次计数后的窗口状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowState {
    pub count: u32,
    pub admitted: bool,
    pub resets_in: Duration,
    /// 本次计数所在窗口的标识，撤销计数时用它确认窗口没有翻过
    pub window_id: String,
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// 原子地检查并递增：计数未达上限时 +1 并放行，否则拒绝且不递增
    async fn hit(&self, key: &str, limit: u32, window: Duration)
    -> Result<WindowState, CounterError>;

    /// 撤销一次计数，不会低于 0；窗口已经换过时什么也不做
    async fn release(&self, key: &str, window_id: &str) -> Result<(), CounterError>;
}

// 单次往返完成检查、递增与设置过期；新窗口记下调用方给的标识
const HIT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    redis.call('HSET', KEYS[1], 'count', 0, 'window', ARGV[3])
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
local current = tonumber(redis.call('HGET', KEYS[1], 'count'))
local window = redis.call('HGET', KEYS[1], 'window')
local admitted = 0
if current < tonumber(ARGV[1]) then
    current = redis.call('HINCRBY', KEYS[1], 'count', 1)
    admitted = 1
end
return {current, admitted, redis.call('PTTL', KEYS[1]), window}
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'window') ~= ARGV[1] then
    return 0
end
local current = tonumber(redis.call('HGET', KEYS[1], 'count') or '0')
if current > 0 then
    return redis.call('HINCRBY', KEYS[1], 'count', -1)
end
return 0
"#;

pub struct RedisCounterStore {
    redis: RedisConnection,
    hit_script: Script,
    release_script: Script,
}

impl RedisCounterStore {
    pub fn new(redis: RedisConnection) -> Self {
        Self {
            redis,
            hit_script: Script::new(HIT_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn hit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<WindowState, CounterError> {
        let mut conn = self.redis.get().await?;
        let (count, admitted, pttl, window_id): (i64, i64, i64, String) = self
            .hit_script
            .key(key)
            .arg(limit)
            .arg(window.as_millis() as u64)
            .arg(Uuid::new_v4().to_string())
            .invoke_async(&mut conn)
            .await?;

        Ok(WindowState {
            count: count.max(0) as u32,
            admitted: admitted == 1,
            resets_in: Duration::from_millis(pttl.max(0) as u64),
            window_id,
        })
    }

    async fn release(&self, key: &str, window_id: &str) -> Result<(), CounterError> {
        let mut conn = self.redis.get().await?;
        let _: i64 = self
            .release_script
            .key(key)
            .arg(window_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}

// 过期窗口的清扫间隔
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Window {
    id: u64,
    count: u32,
    started_at: Instant,
    length: Duration,
}

impl Window {
    fn is_over(&self, now: Instant) -> bool {
        now >= self.started_at + self.length
    }
}

struct Windows {
    by_key: HashMap<String, Window>,
    next_id: u64,
    last_sweep: Instant,
}

/// 进程内固定窗口计数；锁内不跨越 await，递增不可被打断
pub struct MemoryCounterStore {
    windows: Mutex<Windows>,
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self {
            windows: Mutex::new(Windows {
                by_key: HashMap::new(),
                next_id: 0,
                last_sweep: Instant::now(),
            }),
        }
    }
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前保存的窗口数，包括已结束但尚未清扫的
    pub fn tracked(&self) -> usize {
        self.windows.lock().map(|w| w.by_key.len()).unwrap_or_default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn hit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<WindowState, CounterError> {
        let now = Instant::now();
        let mut windows = self
            .windows
            .lock()
            .map_err(|e| CounterError::Unavailable(e.to_string()))?;

        if now >= windows.last_sweep + SWEEP_INTERVAL {
            windows.by_key.retain(|_, w| !w.is_over(now));
            windows.last_sweep = now;
        }

        let Windows { by_key, next_id, .. } = &mut *windows;
        let entry = by_key.entry(key.to_string()).or_insert_with(|| {
            *next_id += 1;
            Window {
                id: *next_id,
                count: 0,
                started_at: now,
                length: window,
            }
        });
        if entry.is_over(now) {
            *next_id += 1;
            *entry = Window {
                id: *next_id,
                count: 0,
                started_at: now,
                length: window,
            };
        }

        let admitted = entry.count < limit;
        if admitted {
            entry.count += 1;
        }

        Ok(WindowState {
            count: entry.count,
            admitted,
            resets_in: (entry.started_at + entry.length).saturating_duration_since(now),
            window_id: entry.id.to_string(),
        })
    }

    async fn release(&self, key: &str, window_id: &str) -> Result<(), CounterError> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|e| CounterError::Unavailable(e.to_string()))?;
        if let Some(entry) = windows.by_key.get_mut(key) {
            if entry.id.to_string() == window_id {
                entry.count = entry.count.saturating_sub(1);
            }
        }
        Ok(())
    }
}

/// 用于 RateLimit-* 响应头的额度快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quota {
    pub limit: u32,
    pub remaining: u32,
    pub resets_in: Duration,
    /// 计数所在的窗口
    pub window_id: String,
}

impl Quota {
    /// 已有更内层（更严格）类别写入的头时保留原值
    fn write_headers(&self, headers: &mut HeaderMap) {
        if headers.contains_key("ratelimit-limit") {
            return;
        }
        headers.insert("ratelimit-limit", HeaderValue::from(self.limit));
        headers.insert("ratelimit-remaining", HeaderValue::from(self.remaining));
        headers.insert("ratelimit-reset", HeaderValue::from(ceil_secs(self.resets_in)));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// 关闭限流或计数后端不可用时 quota 为 None
    Admitted(Option<Quota>),
    Rejected { retry_after: Duration, quota: Quota },
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    metrics: MetricsRecorder,
    api: RateLimitRule,
    auth: RateLimitRule,
    disabled: bool,
    trust_proxy_headers: bool,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, metrics: MetricsRecorder, config: &Config) -> Self {
        Self {
            store,
            metrics,
            api: config.api_rate_limit,
            auth: config.auth_rate_limit,
            disabled: config.disable_rate_limit,
            trust_proxy_headers: config.trust_proxy_headers,
        }
    }

    fn rule(&self, class: RouteClass) -> RateLimitRule {
        match class {
            RouteClass::Api => self.api,
            RouteClass::Auth => self.auth,
        }
    }

    fn counter_key(client: &str, class: RouteClass) -> String {
        format!("rate_limit:{}:{}", class.as_str(), client)
    }

    pub async fn admit(&self, client: &str, class: RouteClass) -> Admission {
        if self.disabled {
            return Admission::Admitted(None);
        }

        let rule = self.rule(class);
        let key = Self::counter_key(client, class);

        match self.store.hit(&key, rule.max_requests, rule.window()).await {
            Ok(state) => {
                let quota = Quota {
                    limit: rule.max_requests,
                    remaining: rule.max_requests.saturating_sub(state.count),
                    resets_in: state.resets_in,
                    window_id: state.window_id,
                };
                if state.admitted {
                    Admission::Admitted(Some(quota))
                } else {
                    self.metrics.record_rate_limit_hit(class.as_str());
                    Admission::Rejected {
                        retry_after: state.resets_in,
                        quota,
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Rate limit store error - admitting request");
                Admission::Admitted(None)
            }
        }
    }

    /// 撤销一次已放行请求的计数，只作用于放行时所在的窗口
    pub async fn release(&self, client: &str, class: RouteClass, quota: &Quota) {
        if self.disabled {
            return;
        }
        let key = Self::counter_key(client, class);
        if let Err(e) = self.store.release(&key, &quota.window_id).await {
            tracing::warn!(error = %e, key = %key, "Failed to release rate limit slot");
        }
    }

    /// 默认使用连接的对端地址；开启 TRUST_PROXY_HEADERS 后优先取代理头
    pub fn client_identifier(&self, req: &Request<Body>) -> String {
        let remote_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string());

        let forwarded = if self.trust_proxy_headers {
            req.headers()
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .or_else(|| {
                    req.headers()
                        .get("x-forwarded-for")
                        .and_then(|h| h.to_str().ok())
                        .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
                })
                .map(|ip| ip.trim().to_string())
        } else {
            None
        };

        forwarded
            .or(remote_ip)
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub async fn check_rate_limit(&self, class: RouteClass, req: Request<Body>, next: Next) -> Response {
        let client = self.client_identifier(&req);

        let quota = match self.admit(&client, class).await {
            Admission::Admitted(quota) => quota,
            Admission::Rejected { retry_after, quota } => {
                tracing::warn!(client = %client, class = class.as_str(), "Rate limit exceeded");
                let mut response = AppError::RateLimited {
                    retry_after: ceil_secs(retry_after),
                    message: class.rejection_message().to_string(),
                }
                .into_response();
                quota.write_headers(response.headers_mut());
                return response;
            }
        };

        let mut response = next.run(req).await;

        if let Some(quota) = quota {
            if class == RouteClass::Auth && response.status().as_u16() < 400 {
                self.release(&client, class, &quota).await;
            }
            quota.write_headers(response.headers_mut());
        }
        response
    }
}

/// 挂到路由上的限流状态：限流器与路由类别
#[derive(Clone)]
pub struct RateLimitGuard {
    pub limiter: Arc<RateLimiter>,
    pub class: RouteClass,
}

impl RateLimitGuard {
    pub fn new(limiter: Arc<RateLimiter>, class: RouteClass) -> Self {
        Self { limiter, class }
    }
}

pub async fn rate_limit(
    State(guard): State<RateLimitGuard>,
    req: Request<Body>,
    next: Next,
) -> Response {
    guard.limiter.check_rate_limit(guard.class, req, next).await
}
