use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
}

/// 单个限流类别的窗口配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub window_secs: u64,
    pub max_requests: u32,
}

impl RateLimitRule {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub development: bool,
    pub disable_rate_limit: bool,
    pub trust_proxy_headers: bool,
    pub api_rate_limit: RateLimitRule,
    pub auth_rate_limit: RateLimitRule,
    pub cache_ttl_list_secs: u64,
    pub cache_ttl_item_secs: u64,
    pub session_cookie_name: String,
    pub session_ttl_secs: i64,
    pub metrics_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            redis_url: "redis://localhost:6379".into(),
            server_host: "0.0.0.0".into(),
            server_port: 3000,
            api_base_uri: "/api".into(),
            development: false,
            disable_rate_limit: false,
            trust_proxy_headers: false,
            api_rate_limit: RateLimitRule {
                window_secs: 15 * 60,
                max_requests: 100,
            },
            auth_rate_limit: RateLimitRule {
                window_secs: 15 * 60,
                max_requests: 5,
            },
            cache_ttl_list_secs: 60,
            cache_ttl_item_secs: 300,
            session_cookie_name: "better-auth.session_token".into(),
            session_ttl_secs: 60 * 60 * 24 * 7,
            metrics_path: "/metrics".into(),
        }
    }
}

// 解析失败时回退到默认值
fn parsed_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn flag(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let defaults = Config::default();

        Ok(Config {
            database_url: env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            server_host: env::var("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: parsed_or("SERVER_PORT", defaults.server_port),
            api_base_uri: env::var("API_BASE_URI").unwrap_or(defaults.api_base_uri),
            development: env::var("APP_ENV").map(|v| v == "development").unwrap_or(false),
            disable_rate_limit: flag("DISABLE_RATE_LIMIT"),
            trust_proxy_headers: flag("TRUST_PROXY_HEADERS"),
            api_rate_limit: RateLimitRule {
                window_secs: parsed_or("RATE_LIMIT_WINDOW", defaults.api_rate_limit.window_secs),
                max_requests: parsed_or("RATE_LIMIT_REQUESTS", defaults.api_rate_limit.max_requests),
            },
            auth_rate_limit: RateLimitRule {
                window_secs: parsed_or(
                    "AUTH_RATE_LIMIT_WINDOW",
                    defaults.auth_rate_limit.window_secs,
                ),
                max_requests: parsed_or(
                    "AUTH_RATE_LIMIT_REQUESTS",
                    defaults.auth_rate_limit.max_requests,
                ),
            },
            cache_ttl_list_secs: parsed_or("CACHE_TTL_LIST", defaults.cache_ttl_list_secs),
            cache_ttl_item_secs: parsed_or("CACHE_TTL_ITEM", defaults.cache_ttl_item_secs),
            session_cookie_name: env::var("SESSION_COOKIE_NAME")
                .unwrap_or(defaults.session_cookie_name),
            session_ttl_secs: parsed_or("SESSION_TTL", defaults.session_ttl_secs),
            metrics_path: env::var("METRICS_PATH").unwrap_or(defaults.metrics_path),
        })
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_ttl_secs)
    }
}
