mod auth;
mod cache;
mod context;
mod error_handler;
mod logger;
pub mod metrics;
mod rate_limit;

pub use auth::{
    AuthFailure, Identity, PgSessionStore, SessionAuthenticator, SessionRecord, SessionStore,
    require_auth,
};
pub use cache::{CACHE_STATUS_HEADER, CachePolicy, InvalidationPolicy, cache_aside, invalidate_on_success};
pub use context::RequestContext;
pub use error_handler::log_errors;
pub use logger::{REQUEST_ID_HEADER, request_logger};
pub use metrics::{MetricsRecorder, metrics_handler, track_metrics};
pub use rate_limit::{
    Admission, CounterError, CounterStore, MemoryCounterStore, Quota, RateLimitGuard, RateLimiter,
    RedisCounterStore, RouteClass, WindowState, rate_limit,
};
