//! 请求指标采集
//!
//! 使用独立的 `prometheus::Registry` 实例，在启动时创建一次并注入到各个中间件，
//! 不依赖全局默认 registry。路由标签取匹配到的路由模板，避免按 ID 无限增长。
//! Linux 上同一个 registry 里还会带上进程级的 CPU、内存与文件描述符指标。

use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

use crate::error::AppError;

pub const DURATION_BUCKETS: [f64; 8] = [0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0];

/// 进程指标的名称前缀，例如 `rideshare_process_cpu_seconds_total`
pub const PROCESS_METRICS_NAMESPACE: &str = "rideshare";

/// 未匹配任何路由时使用的标签值
pub const UNMATCHED_ROUTE: &str = "unmatched";

#[derive(Clone)]
pub struct MetricsRecorder {
    registry: Registry,
    request_duration: HistogramVec,
    rate_limit_hits: CounterVec,
    cache_operations: CounterVec,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "rideshare_http_request_duration_seconds",
                "Duration of HTTP requests in seconds",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["method", "route", "status_code"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        let rate_limit_hits = CounterVec::new(
            Opts::new(
                "rideshare_rate_limit_hits_total",
                "Total number of rate limit hits",
            ),
            &["type"],
        )?;
        registry.register(Box::new(rate_limit_hits.clone()))?;

        let cache_operations = CounterVec::new(
            Opts::new(
                "rideshare_cache_operations_total",
                "Total number of response cache operations",
            ),
            &["result"],
        )?;
        registry.register(Box::new(cache_operations.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::new(
                std::process::id() as i32,
                PROCESS_METRICS_NAMESPACE,
            ),
        ))?;

        Ok(Self {
            registry,
            request_duration,
            rate_limit_hits,
            cache_operations,
        })
    }

    pub fn observe(&self, method: &str, route: &str, status_code: u16, duration_secs: f64) {
        let status = status_code.to_string();
        self.request_duration
            .with_label_values(&[method, route, status.as_str()])
            .observe(duration_secs);
    }

    pub fn record_rate_limit_hit(&self, route_class: &str) {
        self.rate_limit_hits.with_label_values(&[route_class]).inc();
    }

    /// result 取值 hit / miss / set / error / invalidate
    pub fn record_cache(&self, result: &str) {
        self.cache_operations.with_label_values(&[result]).inc();
    }

    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }

    /// 以 Prometheus 文本格式导出
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// 覆盖认证、缓存和业务处理的完整耗时
pub async fn track_metrics(
    State(metrics): State<MetricsRecorder>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());

    let response = next.run(req).await;

    metrics.observe(
        &method,
        &route,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

pub async fn metrics_handler(State(metrics): State<MetricsRecorder>) -> Response {
    match metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, metrics.content_type())], body).into_response(),
        Err(e) => AppError::Internal(format!("failed to render metrics: {e}")).into_response(),
    }
}
