//! telemetry - 日志与指标初始化

use std::net::{Ipv4Addr, SocketAddr};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use twinguard_errors::{AppError, AppResult};

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

/// 初始化 tracing
pub fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// 初始化 JSON 格式的 tracing（生产环境）
pub fn init_tracing_json(log_level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// 按运行环境选择日志格式
pub fn init_tracing_for_env(app_env: &str, log_level: &str) {
    if app_env == "production" {
        init_tracing_json(log_level);
    } else {
        init_tracing(log_level);
    }
}

/// 安装 Prometheus recorder
///
/// 给出端口时同时启动 `/metrics` 抓取端点（需要在 tokio runtime 内调用）
pub fn init_metrics(port: Option<u16>) -> AppResult<Option<PrometheusHandle>> {
    let result = match port {
        Some(port) => PrometheusBuilder::new()
            .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
            .install()
            .map(|_| None),
        None => PrometheusBuilder::new().install_recorder().map(Some),
    };

    let handle = result
        .map_err(|e| AppError::internal(format!("Failed to install Prometheus recorder: {}", e)))?;
    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    metrics::describe_counter!(
        "cache_requests_total",
        "Cache lookups, labelled by cache and hit/miss"
    );
    metrics::describe_counter!(
        "cache_loads_total",
        "Cache loader completions, labelled by cache and outcome"
    );
    metrics::describe_counter!(
        "cache_invalidations_total",
        "Explicit cache invalidations, labelled by cache"
    );
    metrics::describe_counter!(
        "policy_events_received_total",
        "Policy events consumed by the cache updater"
    );
}
