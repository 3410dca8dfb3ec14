//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::ObservabilityConfig;
use crate::error::{Result, SharedError};

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| SharedError::Observability(e.to_string()))?;

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册指标描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("kit_promotions_total", "Handout kit promotions by result");
    metrics::describe_counter!("kit_provisioned_total", "Kits created (handout or registered)");
    metrics::describe_counter!(
        "geocode_requests_total",
        "Geocoding provider calls by endpoint and outcome"
    );
    metrics::describe_counter!(
        "geocode_logins_total",
        "Logins processed by the enrichment run, by outcome"
    );
    metrics::describe_counter!("geocode_runs_total", "Enrichment runs by outcome");

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| SharedError::Observability(e.to_string()))?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录一次采样盒认领
#[inline]
pub fn record_kit_promotion(result: &'static str) {
    metrics::counter!("kit_promotions_total", "result" => result).increment(1);
}

/// 记录新建采样盒
#[inline]
pub fn record_kit_provisioned(kind: &'static str, count: u64) {
    metrics::counter!("kit_provisioned_total", "kind" => kind).increment(count);
}

/// 记录一次地理编码服务调用
#[inline]
pub fn record_geocode_request(endpoint: &'static str, outcome: &'static str) {
    metrics::counter!(
        "geocode_requests_total",
        "endpoint" => endpoint,
        "outcome" => outcome
    )
    .increment(1);
}

/// 记录一条登录的补全结果
#[inline]
pub fn record_geocode_login(outcome: &'static str) {
    metrics::counter!("geocode_logins_total", "outcome" => outcome).increment(1);
}

/// 记录一次补全运行的结束方式
#[inline]
pub fn record_geocode_run(outcome: &'static str) {
    metrics::counter!("geocode_runs_total", "outcome" => outcome).increment(1);
}
