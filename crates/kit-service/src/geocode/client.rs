//! 地理编码服务客户端
//!
//! 正向地理编码与海拔查询共用同一套重试策略：
//! HTTP 非成功状态立即失败；配额耗尽固定等待后在同一次调用内重试，
//! 预算用尽仍耗尽则返回 `QuotaExceeded`。

use async_trait::async_trait;
use kit_shared::config::GeocodeConfig;
use kit_shared::observability::metrics;
use kit_shared::retry::{RetryPolicy, retry_with_policy};
use reqwest::Url;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::query::GeocodeQuery;
use super::response::{
    Coordinates, ElevationResponse, GeocodeResponse, LookupFailure, LookupResult,
    classify_elevation, classify_geocode,
};

/// 地理编码服务抽象
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// 地址 -> 经纬度
    async fn forward_geocode(&self, query: &GeocodeQuery) -> LookupResult<Coordinates>;

    /// 经纬度 -> 海拔
    async fn elevation(&self, query: &GeocodeQuery) -> LookupResult<f64>;
}

/// 基于 HTTP 的地理编码客户端
pub struct GeocodeClient {
    http: reqwest::Client,
    config: GeocodeConfig,
    retry: RetryPolicy,
}

impl GeocodeClient {
    pub fn new(config: GeocodeConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let retry = RetryPolicy::fixed(config.max_attempts.max(1), config.quota_backoff());

        Ok(Self {
            http,
            config,
            retry,
        })
    }

    /// 发送一次请求并解码
    async fn fetch<R: DeserializeOwned>(&self, url: Url) -> Result<R, LookupFailure> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| LookupFailure::Transient(format!("请求失败: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LookupFailure::Transient(format!("HTTP 状态 {status}")));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| LookupFailure::Transient(format!("响应解码失败: {e}")))
    }

    async fn lookup<R, T>(
        &self,
        endpoint: &'static str,
        base: &str,
        query: &GeocodeQuery,
        classify: fn(R) -> Result<T, LookupFailure>,
    ) -> LookupResult<T>
    where
        R: DeserializeOwned,
    {
        let url = match query
            .clone()
            .with_key(self.config.api_key.as_deref())
            .to_url(base)
        {
            Ok(url) => url,
            Err(msg) => return LookupResult::TransientError(msg),
        };

        let result = retry_with_policy(
            &self.retry,
            endpoint,
            LookupFailure::is_retryable,
            || {
                let url = url.clone();
                async move {
                    let outcome = self.fetch::<R>(url).await.and_then(classify);
                    metrics::record_geocode_request(
                        endpoint,
                        outcome.as_ref().map_or_else(LookupFailure::outcome, |_| "found"),
                    );
                    outcome
                }
            },
        )
        .await;

        match &result {
            Ok(_) => debug!(endpoint, "地理编码查询成功"),
            Err(LookupFailure::OverQuota) => {
                warn!(endpoint, attempts = self.retry.max_attempts(), "服务商配额耗尽")
            }
            Err(e) => debug!(endpoint, error = %e, "地理编码查询失败"),
        }

        result.into()
    }
}

#[async_trait]
impl Geocoder for GeocodeClient {
    async fn forward_geocode(&self, query: &GeocodeQuery) -> LookupResult<Coordinates> {
        self.lookup::<GeocodeResponse, _>(
            "geocode",
            &self.config.geocode_url,
            query,
            classify_geocode,
        )
        .await
    }

    async fn elevation(&self, query: &GeocodeQuery) -> LookupResult<f64> {
        self.lookup::<ElevationResponse, _>(
            "elevation",
            &self.config.elevation_url,
            query,
            classify_elevation,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Login;
    use axum::extract::Query;
    use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use uuid::Uuid;

    /// 启动本地桩服务，返回基础地址
    async fn spawn_stub(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base: &str) -> GeocodeClient {
        GeocodeClient::new(GeocodeConfig {
            geocode_url: format!("{base}/geocode/json"),
            elevation_url: format!("{base}/elevation/json"),
            api_key: None,
            request_timeout_seconds: 5,
            max_attempts: 2,
            quota_backoff_ms: 0,
        })
        .unwrap()
    }

    fn address_query() -> GeocodeQuery {
        GeocodeQuery::address(&Login {
            id: Uuid::new_v4(),
            email: "geo@example.org".to_string(),
            name: None,
            address: None,
            city: Some("La Jolla".to_string()),
            state: Some("CA".to_string()),
            zip: Some("92093".to_string()),
            country: Some("USA".to_string()),
            latitude: None,
            longitude: None,
            elevation: None,
            cannot_geocode: None,
            created_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_forward_geocode_found() {
        let app = Router::new().route(
            "/geocode/json",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                if params.get("address").map(String::as_str) != Some("La Jolla CA 92093 USA")
                    || params.get("sensor").map(String::as_str) != Some("false")
                {
                    return Json(json!({"status": "ZERO_RESULTS", "results": []}));
                }
                Json(json!({
                    "status": "OK",
                    "results": [{"geometry": {"location": {"lat": 32.88, "lng": -117.23}}}]
                }))
            }),
        );
        let base = spawn_stub(app).await;

        let result = client(&base).forward_geocode(&address_query()).await;
        assert_eq!(
            result,
            LookupResult::Found(Coordinates {
                latitude: 32.88,
                longitude: -117.23
            })
        );
    }

    #[tokio::test]
    async fn test_over_quota_retries_then_gives_up() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/elevation/json",
            get(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Json(json!({"status": "OVER_QUERY_LIMIT", "results": []})) }
            }),
        );
        let base = spawn_stub(app).await;

        let result = client(&base)
            .elevation(&GeocodeQuery::elevation(32.88, -117.23))
            .await;
        assert_eq!(result, LookupResult::QuotaExceeded);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_over_quota_recovers_on_second_attempt() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/elevation/json",
            get(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Json(json!({"status": "OVER_QUERY_LIMIT", "results": []}))
                    } else {
                        Json(json!({"status": "OK", "results": [{"elevation": 104.5}]}))
                    }
                }
            }),
        );
        let base = spawn_stub(app).await;

        let result = client(&base)
            .elevation(&GeocodeQuery::elevation(32.88, -117.23))
            .await;
        assert_eq!(result, LookupResult::Found(104.5));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_http_error_is_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/geocode/json",
            get(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { StatusCode::SERVICE_UNAVAILABLE.into_response() }
            }),
        );
        let base = spawn_stub(app).await;

        let result = client(&base).forward_geocode(&address_query()).await;
        assert!(matches!(result, LookupResult::TransientError(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_results_is_not_found() {
        let app = Router::new().route(
            "/geocode/json",
            get(|| async { Json(json!({"status": "ZERO_RESULTS", "results": []})) }),
        );
        let base = spawn_stub(app).await;

        let result = client(&base).forward_geocode(&address_query()).await;
        assert_eq!(result, LookupResult::NotFound);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        // 绑定后立即释放端口，确保无人监听
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = client(&format!("http://{addr}"))
            .elevation(&GeocodeQuery::elevation(0.0, 0.0))
            .await;
        assert!(matches!(result, LookupResult::TransientError(_)));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_transient() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/geocode/json",
            get(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { "<html>maintenance</html>" }
            }),
        );
        let base = spawn_stub(app).await;

        let result = client(&base).forward_geocode(&address_query()).await;
        assert!(matches!(result, LookupResult::TransientError(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
