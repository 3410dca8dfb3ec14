//! 服务商响应解析与分类
//!
//! 响应结构：`status` 字段、`results` 列表、嵌套的坐标或海拔字段。
//! `OVER_QUERY_LIMIT` 是配额耗尽信号。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 服务商的配额耗尽状态值
pub const OVER_QUERY_LIMIT: &str = "OVER_QUERY_LIMIT";

/// 经纬度
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// 一次查询的最终结果
#[derive(Debug, Clone, PartialEq)]
pub enum LookupResult<T> {
    Found(T),
    /// 服务商明确返回零条结果
    NotFound,
    /// HTTP 非成功状态、网络错误或响应结构异常
    TransientError(String),
    /// 重试预算用尽后仍处于配额耗尽状态
    QuotaExceeded,
}

/// 单次请求的失败分类
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LookupFailure {
    #[error("服务商配额耗尽")]
    OverQuota,
    #[error("无结果")]
    NotFound,
    #[error("{0}")]
    Transient(String),
}

impl LookupFailure {
    /// 只有配额耗尽会在同一次调用内重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OverQuota)
    }

    /// 指标标签
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::OverQuota => "over_quota",
            Self::NotFound => "not_found",
            Self::Transient(_) => "error",
        }
    }
}

impl<T> From<std::result::Result<T, LookupFailure>> for LookupResult<T> {
    fn from(result: std::result::Result<T, LookupFailure>) -> Self {
        match result {
            Ok(value) => Self::Found(value),
            Err(LookupFailure::OverQuota) => Self::QuotaExceeded,
            Err(LookupFailure::NotFound) => Self::NotFound,
            Err(LookupFailure::Transient(msg)) => Self::TransientError(msg),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GeocodeResponse {
    pub status: Option<String>,
    pub results: Option<Vec<GeocodeResultItem>>,
}

#[derive(Debug, Deserialize)]
pub struct GeocodeResultItem {
    pub geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
pub struct Geometry {
    pub location: Option<Location>,
}

#[derive(Debug, Deserialize)]
pub struct Location {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ElevationResponse {
    pub status: Option<String>,
    pub results: Option<Vec<ElevationResultItem>>,
}

#[derive(Debug, Deserialize)]
pub struct ElevationResultItem {
    pub elevation: Option<f64>,
}

/// 配额与结果列表的公共检查，返回第一条结果
fn first_result<T>(status: Option<&str>, results: Option<Vec<T>>) -> Result<T, LookupFailure> {
    if status == Some(OVER_QUERY_LIMIT) {
        return Err(LookupFailure::OverQuota);
    }

    let results = results
        .ok_or_else(|| LookupFailure::Transient("响应缺少 results 字段".to_string()))?;

    results.into_iter().next().ok_or(LookupFailure::NotFound)
}

pub fn classify_geocode(response: GeocodeResponse) -> Result<Coordinates, LookupFailure> {
    let first = first_result(response.status.as_deref(), response.results)?;

    let location = first.geometry.and_then(|g| g.location);
    match location {
        Some(Location {
            lat: Some(latitude),
            lng: Some(longitude),
        }) => Ok(Coordinates {
            latitude,
            longitude,
        }),
        _ => Err(LookupFailure::Transient(
            "结果缺少 geometry.location 坐标".to_string(),
        )),
    }
}

pub fn classify_elevation(response: ElevationResponse) -> Result<f64, LookupFailure> {
    let first = first_result(response.status.as_deref(), response.results)?;

    first
        .elevation
        .ok_or_else(|| LookupFailure::Transient("结果缺少 elevation 字段".to_string()))
}
