//! 参与者登录实体
//!
//! 包含邮寄地址与地理编码结果

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::GeocodeState;

/// 参与者登录
///
/// 首次注册时创建，由地址补全批处理更新坐标，核心流程从不删除
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Login {
    #[sqlx(rename = "ag_login_id")]
    pub id: Uuid,
    /// 邮箱（小写存储，大小写不敏感唯一）
    pub email: String,
    pub name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
    /// 永久失败标记（`None` 与 `Some(false)` 均视为未设置）
    pub cannot_geocode: Option<bool>,
    pub created_at: DateTime<Utc>,
}

impl Login {
    /// 推导当前地理编码状态
    pub fn geocode_state(&self) -> GeocodeState {
        if self.cannot_geocode == Some(true) {
            GeocodeState::Unresolvable
        } else if self.latitude.is_some() && self.longitude.is_some() && self.elevation.is_some()
        {
            GeocodeState::Resolved
        } else {
            GeocodeState::Pending
        }
    }

    /// 是否等待地理编码
    pub fn is_pending_geocode(&self) -> bool {
        self.latitude.is_none()
            && self.longitude.is_none()
            && self.elevation.is_none()
            && self.cannot_geocode != Some(true)
    }

    /// 已补全的坐标
    pub fn geo_point(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude, self.elevation) {
            (Some(latitude), Some(longitude), Some(elevation)) => Some(GeoPoint {
                latitude,
                longitude,
                elevation,
            }),
            _ => None,
        }
    }
}

/// 新建登录请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLogin {
    pub email: String,
    pub name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub country: Option<String>,
}

impl NewLogin {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Default::default()
        }
    }

    pub fn with_address(
        mut self,
        city: impl Into<String>,
        state: impl Into<String>,
        zip: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        self.city = Some(city.into());
        self.state = Some(state.into());
        self.zip = Some(zip.into());
        self.country = Some(country.into());
        self
    }

    /// 规范化后的邮箱：去首尾空白并转小写
    pub fn normalized_email(&self) -> String {
        normalize_email(&self.email)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// 完整的地理坐标（经纬度 + 海拔）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
}

/// 地理编码结果写入
///
/// 只有两种合法终态，不存在"部分坐标"或"有坐标又标记失败"的写法
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeocodeUpdate {
    Resolved(GeoPoint),
    Unresolvable,
}
