//! 采样盒与条码实体

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::SequencingStatus;

/// 已注册采样盒
///
/// 归属于唯一一个登录，条码集合与其他采样盒互不相交
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Kit {
    #[sqlx(rename = "ag_kit_id")]
    pub id: Uuid,
    #[sqlx(rename = "ag_login_id")]
    pub login_id: Uuid,
    pub supplied_kit_id: String,
    /// bcrypt 哈希
    #[serde(skip_serializing)]
    #[sqlx(rename = "kit_password")]
    pub password_hash: String,
    #[sqlx(rename = "kit_verification_code")]
    pub verification_code: String,
    pub swabs_per_kit: i64,
    pub kit_verified: bool,
    pub print_results: bool,
    pub created_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub barcodes: Vec<String>,
}

/// 预印采样盒（尚未被认领）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct HandoutKit {
    pub kit_id: String,
    #[serde(skip_serializing)]
    #[sqlx(rename = "password")]
    pub password_hash: String,
    pub verification_code: String,
    pub swabs_per_kit: i64,
    /// 打印状态，历史数据可能缺失
    pub print_results: Option<bool>,
    pub created_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub barcodes: Vec<String>,
}

/// 新建采样盒的参数
///
/// 标识符和条码由存储层在同一事务内分配
#[derive(Debug, Clone)]
pub struct KitDraft {
    pub password_hash: String,
    pub verification_code: String,
    pub swabs_per_kit: u32,
    pub print_results: bool,
    pub kit_id_length: usize,
    pub barcode_width: usize,
}

/// 条码
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Barcode {
    pub barcode: String,
    pub create_date_time: DateTime<Utc>,
    pub status: Option<String>,
    pub scan_date: Option<NaiveDate>,
    pub sample_postmark_date: Option<NaiveDate>,
    pub biomass_remaining: Option<bool>,
    pub sequencing_status: SequencingStatus,
    pub obsolete: bool,
}

impl Barcode {
    pub fn new(barcode: String) -> Self {
        Self {
            barcode,
            create_date_time: Utc::now(),
            status: None,
            scan_date: None,
            sample_postmark_date: None,
            biomass_remaining: None,
            sequencing_status: SequencingStatus::Waiting,
            obsolete: false,
        }
    }

    /// 应用实验室状态更新
    ///
    /// 只有 `Some` 的字段会覆盖原值
    pub fn apply(&mut self, update: &BarcodeStatusUpdate) {
        if let Some(status) = &update.status {
            self.status = Some(status.clone());
        }
        if update.scan_date.is_some() {
            self.scan_date = update.scan_date;
        }
        if update.sample_postmark_date.is_some() {
            self.sample_postmark_date = update.sample_postmark_date;
        }
        if update.biomass_remaining.is_some() {
            self.biomass_remaining = update.biomass_remaining;
        }
        if let Some(next) = update.sequencing_status {
            self.sequencing_status = next;
        }
        if let Some(obsolete) = update.obsolete {
            self.obsolete = obsolete;
        }
    }
}

/// 条码状态更新（由实验室流程驱动）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BarcodeStatusUpdate {
    pub status: Option<String>,
    pub scan_date: Option<NaiveDate>,
    pub sample_postmark_date: Option<NaiveDate>,
    pub biomass_remaining: Option<bool>,
    pub sequencing_status: Option<SequencingStatus>,
    pub obsolete: Option<bool>,
}

/// 新建采样盒后一次性返回的明文凭据，用于打印
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KitCredentials {
    pub kit_id: String,
    pub password: String,
    pub verification_code: String,
    pub barcodes: Vec<String>,
}
