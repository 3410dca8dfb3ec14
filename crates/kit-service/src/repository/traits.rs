//! 仓储 Trait 定义
//!
//! 服务层只依赖 `KitStore` 抽象，PostgreSQL 与内存实现可互换

use std::collections::HashSet;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Barcode, BarcodeStatusUpdate, GeocodeUpdate, HandoutKit, Kit, KitDraft, Login, NewLogin,
};

/// 采样盒存储接口
///
/// 每个方法都是一个独立的原子操作；多步写入在实现内部用单个事务完成
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KitStore: Send + Sync {
    // 登录
    async fn ensure_login(&self, login: NewLogin) -> Result<Uuid>;
    async fn get_login(&self, login_id: Uuid) -> Result<Option<Login>>;

    // 采样盒编号
    /// 当前已分配的全部编号（已注册 + 预印）
    async fn all_kit_ids(&self) -> Result<HashSet<String>>;

    // 采样盒
    /// 批量新建预印采样盒
    ///
    /// 整批在同一事务内完成，任一失败则一个都不保存
    async fn create_handout_kits(&self, drafts: Vec<KitDraft>) -> Result<Vec<HandoutKit>>;
    async fn create_kit(&self, login_id: Uuid, draft: KitDraft) -> Result<Kit>;
    async fn get_kit(&self, supplied_kit_id: &str) -> Result<Option<Kit>>;
    /// 登录名下全部已注册采样盒，按创建时间排序
    async fn kits_by_login(&self, login_id: Uuid) -> Result<Vec<Kit>>;
    async fn get_handout_kit(&self, kit_id: &str) -> Result<Option<HandoutKit>>;
    /// 预印采样盒的密码哈希
    async fn handout_credentials(&self, kit_id: &str) -> Result<Option<String>>;
    async fn update_kit_password(&self, supplied_kit_id: &str, password_hash: &str) -> Result<()>;
    async fn update_handout_password(&self, kit_id: &str, password_hash: &str) -> Result<()>;
    async fn verify_kit(&self, supplied_kit_id: &str, verification_code: &str) -> Result<bool>;

    /// 将预印采样盒提升为绑定到 `login_id` 的已注册采样盒
    ///
    /// 预印采样盒已不存在时返回 `HandoutKitNotFound`
    async fn promote_handout_kit(&self, handout_id: &str, login_id: Uuid) -> Result<Kit>;

    // 条码
    async fn kit_barcodes(&self, supplied_kit_id: &str) -> Result<Vec<Barcode>>;
    async fn update_barcode_status(
        &self,
        barcode: &str,
        update: BarcodeStatusUpdate,
    ) -> Result<Barcode>;

    // 地理编码
    async fn logins_pending_geocode(&self, limit: Option<usize>) -> Result<Vec<Login>>;
    async fn logins_marked_unresolvable(&self) -> Result<Vec<Login>>;
    async fn clear_geocode_failure(&self, login_id: Uuid) -> Result<()>;
    async fn set_geocode_result(&self, login_id: Uuid, update: GeocodeUpdate) -> Result<()>;
}
