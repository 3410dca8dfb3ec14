//! 采样盒发放服务
//!
//! 负责：
//! - 预印采样盒的批量生成（明文凭据仅返回一次用于打印）
//! - 预印采样盒认领（提升为已注册采样盒）
//! - 直接为登录注册新采样盒
//! - 预印采样盒密码校验与已注册采样盒验证码校验
//! - 采样盒密码修改
//!
//! 新建采样盒时若标识符冲突，按重试策略重新生成后再试。
//! 批量生成是一个整体：失败时一个采样盒都不保存，避免留下无人知道明文密码的采样盒

use std::sync::Arc;

use kit_shared::config::ProvisioningConfig;
use kit_shared::observability::metrics;
use kit_shared::retry::{RetryPolicy, retry_with_policy};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{KitError, Result};
use crate::identifier;
use crate::models::{Kit, KitCredentials, KitDraft};
use crate::repository::KitStore;

/// 采样盒发放服务
pub struct ProvisioningWorkflow<S: KitStore> {
    store: Arc<S>,
    config: ProvisioningConfig,
    retry: RetryPolicy,
}

impl<S: KitStore> ProvisioningWorkflow<S> {
    pub fn new(store: Arc<S>, config: ProvisioningConfig) -> Self {
        let retry = RetryPolicy::immediate(config.max_collision_retries);
        Self {
            store,
            config,
            retry,
        }
    }

    /// 认领预印采样盒
    ///
    /// 同一 `handout_id` 只有第一次调用成功，之后都返回 `AlreadyClaimed`
    #[instrument(skip(self), fields(login_id = %login_id))]
    pub async fn claim_handout_kit(&self, handout_id: &str, login_id: Uuid) -> Result<Kit> {
        match self.store.promote_handout_kit(handout_id, login_id).await {
            Ok(kit) => {
                metrics::record_kit_promotion("success");
                info!(
                    supplied_kit_id = %kit.supplied_kit_id,
                    barcodes = kit.barcodes.len(),
                    "采样盒认领成功"
                );
                Ok(kit)
            }
            Err(KitError::HandoutKitNotFound(id)) => {
                metrics::record_kit_promotion("already_claimed");
                warn!(handout_id = %id, "预印采样盒已被认领或不存在");
                Err(KitError::AlreadyClaimed(id))
            }
            Err(e) => {
                metrics::record_kit_promotion("error");
                Err(e)
            }
        }
    }

    /// 批量生成预印采样盒
    #[instrument(skip(self))]
    pub async fn create_handout_kits(
        &self,
        count: usize,
        swabs_per_kit: Option<u32>,
        print_results: bool,
    ) -> Result<Vec<KitCredentials>> {
        if count == 0 {
            return Err(KitError::Validation("生成数量必须大于 0".to_string()));
        }

        let mut drafts = Vec::with_capacity(count);
        let mut passwords = Vec::with_capacity(count);
        for _ in 0..count {
            let (draft, password) = self.new_draft(swabs_per_kit, print_results).await?;
            drafts.push(draft);
            passwords.push(password);
        }

        let handouts = retry_with_policy(
            &self.retry,
            "create_handout_kits",
            KitError::is_retryable,
            || self.store.create_handout_kits(drafts.clone()),
        )
        .await?;

        let printed: Vec<KitCredentials> = handouts
            .into_iter()
            .zip(passwords)
            .map(|(handout, password)| KitCredentials {
                kit_id: handout.kit_id,
                password,
                verification_code: handout.verification_code,
                barcodes: handout.barcodes,
            })
            .collect();

        metrics::record_kit_provisioned("handout", printed.len() as u64);
        info!(count = printed.len(), "预印采样盒批量生成完成");
        Ok(printed)
    }

    /// 为登录直接注册一个新采样盒
    #[instrument(skip(self), fields(login_id = %login_id))]
    pub async fn register_new_kit(
        &self,
        login_id: Uuid,
        swabs_per_kit: Option<u32>,
    ) -> Result<(Kit, KitCredentials)> {
        let (draft, password) = self.new_draft(swabs_per_kit, false).await?;
        let kit = retry_with_policy(
            &self.retry,
            "create_kit",
            KitError::is_retryable,
            || self.store.create_kit(login_id, draft.clone()),
        )
        .await?;

        metrics::record_kit_provisioned("registered", 1);
        let credentials = KitCredentials {
            kit_id: kit.supplied_kit_id.clone(),
            password,
            verification_code: kit.verification_code.clone(),
            barcodes: kit.barcodes.clone(),
        };
        Ok((kit, credentials))
    }

    /// 校验预印采样盒密码
    ///
    /// 采样盒不存在时返回 false，不区分"不存在"与"密码错误"
    pub async fn check_handout_credentials(&self, kit_id: &str, password: &str) -> Result<bool> {
        let Some(hash) = self.store.handout_credentials(kit_id).await? else {
            return Ok(false);
        };

        let password = password.to_string();
        let valid = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| KitError::Internal(format!("密码校验任务失败: {e}")))??;
        Ok(valid)
    }

    /// 修改已注册采样盒的密码
    #[instrument(skip(self, new_password))]
    pub async fn change_kit_password(&self, supplied_kit_id: &str, new_password: &str) -> Result<()> {
        let hash = self.hash_password(new_password).await?;
        self.store.update_kit_password(supplied_kit_id, &hash).await
    }

    /// 修改预印采样盒的密码
    #[instrument(skip(self, new_password))]
    pub async fn change_handout_password(&self, kit_id: &str, new_password: &str) -> Result<()> {
        let hash = self.hash_password(new_password).await?;
        self.store.update_handout_password(kit_id, &hash).await
    }

    /// 登录名下的全部采样盒
    pub async fn kits_for_login(&self, login_id: Uuid) -> Result<Vec<Kit>> {
        self.store.kits_by_login(login_id).await
    }

    /// 校验已注册采样盒的验证码并标记为已验证
    pub async fn verify_kit(&self, supplied_kit_id: &str, verification_code: &str) -> Result<()> {
        if self.store.verify_kit(supplied_kit_id, verification_code).await? {
            info!(supplied_kit_id, "采样盒已验证");
            Ok(())
        } else {
            Err(KitError::VerificationCodeMismatch(supplied_kit_id.to_string()))
        }
    }

    /// 生成新采样盒的凭据，返回草稿与明文密码
    async fn new_draft(
        &self,
        swabs_per_kit: Option<u32>,
        print_results: bool,
    ) -> Result<(KitDraft, String)> {
        let swabs_per_kit = swabs_per_kit.unwrap_or(self.config.swabs_per_kit);
        if swabs_per_kit == 0 {
            return Err(KitError::Validation("每盒拭子数必须大于 0".to_string()));
        }

        let password = identifier::generate_password(self.config.password_length);
        let password_hash = self.hash_password(&password).await?;

        let draft = KitDraft {
            password_hash,
            verification_code: identifier::generate_verification_code(
                self.config.verification_code_length,
            ),
            swabs_per_kit,
            print_results,
            kit_id_length: self.config.kit_id_length,
            barcode_width: self.config.barcode_width,
        };
        Ok((draft, password))
    }

    async fn hash_password(&self, password: &str) -> Result<String> {
        if password.is_empty() {
            return Err(KitError::Validation("密码不能为空".to_string()));
        }

        let cost = self.config.bcrypt_cost;
        let plain = password.to_string();
        let hash = tokio::task::spawn_blocking(move || bcrypt::hash(plain, cost))
            .await
            .map_err(|e| KitError::Internal(format!("密码哈希任务失败: {e}")))??;
        Ok(hash)
    }
}
