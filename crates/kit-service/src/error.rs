//! 采样盒服务错误类型
//!
//! 定义服务层的业务错误和系统错误

use thiserror::Error;
use uuid::Uuid;

use crate::models::SequencingStatus;

/// 采样盒服务错误类型
#[derive(Debug, Error)]
pub enum KitError {
    // === 采样盒相关错误 ===
    /// 存储层的认领冲突：预印采样盒已不存在（已被认领或从未存在）
    #[error("预印采样盒不存在或已被认领: {0}")]
    HandoutKitNotFound(String),

    /// 面向用户的"已注册"错误，由认领流程从 `HandoutKitNotFound` 转换而来
    #[error("采样盒已被注册: {0}")]
    AlreadyClaimed(String),

    #[error("采样盒不存在: {0}")]
    KitNotFound(String),

    #[error("验证码不匹配: supplied_kit_id={0}")]
    VerificationCodeMismatch(String),

    /// 生成的标识符在插入时与已有记录冲突，可重新生成后重试
    #[error("标识符冲突: {0}")]
    IdentifierCollision(String),

    // === 登录相关错误 ===
    #[error("登录不存在: {0}")]
    LoginNotFound(Uuid),

    // === 条码相关错误 ===
    #[error("条码不存在: {0}")]
    BarcodeNotFound(String),

    #[error("测序状态不允许变更: barcode={barcode}, {from:?} -> {to:?}")]
    InvalidStatusTransition {
        barcode: String,
        from: SequencingStatus,
        to: SequencingStatus,
    },

    // === 地理编码相关错误 ===
    /// 服务商当日配额耗尽，整批运行中止
    #[error("地理编码配额已耗尽: 已尝试 {attempted} 条, 成功 {resolved} 条")]
    QuotaExceeded { attempted: usize, resolved: usize },

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("密码哈希失败: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 采样盒服务 Result 类型别名
pub type Result<T> = std::result::Result<T, KitError>;

impl KitError {
    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::IdentifierCollision(_))
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_) | Self::PasswordHash(_) | Self::Internal(_)
        )
    }

    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::HandoutKitNotFound(_) => "HANDOUT_KIT_NOT_FOUND",
            Self::AlreadyClaimed(_) => "ALREADY_CLAIMED",
            Self::KitNotFound(_) => "KIT_NOT_FOUND",
            Self::VerificationCodeMismatch(_) => "VERIFICATION_CODE_MISMATCH",
            Self::IdentifierCollision(_) => "IDENTIFIER_COLLISION",
            Self::LoginNotFound(_) => "LOGIN_NOT_FOUND",
            Self::BarcodeNotFound(_) => "BARCODE_NOT_FOUND",
            Self::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            Self::QuotaExceeded { .. } => "GEOCODE_QUOTA_EXCEEDED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::PasswordHash(_) => "PASSWORD_HASH_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// PostgreSQL 唯一约束冲突
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

/// PostgreSQL 可串行化事务冲突（SQLSTATE 40001）
pub(crate) fn is_serialization_failure(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "40001")
}
