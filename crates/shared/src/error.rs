//! 基础设施错误类型
//!
//! 只覆盖启动阶段（配置、连接池、可观测性）的失败，业务错误由各服务自行定义。

use thiserror::Error;

/// 基础设施错误
#[derive(Debug, Error)]
pub enum SharedError {
    #[error("配置加载失败: {0}")]
    Config(#[from] config::ConfigError),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库迁移失败: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("可观测性初始化失败: {0}")]
    Observability(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, SharedError>;

impl SharedError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Migration(_) => "MIGRATION_ERROR",
            Self::Observability(_) => "OBSERVABILITY_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 只有连接池层面的瞬时故障值得重试，配置错误重试也不会变好
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(sqlx::Error::PoolTimedOut) | Self::Database(sqlx::Error::Io(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = SharedError::Observability("recorder already installed".to_string());
        assert_eq!(err.code(), "OBSERVABILITY_ERROR");
    }

    #[test]
    fn test_is_retryable() {
        assert!(SharedError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!SharedError::Database(sqlx::Error::RowNotFound).is_retryable());
        assert!(!SharedError::Observability("x".to_string()).is_retryable());
    }
}
