//! 采样盒门户命令行入口
//!
//! 启动流程：加载配置 -> 初始化日志与指标 -> 连接数据库 -> 执行子命令

use std::time::Duration;

use clap::Parser;
use kit_provisioning::KitError;
use kit_provisioning::cli::{Cli, CommandRunner};
use kit_shared::config::AppConfig;
use kit_shared::database::Database;
use kit_shared::error::SharedError;
use kit_shared::observability;
use kit_shared::retry::{RetryPolicy, retry_with_policy};
use tracing::{error, info};

/// 配额耗尽的退出码，调度方据此区分"稍后重试"与其他失败
const EXIT_QUOTA_EXCEEDED: i32 = 2;

/// 数据库连接尝试次数
const CONNECT_ATTEMPTS: u32 = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load("kit-portal")?;
    let _guard = observability::init(
        &config
            .observability
            .clone()
            .with_service_name(&config.service_name),
    )
    .await?;

    info!(environment = %config.environment, "配置已加载");

    let database = retry_with_policy(
        &RetryPolicy::fixed(CONNECT_ATTEMPTS, Duration::from_secs(2)),
        "connect_database",
        SharedError::is_retryable,
        || Database::connect(&config.database),
    )
    .await
    .inspect_err(|e| error!(code = e.code(), error = %e, "数据库连接失败"))?;
    let runner = CommandRunner::new(config, database.clone());

    let result = runner.run(cli.command).await;
    database.close().await;

    if let Err(e) = &result
        && let Some(KitError::QuotaExceeded {
            attempted,
            resolved,
        }) = e.downcast_ref::<KitError>()
    {
        error!(attempted, resolved, "地理编码配额已耗尽，请在配额恢复后重新运行");
        std::process::exit(EXIT_QUOTA_EXCEEDED);
    }

    result
}
