//! 命令执行器
//!
//! 将命令行参数转化为服务调用

use std::sync::Arc;

use anyhow::{Context, Result};
use kit_shared::config::AppConfig;
use kit_shared::database::Database;
use tracing::info;

use super::commands::Commands;
use crate::geocode::GeocodeClient;
use crate::repository::{MIGRATOR, PgKitStore};
use crate::service::{EnrichmentScheduler, ProvisioningWorkflow};

/// 命令执行器
///
/// 持有配置与数据库句柄，进程启动时创建一次
pub struct CommandRunner {
    config: AppConfig,
    database: Database,
    store: Arc<PgKitStore>,
}

impl CommandRunner {
    pub fn new(config: AppConfig, database: Database) -> Self {
        let store = Arc::new(PgKitStore::new(database.pool().clone()));
        Self {
            config,
            database,
            store,
        }
    }

    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Migrate => self.run_migrate().await,
            Commands::Geocode {
                limit,
                retry_failed,
            } => self.run_geocode(limit, retry_failed).await,
            Commands::Claim {
                handout_id,
                login_id,
            } => self.run_claim(&handout_id, login_id).await,
            Commands::CreateHandouts {
                count,
                swabs,
                print_results,
            } => self.run_create_handouts(count, swabs, print_results).await,
            Commands::Kits { login_id } => self.run_kits(login_id).await,
            Commands::SetPassword {
                kit_id,
                password,
                handout,
            } => self.run_set_password(&kit_id, &password, handout).await,
        }
    }

    fn workflow(&self) -> ProvisioningWorkflow<PgKitStore> {
        ProvisioningWorkflow::new(self.store.clone(), self.config.provisioning.clone())
    }

    async fn run_migrate(&self) -> Result<()> {
        self.database.run_migrations(&MIGRATOR).await?;
        Ok(())
    }

    async fn run_geocode(&self, limit: Option<usize>, retry_failed: bool) -> Result<()> {
        let client = GeocodeClient::new(self.config.geocode.clone())
            .context("创建地理编码客户端失败")?;
        let scheduler = EnrichmentScheduler::from_config(
            self.store.clone(),
            Arc::new(client),
            &self.config.enrichment,
        );

        let limit = limit.or(self.config.enrichment.batch_limit);
        let report = scheduler.run(limit, retry_failed).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }

    async fn run_claim(&self, handout_id: &str, login_id: uuid::Uuid) -> Result<()> {
        let kit = self.workflow().claim_handout_kit(handout_id, login_id).await?;
        println!("{}", serde_json::to_string_pretty(&kit)?);
        Ok(())
    }

    async fn run_create_handouts(
        &self,
        count: usize,
        swabs: Option<u32>,
        print_results: bool,
    ) -> Result<()> {
        let credentials = self
            .workflow()
            .create_handout_kits(count, swabs, print_results)
            .await?;
        info!(count = credentials.len(), "预印采样盒已生成");
        println!("{}", serde_json::to_string_pretty(&credentials)?);
        Ok(())
    }

    async fn run_kits(&self, login_id: uuid::Uuid) -> Result<()> {
        let kits = self.workflow().kits_for_login(login_id).await?;
        println!("{}", serde_json::to_string_pretty(&kits)?);
        Ok(())
    }

    async fn run_set_password(&self, kit_id: &str, password: &str, handout: bool) -> Result<()> {
        let workflow = self.workflow();
        if handout {
            workflow.change_handout_password(kit_id, password).await?;
        } else {
            workflow.change_kit_password(kit_id, password).await?;
        }
        info!(kit_id, handout, "采样盒密码已修改");
        Ok(())
    }
}
