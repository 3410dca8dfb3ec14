//! 服务层
//!
//! 两个独立入口：采样盒发放与地址补全

mod enrichment;
mod provisioning;

pub use enrichment::{EnrichmentReport, EnrichmentScheduler};
pub use provisioning::ProvisioningWorkflow;
