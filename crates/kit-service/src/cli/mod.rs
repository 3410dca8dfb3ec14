//! CLI 模块
//!
//! - `migrate` - 执行数据库迁移
//! - `geocode` - 运行一次地址补全（供定时任务调用）
//! - `claim` - 认领预印采样盒
//! - `create-handouts` - 批量生成预印采样盒
//!
//! # 使用示例
//!
//! ```bash
//! kit-portal migrate
//! kit-portal geocode --limit 500
//! kit-portal geocode --retry-failed
//! kit-portal claim --handout-id abcdefgh --login-id 6f1c2a9e-3b4d-4e5f-8a7b-1c2d3e4f5a6b
//! kit-portal create-handouts -c 100 --swabs 2
//! ```

pub mod commands;
pub mod runner;

pub use commands::{Cli, Commands};
pub use runner::CommandRunner;
