//! CLI 命令定义
//!
//! 使用 clap derive 宏定义命令行接口结构。

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// 采样盒门户运维工具
#[derive(Parser, Debug)]
#[command(name = "kit-portal")]
#[command(version, about = "采样盒发放与地址补全工具")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 子命令枚举
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 执行数据库迁移
    Migrate,

    /// 运行一次地址补全
    ///
    /// 配额耗尽时以退出码 2 结束，剩余登录留待下次调度
    Geocode {
        /// 本次最多尝试的登录数（默认取配置 enrichment.batch_limit）
        #[arg(short, long)]
        limit: Option<usize>,

        /// 先清除永久失败标记，重新尝试这些登录
        #[arg(long)]
        retry_failed: bool,
    },

    /// 将预印采样盒认领到指定登录
    Claim {
        /// 预印采样盒编号
        #[arg(long)]
        handout_id: String,

        /// 登录 ID
        #[arg(long)]
        login_id: Uuid,
    },

    /// 批量生成预印采样盒，并输出打印用的明文凭据（JSON）
    CreateHandouts {
        /// 生成数量
        #[arg(short, long)]
        count: usize,

        /// 每盒拭子数（默认取配置 provisioning.swabs_per_kit）
        #[arg(long)]
        swabs: Option<u32>,

        /// 是否打印结果
        #[arg(long)]
        print_results: bool,
    },

    /// 列出登录名下的采样盒
    Kits {
        /// 登录 ID
        #[arg(long)]
        login_id: Uuid,
    },

    /// 修改采样盒密码
    SetPassword {
        /// 采样盒编号
        #[arg(long)]
        kit_id: String,

        /// 新密码
        #[arg(long)]
        password: String,

        /// 目标是尚未认领的预印采样盒
        #[arg(long)]
        handout: bool,
    },
}
