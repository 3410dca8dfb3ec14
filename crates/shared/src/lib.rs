//! 共享库
//!
//! 包含采样盒门户各组件共用的配置加载、错误处理、数据库连接、可观测性与重试执行器。

pub mod config;
pub mod database;
pub mod error;
pub mod observability;
pub mod retry;
