//! 采样盒发放与地址补全
//!
//! - 预印采样盒的生成与认领（单事务提升为已注册采样盒）
//! - 登录地址的批量地理编码（配额检测、有界重试、永久失败标记）

pub mod cli;
pub mod error;
pub mod geocode;
pub mod identifier;
pub mod models;
pub mod repository;
pub mod service;

pub use error::{KitError, Result};
