//! 仓储层
//!
//! 提供登录、采样盒、条码的数据访问

mod memory_store;
mod pg_store;
mod traits;

pub use memory_store::InMemoryKitStore;
pub use pg_store::{MIGRATOR, PgKitStore};
pub use traits::KitStore;

#[cfg(test)]
pub use traits::MockKitStore;
