//! Storage backends for the task queue
//!
//! The queue only needs a small key/value + sorted-set contract with optimistic
//! transactions (see [`Store`]). Three backends implement it:
//! - [`MemoryStore`]: process-local, used by tests and single-process crawls
//! - [`SqliteStore`]: persistent single-host store
//! - [`RedisStore`]: shared networked store for multi-process crawls

mod memory;
mod redis;
mod schema;
mod sqlite;
mod traits;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;
pub use self::sqlite::SqliteStore;
pub use self::traits::{
    Store, StoreError, StoreResult, StoreView, TxnBody, WriteOp, MAX_TXN_ATTEMPTS,
};

use crate::config::{QueueConfig, StoreBackend};
use std::path::Path;
use std::sync::Arc;

/// Opens the store backend selected by the queue configuration
///
/// # Arguments
///
/// * `config` - The validated `[queue]` section
///
/// # Returns
///
/// * `Ok(Arc<dyn Store>)` - The opened backend
/// * `Err(StoreError)` - The backend could not be opened
pub fn open_store(config: &QueueConfig) -> StoreResult<Arc<dyn Store>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Sqlite => {
            let path = config.sqlite_path.as_deref().ok_or_else(|| {
                StoreError::Backend("sqlite backend selected without sqlite-path".to_string())
            })?;
            Ok(Arc::new(SqliteStore::new(Path::new(path))?))
        }
        StoreBackend::Redis => {
            let url = config.redis_url.as_deref().ok_or_else(|| {
                StoreError::Backend("redis backend selected without redis-url".to_string())
            })?;
            Ok(Arc::new(RedisStore::new(url)?))
        }
    }
}
