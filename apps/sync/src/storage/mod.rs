//! Persisted local state.
//!
//! Everything durable in this layer is a string value under a namespaced key:
//! `offline_queue` for the pending-write queue and `cache_<key>` for each
//! cached response. Backends only need to store and list strings.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::Config;
use crate::errors::SyncError;

pub mod cache;
pub mod file;
pub mod memory;
pub mod queue;
pub mod redis_store;

pub use cache::{CacheEntry, CacheStore};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use queue::{ActionKind, PersistentQueue, QueueConfig, QueuedAction};
pub use redis_store::RedisStore;

/// Key/value backend for persisted state.
///
/// Implementations must make `set` replace the whole value in one write so a
/// crash never leaves a half-written queue behind.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, SyncError>;
    async fn set(&self, key: &str, value: String) -> Result<(), SyncError>;
    async fn remove(&self, key: &str) -> Result<(), SyncError>;
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, SyncError>;
}

/// Picks the backend from config: Redis when `REDIS_URL` is set, files otherwise.
pub async fn open_store(config: &Config) -> Result<Arc<dyn KvStore>, SyncError> {
    match &config.redis_url {
        Some(url) => {
            let store = RedisStore::connect(url).await?;
            info!("Persisted state backed by Redis");
            Ok(Arc::new(store))
        }
        None => {
            let store = FileStore::open(&config.data_dir).await?;
            info!("Persisted state backed by files in {}", config.data_dir.display());
            Ok(Arc::new(store))
        }
    }
}
