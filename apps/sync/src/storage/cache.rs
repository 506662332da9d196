use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{info, warn};

use super::KvStore;
use crate::errors::SyncError;

pub const CACHE_PREFIX: &str = "cache_";

/// Last-known-good response for one query key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub key: String,
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.cached_at
    }

    /// Strictly older than `stale_time`.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_time: Duration) -> bool {
        match chrono::Duration::from_std(stale_time) {
            Ok(limit) => self.age(now) > limit,
            Err(_) => false,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct StoredEntry<T> {
    data: T,
    cached_at: DateTime<Utc>,
}

/// Response cache over a `KvStore`, one `cache_<key>` value per query key.
#[derive(Clone)]
pub struct CacheStore {
    store: Arc<dyn KvStore>,
}

impl CacheStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn storage_key(key: &str) -> String {
        format!("{CACHE_PREFIX}{key}")
    }

    /// Reads an entry. Missing, unreadable or mistyped values are all `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let raw = match self.store.get(&Self::storage_key(key)).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Cache read for '{key}' failed: {e}");
                return None;
            }
        };
        match serde_json::from_str::<StoredEntry<T>>(&raw) {
            Ok(stored) => Some(CacheEntry {
                key: key.to_string(),
                data: stored.data,
                cached_at: stored.cached_at,
            }),
            Err(e) => {
                warn!("Cached value for '{key}' is unreadable, ignoring: {e}");
                None
            }
        }
    }

    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        data: &T,
        cached_at: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let raw = serde_json::to_string(&StoredEntry { data, cached_at })?;
        self.store.set(&Self::storage_key(key), raw).await
    }

    /// Drops every cached response (sign-out).
    pub async fn clear_all(&self) -> Result<usize, SyncError> {
        let keys = self.store.keys_with_prefix(CACHE_PREFIX).await?;
        for key in &keys {
            self.store.remove(key).await?;
        }
        info!("Cleared {} cached responses", keys.len());
        Ok(keys.len())
    }
}
