//! Offline-aware reads.
//!
//! Online: fetch, cache, serve fresh. Fetch failure with a cached value
//! degrades silently to that value marked stale. Offline: serve the cache
//! with staleness computed from its age. Only "nothing cached" surfaces as
//! an error.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, warn};

use crate::errors::SyncError;
use crate::network::NetworkMonitor;
use crate::storage::CacheStore;

pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(5 * 60);

/// Something that produces fresh data from the network.
#[async_trait]
pub trait Fetcher<T>: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<T>;
}

#[async_trait]
impl<T, F, Fut> Fetcher<T> for F
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<T>> + Send,
{
    async fn fetch(&self) -> anyhow::Result<T> {
        (self)().await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    pub stale_time: Duration,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stale_time: DEFAULT_STALE_TIME,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Network,
    Cache,
}

/// Snapshot of a query. `error` is only set when there is no data at all.
#[derive(Debug)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub is_stale: bool,
    pub loading: bool,
    pub error: Option<SyncError>,
    pub source: Option<DataSource>,
    pub cached_at: Option<DateTime<Utc>>,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            is_stale: false,
            loading: false,
            error: None,
            source: None,
            cached_at: None,
        }
    }
}

impl<T> QueryState<T> {
    fn loaded(data: T, source: DataSource, is_stale: bool, cached_at: DateTime<Utc>) -> Self {
        Self {
            data: Some(data),
            is_stale,
            loading: false,
            error: None,
            source: Some(source),
            cached_at: Some(cached_at),
        }
    }

    fn failed(error: SyncError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// Collapses the state into a plain result (stale data counts as success).
    pub fn into_result(self) -> Result<(T, bool), SyncError> {
        match (self.data, self.error) {
            (Some(data), _) => Ok((data, self.is_stale)),
            (None, Some(e)) => Err(e),
            (None, None) => Err(SyncError::Fetch("query has not run".to_string())),
        }
    }
}

impl<T: Clone> QueryState<T> {
    // SyncError is not Clone; the snapshot keeps its message.
    fn snapshot(&self) -> Self {
        Self {
            data: self.data.clone(),
            is_stale: self.is_stale,
            loading: self.loading,
            error: self.error.as_ref().map(copy_error),
            source: self.source,
            cached_at: self.cached_at,
        }
    }
}

fn copy_error(e: &SyncError) -> SyncError {
    match e {
        SyncError::NoCachedData(key) => SyncError::NoCachedData(key.clone()),
        SyncError::RequiresConnectivity => SyncError::RequiresConnectivity,
        SyncError::AllSourcesFailed => SyncError::AllSourcesFailed,
        other => SyncError::Fetch(other.to_string()),
    }
}

pub struct SyncedQuery<T> {
    key: String,
    fetcher: Arc<dyn Fetcher<T>>,
    options: QueryOptions,
    network: Arc<NetworkMonitor>,
    cache: CacheStore,
    state: Mutex<QueryState<T>>,
}

impl<T> SyncedQuery<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(
        key: impl Into<String>,
        fetcher: impl Fetcher<T> + 'static,
        options: QueryOptions,
        network: Arc<NetworkMonitor>,
        cache: CacheStore,
    ) -> Self {
        Self {
            key: key.into(),
            fetcher: Arc::new(fetcher),
            options,
            network,
            cache,
            state: Mutex::new(QueryState::default()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Latest snapshot without triggering a fetch.
    pub fn state(&self) -> QueryState<T> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot()
    }

    fn set_loading(&self, loading: bool) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).loading = loading;
    }

    /// Runs the read. Never throttled: every call goes through the full
    /// network/cache decision again.
    pub async fn refetch(&self) -> QueryState<T> {
        self.set_loading(true);
        let result = self.resolve().await;
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = result.snapshot();
        result
    }

    /// Alias of `refetch` for the first load.
    pub async fn run(&self) -> QueryState<T> {
        self.refetch().await
    }

    async fn resolve(&self) -> QueryState<T> {
        if self.network.is_connected() {
            match self.fetcher.fetch().await {
                Ok(data) => {
                    let now = Utc::now();
                    if let Err(e) = self.cache.set(&self.key, &data, now).await {
                        error!("Failed to cache '{}': {e}", self.key);
                    }
                    debug!("Query '{}' served fresh from network", self.key);
                    QueryState::loaded(data, DataSource::Network, false, now)
                }
                Err(fetch_err) => match self.cache.get::<T>(&self.key).await {
                    Some(entry) => {
                        warn!(
                            "Query '{}' fetch failed, serving cached data: {fetch_err}",
                            self.key
                        );
                        QueryState::loaded(entry.data, DataSource::Cache, true, entry.cached_at)
                    }
                    None => {
                        warn!("Query '{}' fetch failed with nothing cached: {fetch_err}", self.key);
                        QueryState::failed(SyncError::Fetch(fetch_err.to_string()))
                    }
                },
            }
        } else {
            match self.cache.get::<T>(&self.key).await {
                Some(entry) => {
                    let is_stale = entry.is_stale(Utc::now(), self.options.stale_time);
                    debug!("Query '{}' served from cache while offline", self.key);
                    QueryState::loaded(entry.data, DataSource::Cache, is_stale, entry.cached_at)
                }
                None => QueryState::failed(SyncError::NoCachedData(self.key.clone())),
            }
        }
    }
}
