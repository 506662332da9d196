use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::info;

use crate::api_client::{endpoints, ApiClient};
use crate::chat::StreamingResponseClient;
use crate::config::Config;
use crate::errors::SyncError;
use crate::network::{ConnectivityProbe, HttpProbe, NetworkMonitor};
use crate::outreach::OutreachAggregator;
use crate::storage::{open_store, CacheStore, KvStore, PersistentQueue};
use crate::sync::{Action, Fetcher, HttpReplayExecutor, QueryOptions, QueueProcessor, SyncedMutation, SyncedQuery};

/// Shared layer state handed to every query, mutation and stream.
///
/// Built once by `init`; background tasks run between `start` and `teardown`.
pub struct SyncContext {
    pub config: Config,
    pub api: ApiClient,
    pub store: Arc<dyn KvStore>,
    pub network: Arc<NetworkMonitor>,
    pub queue: Arc<PersistentQueue>,
    pub cache: CacheStore,
    pub processor: Arc<QueueProcessor>,
    pub outreach: OutreachAggregator,
    pub chat: StreamingResponseClient,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncContext {
    /// Opens the configured store and probes the backend health endpoint.
    pub async fn init(config: Config) -> Result<Self, SyncError> {
        let api = ApiClient::new(&config.api_base_url, config.api_token.clone(), config.request_timeout)?;
        let store = open_store(&config).await?;
        let probe = HttpProbe::new(api.url(endpoints::HEALTH), config.request_timeout)?;
        Self::with_parts(config, api, store, Arc::new(probe)).await
    }

    /// Assembles the context from explicit parts.
    pub async fn with_parts(
        config: Config,
        api: ApiClient,
        store: Arc<dyn KvStore>,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> Result<Self, SyncError> {
        let network = NetworkMonitor::new(probe).await;
        let queue = Arc::new(PersistentQueue::new(store.clone()));
        let cache = CacheStore::new(store.clone());
        let processor = Arc::new(QueueProcessor::new(queue.clone()));
        let outreach = OutreachAggregator::from_backend(
            api.clone(),
            network.clone(),
            cache.clone(),
            QueryOptions {
                stale_time: config.stale_time,
            },
        );
        let chat = StreamingResponseClient::new(api.clone(), config.stream_word_delay);

        let current = network.current();
        info!(
            "Sync context ready (connected: {}, queued actions: {})",
            current.is_connected,
            queue.count().await
        );

        Ok(Self {
            config,
            api,
            store,
            network,
            queue,
            cache,
            processor,
            outreach,
            chat,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawns connectivity polling and the reconnect drain loop.
    pub fn start(&self) {
        let watcher = self.network.watch(self.config.probe_interval);
        let drainer = self.processor.clone().run_on_reconnect(
            self.network.clone(),
            Arc::new(HttpReplayExecutor::new(self.api.clone())),
        );
        self.lock_tasks().extend([watcher, drainer]);
    }

    pub fn query<T>(&self, key: &str, fetcher: impl Fetcher<T> + 'static) -> SyncedQuery<T>
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Clone + Send + Sync + 'static,
    {
        SyncedQuery::new(
            key,
            fetcher,
            QueryOptions {
                stale_time: self.config.stale_time,
            },
            self.network.clone(),
            self.cache.clone(),
        )
    }

    pub fn mutation<T: Send + 'static>(&self, action: impl Action<T> + 'static) -> SyncedMutation<T> {
        SyncedMutation::new(action, self.network.clone(), self.queue.clone())
    }

    /// Drops every cached response and pending write.
    pub async fn sign_out(&self) -> Result<(), SyncError> {
        let cleared = self.cache.clear_all().await?;
        let pending = self.queue.count().await;
        self.queue.clear().await;
        info!("Signed out: cleared {cleared} cached entries and {pending} queued actions");
        Ok(())
    }

    /// Stops background tasks. Persisted state is left intact.
    pub fn teardown(&self) {
        let tasks: Vec<_> = self.lock_tasks().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        info!("Sync context torn down ({} background tasks stopped)", tasks.len());
    }

    pub fn background_tasks(&self) -> usize {
        self.lock_tasks().len()
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for SyncContext {
    fn drop(&mut self) {
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::api_client::HttpMethod;
    use crate::network::tests::ScriptedProbe;
    use crate::network::{NetworkState, Transport};
    use crate::storage::{ActionKind, MemoryStore, QueueConfig};

    async fn context(state: NetworkState) -> SyncContext {
        let config = Config::local("http://127.0.0.1:9");
        let api = ApiClient::new(&config.api_base_url, None, Duration::from_secs(1)).unwrap();
        SyncContext::with_parts(config, api, Arc::new(MemoryStore::new()), ScriptedProbe::new(Some(state)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_initial_state_comes_from_probe() {
        let ctx = context(NetworkState::offline()).await;
        assert!(!ctx.network.is_connected());
        let ctx = context(NetworkState::online(Transport::Wifi)).await;
        assert!(ctx.network.is_connected());
    }

    #[tokio::test]
    async fn test_sign_out_clears_cache_and_queue() {
        let ctx = context(NetworkState::offline()).await;
        ctx.queue
            .enqueue(QueueConfig::new(ActionKind::Save, HttpMethod::Post, endpoints::SAVE_CONTACT))
            .await;
        ctx.cache.set("saved_contacts", &vec![1, 2, 3], Utc::now()).await.unwrap();

        ctx.sign_out().await.unwrap();

        assert_eq!(ctx.queue.count().await, 0);
        assert!(ctx.cache.get::<Vec<i32>>("saved_contacts").await.is_none());
    }

    #[tokio::test]
    async fn test_offline_mutation_from_context_is_queued() {
        let ctx = context(NetworkState::offline()).await;
        let mutation = ctx
            .mutation::<()>(|| async { anyhow::Ok(()) })
            .with_queue(QueueConfig::new(ActionKind::Unsave, HttpMethod::Delete, endpoints::UNSAVE_CONTACT));
        assert_eq!(mutation.execute().await.unwrap(), None);
        assert_eq!(ctx.queue.count().await, 1);
    }

    #[tokio::test]
    async fn test_teardown_stops_background_tasks() {
        let ctx = context(NetworkState::offline()).await;
        ctx.start();
        assert_eq!(ctx.background_tasks(), 2);
        ctx.teardown();
        assert_eq!(ctx.background_tasks(), 0);
        ctx.teardown();
    }
}
