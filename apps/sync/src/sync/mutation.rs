//! Offline-aware writes.
//!
//! Online the action runs directly. Offline it is either queued for replay
//! (when the caller supplied a `QueueConfig`) or rejected. Queuing resolves
//! `Ok(None)`: from the caller's side a queued write is a successful write.

use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::errors::SyncError;
use crate::network::NetworkMonitor;
use crate::storage::{PersistentQueue, QueueConfig};

#[async_trait]
pub trait Action<T>: Send + Sync {
    async fn run(&self) -> anyhow::Result<T>;
}

#[async_trait]
impl<T, F, Fut> Action<T> for F
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<T>> + Send,
{
    async fn run(&self) -> anyhow::Result<T> {
        (self)().await
    }
}

type QueuedCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Default, Clone)]
struct MutationStatus {
    loading: bool,
    error: Option<String>,
}

pub struct SyncedMutation<T> {
    action: Arc<dyn Action<T>>,
    queue_config: Option<QueueConfig>,
    on_queued: Option<QueuedCallback>,
    network: Arc<NetworkMonitor>,
    queue: Arc<PersistentQueue>,
    status: Mutex<MutationStatus>,
}

impl<T: Send + 'static> SyncedMutation<T> {
    pub fn new(
        action: impl Action<T> + 'static,
        network: Arc<NetworkMonitor>,
        queue: Arc<PersistentQueue>,
    ) -> Self {
        Self {
            action: Arc::new(action),
            queue_config: None,
            on_queued: None,
            network,
            queue,
            status: Mutex::new(MutationStatus::default()),
        }
    }

    /// Makes the mutation queueable while offline.
    pub fn with_queue(mut self, config: QueueConfig) -> Self {
        self.queue_config = Some(config);
        self
    }

    pub fn on_queued<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_queued = Some(Arc::new(callback));
        self
    }

    pub fn loading(&self) -> bool {
        self.lock_status().loading
    }

    pub fn error(&self) -> Option<String> {
        self.lock_status().error.clone()
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, MutationStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn finish(&self, error: Option<String>) {
        let mut status = self.lock_status();
        status.loading = false;
        status.error = error;
    }

    /// `Ok(Some(_))` when the action ran, `Ok(None)` when it was queued.
    pub async fn execute(&self) -> Result<Option<T>, SyncError> {
        self.lock_status().loading = true;

        if self.network.is_connected() {
            return match self.action.run().await {
                Ok(value) => {
                    self.finish(None);
                    Ok(Some(value))
                }
                Err(e) => {
                    self.finish(Some(e.to_string()));
                    Err(SyncError::Internal(e))
                }
            };
        }

        let Some(config) = &self.queue_config else {
            let err = SyncError::RequiresConnectivity;
            self.finish(Some(err.to_string()));
            return Err(err);
        };

        let id = self.queue.enqueue(config.clone()).await;
        info!(
            "Offline: queued {:?} {} {} as {id}",
            config.kind, config.method, config.endpoint
        );
        if let Some(callback) = &self.on_queued {
            callback(&id);
        }
        self.finish(None);
        Ok(None)
    }

    /// Runs the mutation behind an optimistic local value. A queued write
    /// confirms the update (it will be replayed); a rejected one rolls it back.
    pub async fn execute_optimistic<V>(
        &self,
        update: &mut OptimisticUpdate<V>,
    ) -> Result<Option<T>, SyncError> {
        match self.execute().await {
            Ok(value) => {
                update.confirm();
                Ok(value)
            }
            Err(e) => {
                warn!("Mutation failed, rolling back optimistic update: {e}");
                update.roll_back();
                Err(e)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimisticPhase {
    PendingLocal,
    Confirmed,
    RolledBack,
}

/// A local value applied ahead of server confirmation.
///
/// Transitions: `PendingLocal -> Confirmed` or `PendingLocal -> RolledBack`.
/// Both end states are terminal.
#[derive(Debug, Clone)]
pub struct OptimisticUpdate<V> {
    previous: V,
    proposed: V,
    phase: OptimisticPhase,
}

impl<V> OptimisticUpdate<V> {
    pub fn new(previous: V, proposed: V) -> Self {
        Self {
            previous,
            proposed,
            phase: OptimisticPhase::PendingLocal,
        }
    }

    pub fn phase(&self) -> OptimisticPhase {
        self.phase
    }

    /// The value the UI should show right now.
    pub fn current(&self) -> &V {
        match self.phase {
            OptimisticPhase::RolledBack => &self.previous,
            OptimisticPhase::PendingLocal | OptimisticPhase::Confirmed => &self.proposed,
        }
    }

    pub fn confirm(&mut self) -> bool {
        self.transition(OptimisticPhase::Confirmed)
    }

    pub fn roll_back(&mut self) -> bool {
        self.transition(OptimisticPhase::RolledBack)
    }

    fn transition(&mut self, to: OptimisticPhase) -> bool {
        if self.phase != OptimisticPhase::PendingLocal {
            return false;
        }
        self.phase = to;
        true
    }

    pub fn into_current(self) -> V {
        match self.phase {
            OptimisticPhase::RolledBack => self.previous,
            OptimisticPhase::PendingLocal | OptimisticPhase::Confirmed => self.proposed,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::api_client::{endpoints, HttpMethod};
    use crate::network::tests::{offline_monitor, online_monitor};
    use crate::storage::{ActionKind, MemoryStore};

    fn queue() -> Arc<PersistentQueue> {
        Arc::new(PersistentQueue::new(Arc::new(MemoryStore::new())))
    }

    fn update_config() -> QueueConfig {
        QueueConfig::new(ActionKind::Update, HttpMethod::Put, endpoints::UPDATE_STATUS)
            .with_body(json!({ "contact_id": "c1", "status": "contacted" }))
    }

    #[tokio::test]
    async fn test_online_runs_action() {
        let q = queue();
        let mutation = SyncedMutation::<u32>::new(|| async { anyhow::Ok(7) }, online_monitor().await, q.clone())
            .with_queue(update_config());
        assert_eq!(mutation.execute().await.unwrap(), Some(7));
        assert_eq!(q.count().await, 0);
        assert!(!mutation.loading());
        assert!(mutation.error().is_none());
    }

    #[tokio::test]
    async fn test_online_failure_rejects_like_action() {
        let mutation = SyncedMutation::<u32>::new(
            || async { Err(anyhow::anyhow!("422 invalid status")) },
            online_monitor().await,
            queue(),
        )
        .with_queue(update_config());
        let err = mutation.execute().await.unwrap_err();
        assert!(err.to_string().contains("422 invalid status"));
        assert!(mutation.error().is_some());
    }

    #[tokio::test]
    async fn test_offline_with_config_queues_and_resolves_none() {
        let q = queue();
        let queued_ids = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = queued_ids.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();

        let mutation = SyncedMutation::<u32>::new(
            move || {
                counted.fetch_add(1, Ordering::SeqCst);
                async { anyhow::Ok(1) }
            },
            offline_monitor().await,
            q.clone(),
        )
        .with_queue(update_config())
        .on_queued(move |id| sink.lock().unwrap().push(id.to_string()));

        assert_eq!(mutation.execute().await.unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0, "action must not run offline");

        let listed = q.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].kind, ActionKind::Update);
        assert_eq!(listed[0].retry_count, 0);
        assert_eq!(queued_ids.lock().unwrap().as_slice(), &[listed[0].id.clone()]);
    }

    #[tokio::test]
    async fn test_offline_without_config_requires_connectivity() {
        let mutation = SyncedMutation::<u32>::new(|| async { anyhow::Ok(1) }, offline_monitor().await, queue());
        let err = mutation.execute().await.unwrap_err();
        assert!(matches!(err, SyncError::RequiresConnectivity));
    }

    #[tokio::test]
    async fn test_optimistic_confirmed_on_success() {
        let mutation = SyncedMutation::<()>::new(|| async { anyhow::Ok(()) }, online_monitor().await, queue());
        let mut update = OptimisticUpdate::new("need_contact", "waiting");
        mutation.execute_optimistic(&mut update).await.unwrap();
        assert_eq!(update.phase(), OptimisticPhase::Confirmed);
        assert_eq!(*update.current(), "waiting");
    }

    #[tokio::test]
    async fn test_optimistic_rolled_back_on_failure() {
        let mutation = SyncedMutation::<()>::new(
            || async { Err(anyhow::anyhow!("server rejected")) },
            online_monitor().await,
            queue(),
        );
        let mut update = OptimisticUpdate::new("need_contact", "waiting");
        assert_eq!(*update.current(), "waiting");
        assert!(mutation.execute_optimistic(&mut update).await.is_err());
        assert_eq!(update.phase(), OptimisticPhase::RolledBack);
        assert_eq!(update.into_current(), "need_contact");
    }

    #[tokio::test]
    async fn test_optimistic_rolled_back_when_offline_and_unqueueable() {
        let mutation = SyncedMutation::<()>::new(|| async { anyhow::Ok(()) }, offline_monitor().await, queue());
        let mut update = OptimisticUpdate::new(false, true);
        assert!(mutation.execute_optimistic(&mut update).await.is_err());
        assert!(!*update.current());
    }

    #[test]
    fn test_terminal_states_do_not_transition() {
        let mut update = OptimisticUpdate::new(1, 2);
        assert!(update.confirm());
        assert!(!update.roll_back());
        assert_eq!(update.phase(), OptimisticPhase::Confirmed);
        assert_eq!(*update.current(), 2);
    }
}
