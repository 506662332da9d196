//! Replays the offline queue.
//!
//! One pass works on a snapshot of the queue taken at call time, oldest
//! first and one action at a time. Success removes the action; failure bumps
//! its retry count. After the pass every action at or over the retry budget
//! is evicted, so nothing retries forever.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api_client::ApiClient;
use crate::network::NetworkMonitor;
use crate::storage::{PersistentQueue, QueuedAction};

pub const MAX_RETRIES: u32 = 3;

/// Replays one queued action. `Ok(true)` means the backend accepted it.
#[async_trait]
pub trait QueueExecutor: Send + Sync {
    async fn execute(&self, action: &QueuedAction) -> anyhow::Result<bool>;
}

#[async_trait]
impl<F, Fut> QueueExecutor for F
where
    F: Fn(QueuedAction) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<bool>> + Send,
{
    async fn execute(&self, action: &QueuedAction) -> anyhow::Result<bool> {
        (self)(action.clone()).await
    }
}

/// Replays the stored `{endpoint, method, body}` triple against the backend.
pub struct HttpReplayExecutor {
    client: ApiClient,
}

impl HttpReplayExecutor {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QueueExecutor for HttpReplayExecutor {
    async fn execute(&self, action: &QueuedAction) -> anyhow::Result<bool> {
        let status = self
            .client
            .send_raw(action.method, &action.endpoint, action.body.as_ref())
            .await?;
        Ok((200..300).contains(&status))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub success: usize,
    pub failed: usize,
    pub evicted: usize,
    /// Another drain was already running; nothing was done.
    pub skipped: bool,
}

pub struct QueueProcessor {
    queue: Arc<PersistentQueue>,
    max_retries: u32,
    in_flight: AtomicBool,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl QueueProcessor {
    pub fn new(queue: Arc<PersistentQueue>) -> Self {
        Self {
            queue,
            max_retries: MAX_RETRIES,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_processing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn process<E>(&self, executor: &E) -> ProcessReport
    where
        E: QueueExecutor + ?Sized,
    {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Queue drain already in flight, skipping");
            return ProcessReport {
                skipped: true,
                ..ProcessReport::default()
            };
        }
        let _guard = InFlight(&self.in_flight);

        let snapshot = self.queue.list().await;
        let mut report = ProcessReport::default();
        if snapshot.is_empty() {
            return report;
        }
        info!("Replaying {} queued actions", snapshot.len());

        for action in &snapshot {
            match executor.execute(action).await {
                Ok(true) => {
                    if !self.queue.remove(&action.id).await {
                        warn!("Action {} succeeded but could not be removed; it may replay", action.id);
                    }
                    report.success += 1;
                }
                Ok(false) => {
                    debug!("Action {} rejected", action.id);
                    self.record_failure(action).await;
                    report.failed += 1;
                }
                Err(e) => {
                    warn!("Action {} failed: {e}", action.id);
                    self.record_failure(action).await;
                    report.failed += 1;
                }
            }
        }

        let evicted = self.queue.evict_exhausted(self.max_retries).await;
        for action in &evicted {
            warn!(
                "Evicting {:?} {} {} after {} attempts",
                action.kind, action.method, action.endpoint, action.retry_count
            );
        }
        report.evicted = evicted.len();

        info!(
            "Queue drain finished: {} succeeded, {} failed, {} evicted",
            report.success, report.failed, report.evicted
        );
        report
    }

    async fn record_failure(&self, action: &QueuedAction) {
        match self.queue.increment_retry(&action.id).await {
            Some(retries) => debug!("Action {} now at retry {retries}", action.id),
            None => warn!(
                "Retry count for action {} was not persisted; its retry budget may be exceeded",
                action.id
            ),
        }
    }

    /// Drains the queue now if online, then again on every offline -> online
    /// transition, until the handle is aborted or the monitor goes away.
    ///
    /// Transitions arrive through a subscriber callback feeding an unbounded
    /// channel, so a brief offline blip is still seen as its own transition.
    pub fn run_on_reconnect(
        self: Arc<Self>,
        network: Arc<NetworkMonitor>,
        executor: Arc<dyn QueueExecutor>,
    ) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<bool>();
        let subscription = network.subscribe(move |state| {
            let _ = tx.send(state.is_connected);
        });
        let mut was_connected = network.is_connected();
        drop(network);
        tokio::spawn(async move {
            let _subscription = subscription;
            if was_connected {
                self.process(executor.as_ref()).await;
            }
            while let Some(connected) = rx.recv().await {
                if connected && !was_connected {
                    self.process(executor.as_ref()).await;
                }
                was_connected = connected;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use axum::http::{Method, StatusCode, Uri};
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;
    use crate::api_client::{endpoints, HttpMethod};
    use crate::network::tests::{offline_monitor, online_monitor};
    use crate::network::{NetworkState, Transport};
    use crate::storage::{ActionKind, MemoryStore, QueueConfig};

    fn queue() -> Arc<PersistentQueue> {
        Arc::new(PersistentQueue::new(Arc::new(MemoryStore::new())))
    }

    fn email(n: u32) -> QueueConfig {
        QueueConfig::new(ActionKind::Email, HttpMethod::Post, endpoints::SEND_EMAIL)
            .with_body(json!({ "contact_id": n }))
    }

    #[tokio::test]
    async fn test_success_removes_actions() {
        let q = queue();
        q.enqueue(email(1)).await;
        q.enqueue(email(2)).await;
        let processor = QueueProcessor::new(q.clone());

        let report = processor.process(&|_a: QueuedAction| async { anyhow::Ok(true) }).await;
        assert_eq!(report.success, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(q.count().await, 0);
    }

    #[tokio::test]
    async fn test_processes_in_fifo_order() {
        let q = queue();
        let first = q.enqueue(email(1)).await;
        let second = q.enqueue(email(2)).await;
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();

        QueueProcessor::new(q)
            .process(&move |a: QueuedAction| {
                sink.lock().unwrap().push(a.id);
                async { anyhow::Ok(true) }
            })
            .await;
        assert_eq!(*seen.lock().unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_always_failing_action_evicted_after_three_attempts() {
        let q = queue();
        q.enqueue(email(1)).await;
        let processor = QueueProcessor::new(q.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let executor = move |_a: QueuedAction| {
            counted.fetch_add(1, Ordering::SeqCst);
            async { anyhow::Ok(false) }
        };

        for pass in 1..=2 {
            let report = processor.process(&executor).await;
            assert_eq!(report.failed, 1);
            assert_eq!(report.evicted, 0);
            assert_eq!(q.list().await[0].retry_count, pass);
        }
        let report = processor.process(&executor).await;
        assert_eq!(report.evicted, 1);
        assert_eq!(q.count().await, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let report = processor.process(&executor).await;
        assert_eq!(report, ProcessReport::default());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_action_at_two_retries_is_evicted_after_one_failure() {
        let q = queue();
        let id = q.enqueue(email(1)).await;
        q.increment_retry(&id).await;
        q.increment_retry(&id).await;

        let report = QueueProcessor::new(q.clone())
            .process(&|_a: QueuedAction| async { anyhow::Ok(false) })
            .await;
        assert_eq!(report.success, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(q.count().await, 0);
    }

    #[tokio::test]
    async fn test_executor_error_counts_as_failure() {
        let q = queue();
        q.enqueue(email(1)).await;
        let report = QueueProcessor::new(q.clone())
            .process(&|_a: QueuedAction| async { Err::<bool, _>(anyhow::anyhow!("connection reset")) })
            .await;
        assert_eq!(report.failed, 1);
        assert_eq!(q.list().await[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_actions_added_mid_run_wait_for_next_pass() {
        let q = queue();
        q.enqueue(email(1)).await;
        let inner = q.clone();
        let report = QueueProcessor::new(q.clone())
            .process(&move |_a: QueuedAction| {
                let inner = inner.clone();
                async move {
                    inner.enqueue(email(99)).await;
                    anyhow::Ok(true)
                }
            })
            .await;
        assert_eq!(report.success, 1);
        let left = q.list().await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].body, Some(json!({ "contact_id": 99 })));
    }

    #[tokio::test]
    async fn test_empty_queue_is_noop() {
        let report = QueueProcessor::new(queue())
            .process(&|_a: QueuedAction| async { anyhow::Ok(true) })
            .await;
        assert_eq!(report, ProcessReport::default());
    }

    #[tokio::test]
    async fn test_concurrent_drain_is_skipped() {
        let q = queue();
        q.enqueue(email(1)).await;
        let processor = Arc::new(QueueProcessor::new(q));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));

        let slow = {
            let processor = processor.clone();
            tokio::spawn(async move {
                processor
                    .process(&move |_a: QueuedAction| {
                        let release_rx = release_rx.clone();
                        async move {
                            if let Some(rx) = release_rx.lock().await.take() {
                                let _ = rx.await;
                            }
                            anyhow::Ok(true)
                        }
                    })
                    .await
            })
        };

        while !processor.is_processing() {
            tokio::task::yield_now().await;
        }
        let second = processor.process(&|_a: QueuedAction| async { anyhow::Ok(true) }).await;
        assert!(second.skipped);

        release_tx.send(()).unwrap();
        let first = slow.await.unwrap();
        assert_eq!(first.success, 1);
        assert!(!processor.is_processing());
    }

    #[tokio::test]
    async fn test_drains_on_reconnect() {
        let q = queue();
        q.enqueue(email(1)).await;
        let network = offline_monitor().await;
        let processor = Arc::new(QueueProcessor::new(q.clone()));
        let executor: Arc<dyn QueueExecutor> = Arc::new(|_a: QueuedAction| async { anyhow::Ok(true) });
        let handle = processor.run_on_reconnect(network.clone(), executor);

        tokio::task::yield_now().await;
        assert_eq!(q.count().await, 1, "nothing replays while offline");

        network.set_state(NetworkState::online(Transport::Wifi));
        for _ in 0..50 {
            if q.count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(q.count().await, 0);
        handle.abort();
    }

    #[tokio::test]
    async fn test_brief_offline_blip_still_drains() {
        let q = queue();
        let network = online_monitor().await;
        let processor = Arc::new(QueueProcessor::new(q.clone()));
        let executor: Arc<dyn QueueExecutor> = Arc::new(|_a: QueuedAction| async { anyhow::Ok(true) });
        let handle = processor.run_on_reconnect(network.clone(), executor);
        tokio::task::yield_now().await;

        // The drain task gets no chance to run between these two transitions.
        network.set_state(NetworkState::offline());
        q.enqueue(email(1)).await;
        network.set_state(NetworkState::online(Transport::Wifi));

        for _ in 0..50 {
            if q.count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(q.count().await, 0);
        handle.abort();
    }

    // ────────────────────────────────────────────────────────────────────────
    // HttpReplayExecutor
    // ────────────────────────────────────────────────────────────────────────

    type Received = Arc<std::sync::Mutex<Vec<(String, String, serde_json::Value)>>>;

    async fn backend(status: StatusCode) -> (ApiClient, Received) {
        let received: Received = Arc::default();
        let sink = received.clone();
        let app = Router::new().fallback(move |method: Method, uri: Uri, Json(body): Json<serde_json::Value>| {
            let sink = sink.clone();
            async move {
                sink.lock()
                    .unwrap()
                    .push((method.to_string(), uri.path().to_string(), body));
                status
            }
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let client = ApiClient::new(&format!("http://{addr}"), None, Duration::from_secs(5)).unwrap();
        (client, received)
    }

    fn stored(kind: ActionKind, method: HttpMethod, endpoint: &str) -> QueuedAction {
        QueuedAction {
            id: "a1".to_string(),
            kind,
            endpoint: endpoint.to_string(),
            method,
            body: Some(json!({ "contact_id": "c7", "text": "Thanks for the follow" })),
            queued_at: chrono::Utc::now(),
            retry_count: 0,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn test_replay_2xx_is_accepted_and_request_is_faithful() {
        let (client, received) = backend(StatusCode::NO_CONTENT).await;
        let executor = HttpReplayExecutor::new(client);
        let action = stored(ActionKind::Dm, HttpMethod::Post, endpoints::SEND_DM);

        assert!(executor.execute(&action).await.unwrap());
        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, "POST");
        assert_eq!(received[0].1, endpoints::SEND_DM);
        assert_eq!(received[0].2, json!({ "contact_id": "c7", "text": "Thanks for the follow" }));
    }

    #[tokio::test]
    async fn test_replay_non_2xx_is_rejected() {
        let (client, received) = backend(StatusCode::UNPROCESSABLE_ENTITY).await;
        let executor = HttpReplayExecutor::new(client);
        let action = stored(ActionKind::Update, HttpMethod::Put, endpoints::UPDATE_STATUS);

        assert!(!executor.execute(&action).await.unwrap());
        assert_eq!(received.lock().unwrap()[0].0, "PUT");
    }

    #[tokio::test]
    async fn test_replay_transport_failure_is_error() {
        let client = ApiClient::new("http://127.0.0.1:9", None, Duration::from_secs(2)).unwrap();
        let executor = HttpReplayExecutor::new(client);
        let action = stored(ActionKind::Save, HttpMethod::Post, endpoints::SAVE_CONTACT);
        assert!(executor.execute(&action).await.is_err());
    }
}
