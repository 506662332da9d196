//! Durable FIFO of pending mutating actions.
//!
//! The whole list lives under one key and every mutation rewrites it in a
//! single `set`, so a crash between `list()` and `remove()` can neither lose
//! nor duplicate an action. Write failures are logged and swallowed: queuing
//! sits on the optimistic UI path and must never block it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::KvStore;
use crate::api_client::HttpMethod;

pub const QUEUE_KEY: &str = "offline_queue";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Email,
    Dm,
    Save,
    Unsave,
    Update,
}

/// A mutating request deferred because there was no connectivity at call time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: String,
    pub kind: ActionKind,
    pub endpoint: String,
    pub method: HttpMethod,
    pub body: Option<serde_json::Value>,
    pub queued_at: DateTime<Utc>,
    pub retry_count: u32,
    /// Display hints only (e.g. recipient name for a "pending" badge).
    pub metadata: Option<serde_json::Value>,
}

/// What a caller supplies to have an action queued; the queue fills in the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub kind: ActionKind,
    pub endpoint: String,
    pub method: HttpMethod,
    pub body: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
}

impl QueueConfig {
    pub fn new(kind: ActionKind, method: HttpMethod, endpoint: impl Into<String>) -> Self {
        Self {
            kind,
            endpoint: endpoint.into(),
            method,
            body: None,
            metadata: None,
        }
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

pub struct PersistentQueue {
    store: Arc<dyn KvStore>,
    // Serialises read-modify-write cycles within this process.
    lock: Mutex<()>,
    seq: AtomicU64,
}

impl PersistentQueue {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
            seq: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{:x}-{seq}-{}",
            Utc::now().timestamp_millis(),
            &suffix[..8]
        )
    }

    async fn load(&self) -> Vec<QueuedAction> {
        let raw = match self.store.get(QUEUE_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Failed to read offline queue, treating as empty: {e}");
                return Vec::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Stored offline queue is unreadable, treating as empty: {e}");
            Vec::new()
        })
    }

    async fn save(&self, actions: &[QueuedAction]) -> bool {
        let raw = match serde_json::to_string(actions) {
            Ok(raw) => raw,
            Err(e) => {
                error!("Failed to serialize offline queue: {e}");
                return false;
            }
        };
        match self.store.set(QUEUE_KEY, raw).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to persist offline queue ({} actions): {e}", actions.len());
                false
            }
        }
    }

    /// Appends an action at the tail and returns its id. The id is
    /// reassigned so uniqueness within the queue holds regardless of input.
    pub async fn append(&self, mut action: QueuedAction) -> String {
        let _guard = self.lock.lock().await;
        action.id = self.next_id();
        let id = action.id.clone();
        let mut actions = self.load().await;
        actions.push(action);
        if self.save(&actions).await {
            debug!("Queued action {id} ({} pending)", actions.len());
        }
        id
    }

    /// Builds a fresh action from `config` and appends it.
    pub async fn enqueue(&self, config: QueueConfig) -> String {
        self.append(QueuedAction {
            id: String::new(),
            kind: config.kind,
            endpoint: config.endpoint,
            method: config.method,
            body: config.body,
            queued_at: Utc::now(),
            retry_count: 0,
            metadata: config.metadata,
        })
        .await
    }

    /// All pending actions, oldest first.
    pub async fn list(&self) -> Vec<QueuedAction> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    pub async fn count(&self) -> usize {
        self.list().await.len()
    }

    /// Removes exactly one action. Returns false if the id was not queued.
    pub async fn remove(&self, id: &str) -> bool {
        let _guard = self.lock.lock().await;
        let mut actions = self.load().await;
        let Some(pos) = actions.iter().position(|a| a.id == id) else {
            return false;
        };
        actions.remove(pos);
        self.save(&actions).await
    }

    /// Bumps the retry counter of one action. Returns the new count, or
    /// `None` when the action is missing or the bump could not be written.
    pub async fn increment_retry(&self, id: &str) -> Option<u32> {
        let _guard = self.lock.lock().await;
        let mut actions = self.load().await;
        let action = actions.iter_mut().find(|a| a.id == id)?;
        action.retry_count += 1;
        let retry_count = action.retry_count;
        // A bump that never reached the store did not happen.
        self.save(&actions).await.then_some(retry_count)
    }

    /// Drops every action whose retry budget is spent, in one write.
    pub async fn evict_exhausted(&self, max_retries: u32) -> Vec<QueuedAction> {
        let _guard = self.lock.lock().await;
        let (evicted, kept): (Vec<_>, Vec<_>) = self
            .load()
            .await
            .into_iter()
            .partition(|a| a.retry_count >= max_retries);
        if !evicted.is_empty() {
            self.save(&kept).await;
        }
        evicted
    }

    pub async fn clear(&self) {
        let _guard = self.lock.lock().await;
        if let Err(e) = self.store.remove(QUEUE_KEY).await {
            error!("Failed to clear offline queue: {e}");
        }
    }
}
