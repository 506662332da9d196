//! Connectivity tracking.
//!
//! `NetworkMonitor` owns the current `NetworkState`. A `ConnectivityProbe` is
//! the platform seam: native glue can push states through `set_state`, and the
//! shipped `HttpProbe` derives connectivity from reaching the backend.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod probe;

pub use probe::HttpProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Wifi,
    Cellular,
    Ethernet,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    pub is_connected: bool,
    pub transport: Option<Transport>,
}

impl NetworkState {
    pub fn online(transport: Transport) -> Self {
        Self {
            is_connected: true,
            transport: Some(transport),
        }
    }

    pub fn offline() -> Self {
        Self {
            is_connected: false,
            transport: None,
        }
    }
}

/// Platform connectivity query.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn query(&self) -> anyhow::Result<NetworkState>;
}

type Callback = Arc<dyn Fn(&NetworkState) + Send + Sync>;

struct Inner {
    state: NetworkState,
    subscribers: Vec<(u64, Callback)>,
    next_id: u64,
}

pub struct NetworkMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    inner: Mutex<Inner>,
    changes: watch::Sender<NetworkState>,
}

impl NetworkMonitor {
    /// Queries the probe once for the initial state. If that fails the
    /// monitor starts offline until the first successful query.
    pub async fn new(probe: Arc<dyn ConnectivityProbe>) -> Arc<Self> {
        let initial = match probe.query().await {
            Ok(state) => state,
            Err(e) => {
                warn!("Initial connectivity query failed, assuming offline: {e}");
                NetworkState::offline()
            }
        };
        info!(
            "Network monitor started (connected: {}, transport: {:?})",
            initial.is_connected, initial.transport
        );
        let (changes, _) = watch::channel(initial);
        Arc::new(Self {
            probe,
            inner: Mutex::new(Inner {
                state: initial,
                subscribers: Vec::new(),
                next_id: 0,
            }),
            changes,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Subscriber callbacks run outside the lock, so poisoning can only come
        // from a panic inside this module; the data is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn current(&self) -> NetworkState {
        self.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.current().is_connected
    }

    /// Registers a callback invoked synchronously on every state change.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(&NetworkState) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, Arc::new(callback)));
        Subscription {
            id,
            monitor: Arc::downgrade(self),
            active: Mutex::new(true),
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.lock().subscribers.retain(|(sid, _)| *sid != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Async view of state changes, for consumers that await transitions.
    pub fn changes(&self) -> watch::Receiver<NetworkState> {
        self.changes.subscribe()
    }

    /// Publishes a new state. Identical states are ignored.
    pub fn set_state(&self, state: NetworkState) {
        let callbacks: Vec<Callback> = {
            let mut inner = self.lock();
            if inner.state == state {
                return;
            }
            inner.state = state;
            // Published under the lock so `changes()` never lags `current()`.
            self.changes.send_replace(state);
            inner.subscribers.iter().map(|(_, cb)| cb.clone()).collect()
        };
        info!(
            "Network state changed (connected: {}, transport: {:?})",
            state.is_connected, state.transport
        );
        for callback in callbacks {
            callback(&state);
        }
    }

    /// Re-queries the probe. A failed query keeps the last-known state.
    pub async fn refresh(&self) -> NetworkState {
        match self.probe.query().await {
            Ok(state) => self.set_state(state),
            Err(e) => debug!("Connectivity query failed, keeping last state: {e}"),
        }
        self.current()
    }

    /// Polls the probe every `interval` until the handle is aborted.
    pub fn watch(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let monitor = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                monitor.refresh().await;
            }
        })
    }
}

/// Handle returned by `subscribe`. Unsubscribes on drop.
pub struct Subscription {
    id: u64,
    monitor: Weak<NetworkMonitor>,
    active: Mutex<bool>,
}

impl Subscription {
    /// Removes this registration. Calling it again does nothing.
    pub fn unsubscribe(&self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !*active {
            return;
        }
        *active = false;
        if let Some(monitor) = self.monitor.upgrade() {
            monitor.unsubscribe(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
