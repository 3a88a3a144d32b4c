//! Pub/sub bridge management for the Redis backend
//!
//! One bridge task per topic per process, not one Redis connection per SSE
//! client: the bridge SUBSCRIBEs once and fans out into a local broadcast
//! channel, and subscriber handles are reference-counted so idle bridges are
//! torn down. `publish` goes to Redis only; everything a subscriber sees has
//! flowed Redis → bridge → local broadcast, so same-process publishes are
//! never delivered twice.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

const DEFAULT_BROADCAST_CAPACITY: usize = 10_000;

/// Manages pub/sub bridges for all topics
pub struct PubSubManager {
    bridges: RwLock<HashMap<String, Arc<PubSubBridge>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    broadcast_capacity: usize,
}

impl Default for PubSubManager {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }
}

impl PubSubManager {
    pub fn new(broadcast_capacity: usize) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            bridges: RwLock::new(HashMap::new()),
            shutdown_tx,
            shutdown_rx,
            broadcast_capacity,
        }
    }

    /// Get or create a bridge. `is_new` tells the caller to start the bridge
    /// task.
    pub fn get_or_create_bridge(&self, topic: &str) -> (Arc<PubSubBridge>, bool) {
        {
            let bridges = self.bridges.read();
            if let Some(bridge) = bridges.get(topic) {
                return (Arc::clone(bridge), false);
            }
        }

        let mut bridges = self.bridges.write();
        if let Some(bridge) = bridges.get(topic) {
            return (Arc::clone(bridge), false);
        }

        let bridge = Arc::new(PubSubBridge::new(
            topic.to_string(),
            self.broadcast_capacity,
            self.shutdown_rx.clone(),
        ));
        bridges.insert(topic.to_string(), Arc::clone(&bridge));
        (bridge, true)
    }

    /// Remove a bridge once its last subscriber is gone
    pub fn remove_bridge(&self, topic: &str) {
        let mut bridges = self.bridges.write();
        if let Some(bridge) = bridges.get(topic) {
            if bridge.subscriber_count() == 0 {
                bridge.stop();
                bridges.remove(topic);
                tracing::debug!(topic, "Removed idle pub/sub bridge");
            }
        }
    }

    pub fn get_bridge(&self, topic: &str) -> Option<Arc<PubSubBridge>> {
        self.bridges.read().get(topic).cloned()
    }

    /// Stop all bridge tasks
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let bridges: Vec<Arc<PubSubBridge>> = {
            let guard = self.bridges.read();
            guard.values().cloned().collect()
        };

        for bridge in bridges {
            bridge.wait_for_stop().await;
        }

        self.bridges.write().clear();
        tracing::debug!("PubSubManager shutdown complete");
    }
}

/// A pub/sub bridge for a single topic
pub struct PubSubBridge {
    topic: String,
    sender: broadcast::Sender<Vec<u8>>,
    subscriber_count: AtomicU64,
    task_handle: Mutex<Option<JoinHandle<()>>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl PubSubBridge {
    fn new(topic: String, capacity: usize, shutdown_rx: watch::Receiver<bool>) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        let (stop_tx, stop_rx) = watch::channel(false);

        Self {
            topic,
            sender,
            subscriber_count: AtomicU64::new(0),
            task_handle: Mutex::new(None),
            stop_tx,
            stop_rx,
            shutdown_rx,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn subscriber_count(&self) -> u64 {
        self.subscriber_count.load(Ordering::SeqCst)
    }

    pub fn add_subscriber(&self) -> u64 {
        self.subscriber_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn remove_subscriber(&self) -> u64 {
        let prev = self.subscriber_count.fetch_sub(1, Ordering::SeqCst);
        prev.saturating_sub(1)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.sender.subscribe()
    }

    pub fn send(&self, payload: Vec<u8>) -> Result<usize, broadcast::error::SendError<Vec<u8>>> {
        self.sender.send(payload)
    }

    pub fn is_task_running(&self) -> bool {
        self.task_handle.lock().is_some()
    }

    pub fn set_task(&self, handle: JoinHandle<()>) {
        let mut guard = self.task_handle.lock();
        if let Some(old) = guard.take() {
            tracing::warn!(topic = %self.topic, "Bridge task already set, replacing");
            old.abort();
        }
        *guard = Some(handle);
    }

    pub fn stop_rx(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub async fn wait_for_stop(&self) {
        let handle = self.task_handle.lock().take();
        if let Some(h) = handle {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(5), h).await;
        }
    }
}

/// Subscription handle that decrements the bridge refcount on drop
pub struct ManagedSubscription {
    receiver: broadcast::Receiver<Vec<u8>>,
    bridge: Arc<PubSubBridge>,
    manager: Arc<PubSubManager>,
}

impl ManagedSubscription {
    pub fn new(
        receiver: broadcast::Receiver<Vec<u8>>,
        bridge: Arc<PubSubBridge>,
        manager: Arc<PubSubManager>,
    ) -> Self {
        Self {
            receiver,
            bridge,
            manager,
        }
    }

    pub async fn recv(&mut self) -> Result<Vec<u8>, broadcast::error::RecvError> {
        self.receiver.recv().await
    }
}

impl Drop for ManagedSubscription {
    fn drop(&mut self) {
        let remaining = self.bridge.remove_subscriber();
        let topic = self.bridge.topic().to_string();

        tracing::trace!(topic, remaining, "Subscription dropped");

        if remaining == 0 {
            // Drop can't await; clean up from a task, with a short delay to
            // keep the bridge alive across quick reconnects
            let manager = Arc::clone(&self.manager);
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                manager.remove_bridge(&topic);
            });
        }
    }
}
