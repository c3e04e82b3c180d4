//! In-memory coordination store
//!
//! TigerStyle: Models ZooKeeper sessions faithfully enough to test the
//! lifecycle engine: ephemeral nodes belong to a session, a disconnect keeps
//! them, an expiry deletes them, and a reconnect reports which one happened.
//!
//! `MemoryEnsemble` is the shared tree; every `MemoryStore` is one client
//! session into it, so several agents can share an ensemble.

use crate::error::{StoreError, StoreResult};
use crate::node::{NodeKey, ServiceNode};
use crate::store::{
    claim_path, node_path, service_path, ConnectionEvent, ConnectionListener, CoordinationStore,
    StoreOp,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct ZNode {
    data: Bytes,
    /// Owning session for ephemeral nodes
    ephemeral_owner: Option<u64>,
}

#[derive(Debug, Default)]
struct EnsembleInner {
    tree: RwLock<BTreeMap<String, ZNode>>,
    next_session_id: AtomicU64,
}

/// Shared in-memory tree standing in for a ZooKeeper ensemble
#[derive(Debug, Clone, Default)]
pub struct MemoryEnsemble {
    inner: Arc<EnsembleInner>,
}

impl MemoryEnsemble {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a client session rooted at `namespace`
    pub fn client(&self, namespace: impl Into<String>) -> MemoryStore {
        MemoryStore::new(self.clone(), namespace)
    }

    /// Every path currently in the tree
    pub async fn paths(&self) -> Vec<String> {
        self.inner.tree.read().await.keys().cloned().collect()
    }

    fn allocate_session(&self) -> u64 {
        self.inner.next_session_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn remove_ephemerals(&self, session_id: u64) -> usize {
        let mut tree = self.inner.tree.write().await;
        let before = tree.len();
        tree.retain(|_, znode| znode.ephemeral_owner != Some(session_id));
        before - tree.len()
    }
}

/// Injected behavior for the next matching call
#[derive(Debug, Clone)]
pub enum StoreFault {
    /// Return this error
    Fail(StoreError),
    /// Never complete; exercises caller timeouts
    Stall,
}

#[derive(Debug, Default)]
struct SessionState {
    session_id: Option<u64>,
    connected: bool,
    /// Session was expired while disconnected; the next reconnect opens a new one
    expired: bool,
    closed: bool,
}

/// One client session into a [`MemoryEnsemble`]
pub struct MemoryStore {
    ensemble: MemoryEnsemble,
    namespace: String,
    session: Mutex<SessionState>,
    listeners: Mutex<Vec<ConnectionListener>>,
    faults: Mutex<HashMap<StoreOp, VecDeque<StoreFault>>>,
    calls: Mutex<HashMap<StoreOp, u64>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("namespace", &self.namespace)
            .field("session", &*lock(&self.session))
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new(ensemble: MemoryEnsemble, namespace: impl Into<String>) -> Self {
        Self {
            ensemble,
            namespace: namespace.into(),
            session: Mutex::new(SessionState::default()),
            listeners: Mutex::new(Vec::new()),
            faults: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Standalone store with a private ensemble
    pub fn standalone(namespace: impl Into<String>) -> Self {
        Self::new(MemoryEnsemble::new(), namespace)
    }

    pub fn session_id(&self) -> Option<u64> {
        lock(&self.session).session_id
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.session).connected
    }

    /// Calls made for `op`, including failed ones
    pub fn call_count(&self, op: StoreOp) -> u64 {
        lock(&self.calls).get(&op).copied().unwrap_or(0)
    }

    /// Make the next `count` calls of `op` misbehave
    pub fn inject(&self, op: StoreOp, fault: StoreFault, count: usize) {
        let mut faults = lock(&self.faults);
        let queue = faults.entry(op).or_default();
        queue.extend(std::iter::repeat(fault).take(count));
    }

    /// Make the next `count` calls of `op` fail with `error`
    pub fn fail_next(&self, op: StoreOp, error: StoreError, count: usize) {
        self.inject(op, StoreFault::Fail(error), count);
    }

    /// Drop the connection; the session and its ephemeral nodes survive
    pub fn disconnect(&self) {
        {
            let mut session = lock(&self.session);
            if !session.connected {
                return;
            }
            session.connected = false;
        }
        info!(namespace = %self.namespace, "Store connection lost");
        self.emit(ConnectionEvent::Disconnected);
    }

    /// Expire the session: its ephemeral nodes are deleted immediately
    pub async fn expire_session(&self) {
        let expired_id = {
            let mut session = lock(&self.session);
            let id = session.session_id;
            session.expired = true;
            id
        };
        if let Some(session_id) = expired_id {
            let removed = self.ensemble.remove_ephemerals(session_id).await;
            info!(session_id = session_id, removed = removed, "Store session expired");
        }
        self.disconnect();
    }

    /// Restore the connection, opening a new session if the old one expired
    pub fn reconnect(&self) {
        let session_expired = {
            let mut session = lock(&self.session);
            if session.closed || session.connected {
                return;
            }
            let expired = session.expired;
            if expired || session.session_id.is_none() {
                session.session_id = Some(self.ensemble.allocate_session());
                session.expired = false;
            }
            session.connected = true;
            expired
        };
        info!(
            namespace = %self.namespace,
            session_expired = session_expired,
            "Store connection restored"
        );
        self.emit(ConnectionEvent::Reconnected { session_expired });
    }

    fn emit(&self, event: ConnectionEvent) {
        let listeners: Vec<ConnectionListener> = lock(&self.listeners).clone();
        for listener in listeners {
            listener(event);
        }
    }

    /// Count the call, apply any injected fault, then require a live session
    async fn begin(&self, op: StoreOp) -> StoreResult<u64> {
        *lock(&self.calls).entry(op).or_insert(0) += 1;

        let fault = lock(&self.faults).get_mut(&op).and_then(|q| q.pop_front());
        match fault {
            Some(StoreFault::Fail(err)) => {
                debug!(op = %op, error = %err, "Injected store failure");
                return Err(err);
            }
            Some(StoreFault::Stall) => {
                debug!(op = %op, "Injected store stall");
                std::future::pending::<()>().await;
            }
            None => {}
        }

        let session = lock(&self.session);
        if session.closed {
            return Err(StoreError::Closed);
        }
        match (session.connected, session.session_id) {
            (true, Some(id)) => Ok(id),
            _ if session.expired => Err(StoreError::SessionExpired {
                session_id: session.session_id.unwrap_or(0),
            }),
            _ => Err(StoreError::disconnected("no live session")),
        }
    }

}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn connect(&self) -> StoreResult<()> {
        *lock(&self.calls).entry(StoreOp::Connect).or_insert(0) += 1;
        let fault = lock(&self.faults)
            .get_mut(&StoreOp::Connect)
            .and_then(|q| q.pop_front());
        if let Some(StoreFault::Fail(err)) = fault {
            return Err(err);
        }

        let mut session = lock(&self.session);
        if session.closed {
            return Err(StoreError::Closed);
        }
        if session.session_id.is_none() || session.expired {
            session.session_id = Some(self.ensemble.allocate_session());
            session.expired = false;
        }
        session.connected = true;
        debug!(namespace = %self.namespace, session_id = ?session.session_id, "Store connected");
        Ok(())
    }

    async fn publish(&self, service: &str, node: &ServiceNode) -> StoreResult<()> {
        let session_id = self.begin(StoreOp::Publish).await?;
        let path = node_path(&self.namespace, service, &node.key());
        let data = node.encode()?;

        self.ensemble.inner.tree.write().await.insert(
            path,
            ZNode {
                data,
                ephemeral_owner: Some(session_id),
            },
        );
        Ok(())
    }

    async fn unpublish(&self, service: &str, key: &NodeKey) -> StoreResult<()> {
        self.begin(StoreOp::Unpublish).await?;
        let path = node_path(&self.namespace, service, key);
        self.ensemble.inner.tree.write().await.remove(&path);
        Ok(())
    }

    async fn list_nodes(&self, service: &str) -> StoreResult<Vec<ServiceNode>> {
        self.begin(StoreOp::ListNodes).await?;
        let prefix = format!("{}/", service_path(&self.namespace, service));
        let tree = self.ensemble.inner.tree.read().await;

        let mut nodes = Vec::new();
        for (path, znode) in tree.range(prefix.clone()..) {
            if !path.starts_with(&prefix) {
                break;
            }
            match ServiceNode::decode(&znode.data) {
                Ok(node) => nodes.push(node),
                Err(e) => warn!(path = %path, error = %e, "Skipping undecodable node"),
            }
        }
        Ok(nodes)
    }

    async fn claim_node_id(&self, service: &str, node_id: u16) -> StoreResult<bool> {
        let session_id = self.begin(StoreOp::ClaimNodeId).await?;
        let path = claim_path(&self.namespace, service, node_id);
        let mut tree = self.ensemble.inner.tree.write().await;

        match tree.get(&path) {
            Some(existing) => Ok(existing.ephemeral_owner == Some(session_id)),
            None => {
                tree.insert(
                    path,
                    ZNode {
                        data: Bytes::new(),
                        ephemeral_owner: Some(session_id),
                    },
                );
                Ok(true)
            }
        }
    }

    fn on_connection_event(&self, listener: ConnectionListener) {
        lock(&self.listeners).push(listener);
    }

    async fn close(&self) {
        let session_id = {
            let mut session = lock(&self.session);
            if session.closed {
                return;
            }
            session.closed = true;
            session.connected = false;
            session.session_id
        };
        if let Some(session_id) = session_id {
            let removed = self.ensemble.remove_ephemerals(session_id).await;
            debug!(session_id = session_id, removed = removed, "Store session closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::HealthStatus;
    use std::sync::atomic::AtomicUsize;

    fn node(host: &str, port: u16) -> ServiceNode {
        ServiceNode::new(host, port, "testing")
    }

    async fn connected(ensemble: &MemoryEnsemble) -> MemoryStore {
        let store = ensemble.client("test");
        store.connect().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_publish_list_unpublish() {
        let ensemble = MemoryEnsemble::new();
        let store = connected(&ensemble).await;

        store.publish("svc", &node("b-host", 2)).await.unwrap();
        store.publish("svc", &node("a-host", 1)).await.unwrap();
        store.publish("other", &node("c-host", 3)).await.unwrap();

        let listed = store.list_nodes("svc").await.unwrap();
        let hosts: Vec<_> = listed.iter().map(|n| n.host.as_str()).collect();
        assert_eq!(hosts, vec!["a-host", "b-host"]);

        store.unpublish("svc", &NodeKey::new("a-host", 1)).await.unwrap();
        assert_eq!(store.list_nodes("svc").await.unwrap().len(), 1);

        // Absent node is fine
        store.unpublish("svc", &NodeKey::new("a-host", 1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_is_upsert() {
        let store = MemoryStore::standalone("test");
        store.connect().await.unwrap();

        let mut n = node("h", 1);
        store.publish("svc", &n).await.unwrap();
        n.health = HealthStatus::Unhealthy;
        n.last_updated_ms = 99;
        store.publish("svc", &n).await.unwrap();

        let listed = store.list_nodes("svc").await.unwrap();
        assert_eq!(listed, vec![n]);
    }

    #[tokio::test]
    async fn test_ops_require_connection() {
        let store = MemoryStore::standalone("test");
        let err = store.publish("svc", &node("h", 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Disconnected { .. }));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_disconnect_keeps_ephemerals() {
        let ensemble = MemoryEnsemble::new();
        let store = connected(&ensemble).await;
        let observer = connected(&ensemble).await;

        store.publish("svc", &node("h", 1)).await.unwrap();
        store.disconnect();
        assert!(store.list_nodes("svc").await.is_err());
        assert_eq!(observer.list_nodes("svc").await.unwrap().len(), 1);

        let session = store.session_id();
        store.reconnect();
        assert_eq!(store.session_id(), session);
    }

    #[tokio::test]
    async fn test_expiry_drops_ephemerals_and_reports_on_reconnect() {
        let ensemble = MemoryEnsemble::new();
        let store = connected(&ensemble).await;
        let observer = connected(&ensemble).await;

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        store.on_connection_event(Arc::new(move |e| lock(&sink).push(e)));

        store.publish("svc", &node("h", 1)).await.unwrap();
        let old_session = store.session_id();
        store.expire_session().await;
        assert!(observer.list_nodes("svc").await.unwrap().is_empty());

        let err = store.publish("svc", &node("h", 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::SessionExpired { .. }));

        store.reconnect();
        assert_ne!(store.session_id(), old_session);
        assert_eq!(
            *lock(&events),
            vec![
                ConnectionEvent::Disconnected,
                ConnectionEvent::Reconnected {
                    session_expired: true
                }
            ]
        );
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = MemoryStore::standalone("test");
        store.connect().await.unwrap();
        store.fail_next(
            StoreOp::Publish,
            StoreError::Unauthorized {
                reason: "digest".into(),
            },
            2,
        );

        assert!(store.publish("svc", &node("h", 1)).await.is_err());
        assert!(store.publish("svc", &node("h", 1)).await.is_err());
        assert!(store.publish("svc", &node("h", 1)).await.is_ok());
        assert_eq!(store.call_count(StoreOp::Publish), 3);
    }

    #[tokio::test]
    async fn test_stall_never_completes() {
        let store = MemoryStore::standalone("test");
        store.connect().await.unwrap();
        store.inject(StoreOp::Unpublish, StoreFault::Stall, 1);

        let stalled = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            store.unpublish("svc", &NodeKey::new("h", 1)),
        )
        .await;
        assert!(stalled.is_err());
    }

    #[tokio::test]
    async fn test_node_id_claims() {
        let ensemble = MemoryEnsemble::new();
        let first = connected(&ensemble).await;
        let second = connected(&ensemble).await;

        assert!(first.claim_node_id("svc", 7).await.unwrap());
        assert!(first.claim_node_id("svc", 7).await.unwrap());
        assert!(!second.claim_node_id("svc", 7).await.unwrap());
        assert!(second.claim_node_id("svc", 8).await.unwrap());

        first.close().await;
        assert!(second.claim_node_id("svc", 7).await.unwrap());
    }

    #[tokio::test]
    async fn test_close_removes_ephemerals_and_rejects_calls() {
        let ensemble = MemoryEnsemble::new();
        let store = connected(&ensemble).await;
        store.publish("svc", &node("h", 1)).await.unwrap();

        store.close().await;
        assert!(ensemble.paths().await.is_empty());
        assert_eq!(
            store.list_nodes("svc").await.unwrap_err(),
            StoreError::Closed
        );
        assert_eq!(store.connect().await.unwrap_err(), StoreError::Closed);
    }

    #[tokio::test]
    async fn test_listeners_called_per_event() {
        let store = MemoryStore::standalone("test");
        store.connect().await.unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        store.on_connection_event(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        store.disconnect();
        store.disconnect();
        store.reconnect();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
