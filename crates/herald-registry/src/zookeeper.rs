//! ZooKeeper coordination store
//!
//! TigerStyle: One live session at a time, replaced lazily after expiry;
//! every ZooKeeper error code lands on exactly one `StoreError`.
//!
//! # Layout
//!
//! ```text
//! /{namespace}/{service}/{host}:{port}            ephemeral, ServiceNode (JSON)
//! /{namespace}/_node_ids/{service}/{node_id:04}   ephemeral, owner token
//! ```
//!
//! Parents are created as persistent nodes on first use.
//!
//! # Sessions
//!
//! The client library reconnects a dropped connection on its own and keeps
//! the session; that surfaces as `Disconnected` then
//! `Reconnected { session_expired: false }`. An expired session is terminal
//! for its client, so the next call opens a fresh one and reports
//! `Reconnected { session_expired: true }`.

use crate::error::{StoreError, StoreResult};
use crate::node::{NodeKey, ServiceNode};
use crate::store::{
    claim_path, node_path, service_path, ConnectionEvent, ConnectionListener, CoordinationStore,
    StoreOp,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zookeeper_client as zk;

/// Session timeout requested from the ensemble
pub const ZK_SESSION_TIMEOUT_MS_DEFAULT: u64 = 10_000;

/// Smallest session timeout ZooKeeper servers accept by default (2 × tick)
pub const ZK_SESSION_TIMEOUT_MS_MIN: u64 = 4_000;

/// Connection settings for [`ZooKeeperStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZooKeeperConfig {
    /// `host:port[,host:port...]`
    pub connect_string: String,
    /// First path segment of every node
    pub namespace: String,
    pub session_timeout_ms: u64,
}

impl ZooKeeperConfig {
    pub fn new(connect_string: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            connect_string: connect_string.into(),
            namespace: namespace.into(),
            session_timeout_ms: ZK_SESSION_TIMEOUT_MS_DEFAULT,
        }
    }

    pub fn with_session_timeout_ms(mut self, session_timeout_ms: u64) -> Self {
        self.session_timeout_ms = session_timeout_ms;
        self
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.connect_string.trim().is_empty() {
            return Err(StoreError::rejected("connect", "empty connect string"));
        }
        if self.namespace.is_empty() || self.namespace.contains('/') {
            return Err(StoreError::rejected(
                "connect",
                format!("invalid namespace '{}'", self.namespace),
            ));
        }
        if self.session_timeout_ms < ZK_SESSION_TIMEOUT_MS_MIN {
            return Err(StoreError::rejected(
                "connect",
                format!(
                    "session timeout {}ms below {}ms",
                    self.session_timeout_ms, ZK_SESSION_TIMEOUT_MS_MIN
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Default)]
struct SessionSlot {
    client: Option<zk::Client>,
    /// Bumped for every new session; stands in for the session id in errors
    generation: u64,
    /// The last session expired and has not been replaced yet
    expired: bool,
}

/// What one session-state change means for listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SessionStep {
    event: Option<ConnectionEvent>,
    connected: bool,
    expired: bool,
    terminal: bool,
}

fn observe(state: zk::SessionState, connected: bool) -> SessionStep {
    let lost = connected.then_some(ConnectionEvent::Disconnected);
    match state {
        zk::SessionState::SyncConnected | zk::SessionState::ConnectedReadOnly => SessionStep {
            event: (!connected).then_some(ConnectionEvent::Reconnected {
                session_expired: false,
            }),
            connected: true,
            expired: false,
            terminal: false,
        },
        zk::SessionState::Disconnected => SessionStep {
            event: lost,
            connected: false,
            expired: false,
            terminal: false,
        },
        zk::SessionState::Expired => SessionStep {
            event: lost,
            connected: false,
            expired: true,
            terminal: true,
        },
        // AuthFailed and Closed end the session without a replacement
        _ => SessionStep {
            event: lost,
            connected: false,
            expired: false,
            terminal: true,
        },
    }
}

/// Translate a client error for `op` on `path`
fn map_error(op: StoreOp, path: &str, generation: u64, err: &zk::Error) -> StoreError {
    match err {
        zk::Error::SessionExpired => StoreError::SessionExpired {
            session_id: generation,
        },
        zk::Error::AuthFailed => StoreError::Unauthorized {
            reason: err.to_string(),
        },
        zk::Error::NoAuth => StoreError::AclDenied {
            operation: op.to_string(),
            path: path.to_string(),
        },
        zk::Error::ClientClosed => StoreError::Closed,
        zk::Error::ConnectionLoss => {
            StoreError::disconnected(format!("connection lost during {}", op))
        }
        // An unreachable ensemble fails the handshake in several ways; all are worth retrying
        _ if op == StoreOp::Connect => StoreError::disconnected(err.to_string()),
        _ => StoreError::rejected(op.as_str(), format!("{} on {}", err, path)),
    }
}

fn persistent() -> zk::CreateOptions<'static> {
    zk::CreateMode::Persistent.with_acls(zk::Acls::anyone_all())
}

fn ephemeral() -> zk::CreateOptions<'static> {
    zk::CreateMode::Ephemeral.with_acls(zk::Acls::anyone_all())
}

/// Every proper ancestor of `path`, shallowest first
fn ancestors(path: &str) -> Vec<String> {
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    (1..segments.len())
        .map(|depth| format!("/{}", segments[..depth].join("/")))
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn emit(listeners: &Mutex<Vec<ConnectionListener>>, event: ConnectionEvent) {
    let listeners: Vec<ConnectionListener> = lock(listeners).clone();
    for listener in listeners {
        listener(event);
    }
}

/// [`CoordinationStore`] backed by a ZooKeeper ensemble
pub struct ZooKeeperStore {
    config: ZooKeeperConfig,
    slot: Arc<Mutex<SessionSlot>>,
    /// Serializes session establishment
    connecting: tokio::sync::Mutex<()>,
    listeners: Arc<Mutex<Vec<ConnectionListener>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    /// Written into claim nodes so a re-claim by this process is recognized
    owner: String,
}

impl std::fmt::Debug for ZooKeeperStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZooKeeperStore")
            .field("config", &self.config)
            .field("generation", &lock(&self.slot).generation)
            .finish_non_exhaustive()
    }
}

impl ZooKeeperStore {
    /// Create an adapter; no connection is made until [`CoordinationStore::connect`]
    pub fn new(config: ZooKeeperConfig) -> StoreResult<Self> {
        config.validate()?;
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Ok(Self {
            config,
            slot: Arc::new(Mutex::new(SessionSlot::default())),
            connecting: tokio::sync::Mutex::new(()),
            listeners: Arc::new(Mutex::new(Vec::new())),
            watcher: Mutex::new(None),
            closed: AtomicBool::new(false),
            owner: format!("{}-{}", std::process::id(), nonce),
        })
    }

    pub fn config(&self) -> &ZooKeeperConfig {
        &self.config
    }

    /// The current client, opening a session if there is none
    async fn session(&self) -> StoreResult<(zk::Client, u64)> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        {
            let slot = lock(&self.slot);
            if let Some(client) = &slot.client {
                return Ok((client.clone(), slot.generation));
            }
        }

        let _connecting = self.connecting.lock().await;
        {
            let slot = lock(&self.slot);
            if let Some(client) = &slot.client {
                return Ok((client.clone(), slot.generation));
            }
        }

        let client = zk::Client::connector()
            .session_timeout(Duration::from_millis(self.config.session_timeout_ms))
            .connect(&self.config.connect_string)
            .await
            .map_err(|e| map_error(StoreOp::Connect, &self.config.connect_string, 0, &e))?;

        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        let (generation, replaced_expired) = {
            let mut slot = lock(&self.slot);
            slot.generation += 1;
            slot.client = Some(client.clone());
            let replaced = std::mem::take(&mut slot.expired);
            (slot.generation, replaced)
        };
        self.watch(&client, generation);
        info!(
            connect_string = %self.config.connect_string,
            generation = generation,
            "ZooKeeper session established"
        );

        if replaced_expired {
            emit(
                &self.listeners,
                ConnectionEvent::Reconnected {
                    session_expired: true,
                },
            );
        }
        Ok((client, generation))
    }

    /// Forward session-state changes of `client` to listeners
    fn watch(&self, client: &zk::Client, generation: u64) {
        let mut states = client.state_watcher();
        let slot = self.slot.clone();
        let listeners = self.listeners.clone();

        let handle = tokio::spawn(async move {
            let mut connected = true;
            loop {
                let state = states.changed().await;
                debug!(state = ?state, generation = generation, "ZooKeeper session state changed");
                let auth_failed = matches!(state, zk::SessionState::AuthFailed);
                let step = observe(state, connected);
                connected = step.connected;

                if step.terminal {
                    let mut slot = lock(&slot);
                    if slot.generation == generation {
                        slot.client = None;
                        slot.expired = step.expired;
                    }
                }
                if let Some(event) = step.event {
                    emit(&listeners, event);
                }
                if step.terminal {
                    if step.expired {
                        warn!(generation = generation, "ZooKeeper session expired");
                    } else if auth_failed {
                        error!(generation = generation, "ZooKeeper authentication failed");
                    }
                    break;
                }
            }
        });

        if let Some(previous) = lock(&self.watcher).replace(handle) {
            previous.abort();
        }
    }

    /// Map `err` and drop the session if the ensemble says it is gone
    fn fail(&self, op: StoreOp, path: &str, generation: u64, err: zk::Error) -> StoreError {
        let mapped = map_error(op, path, generation, &err);
        if matches!(mapped, StoreError::SessionExpired { .. }) {
            let mut slot = lock(&self.slot);
            if slot.generation == generation {
                slot.client = None;
                slot.expired = true;
            }
        }
        mapped
    }

    /// Create an ephemeral node, creating missing persistent parents once
    async fn create_ephemeral(
        &self,
        client: &zk::Client,
        path: &str,
        data: &[u8],
    ) -> Result<(), zk::Error> {
        match client.create(path, data, &ephemeral()).await {
            Err(zk::Error::NoNode) => {
                for parent in ancestors(path) {
                    match client.create(&parent, &[], &persistent()).await {
                        Ok(_) | Err(zk::Error::NodeExists) => {}
                        Err(e) => return Err(e),
                    }
                }
                debug!(path = %path, "Created missing parents");
                client.create(path, data, &ephemeral()).await.map(|_| ())
            }
            other => other.map(|_| ()),
        }
    }
}

#[async_trait]
impl CoordinationStore for ZooKeeperStore {
    async fn connect(&self) -> StoreResult<()> {
        self.session().await.map(|_| ())
    }

    async fn publish(&self, service: &str, node: &ServiceNode) -> StoreResult<()> {
        let (client, generation) = self.session().await?;
        let path = node_path(&self.config.namespace, service, &node.key());
        let data = node.encode()?;

        match self.create_ephemeral(&client, &path, &data).await {
            Ok(()) => Ok(()),
            Err(zk::Error::NodeExists) => client
                .set_data(&path, &data, None)
                .await
                .map(|_| ())
                .map_err(|e| self.fail(StoreOp::Publish, &path, generation, e)),
            Err(e) => Err(self.fail(StoreOp::Publish, &path, generation, e)),
        }
    }

    async fn unpublish(&self, service: &str, key: &NodeKey) -> StoreResult<()> {
        let (client, generation) = self.session().await?;
        let path = node_path(&self.config.namespace, service, key);
        match client.delete(&path, None).await {
            Ok(()) | Err(zk::Error::NoNode) => Ok(()),
            Err(e) => Err(self.fail(StoreOp::Unpublish, &path, generation, e)),
        }
    }

    async fn list_nodes(&self, service: &str) -> StoreResult<Vec<ServiceNode>> {
        let (client, generation) = self.session().await?;
        let parent = service_path(&self.config.namespace, service);
        let mut children = match client.get_children(&parent).await {
            Ok((children, _)) => children,
            Err(zk::Error::NoNode) => return Ok(Vec::new()),
            Err(e) => return Err(self.fail(StoreOp::ListNodes, &parent, generation, e)),
        };
        children.sort();

        let mut nodes = Vec::with_capacity(children.len());
        for child in children {
            let path = format!("{}/{}", parent, child);
            match client.get_data(&path).await {
                Ok((data, _)) => match ServiceNode::decode(&data) {
                    Ok(node) => nodes.push(node),
                    Err(e) => warn!(path = %path, error = %e, "Skipping undecodable node"),
                },
                // Unpublished between listing and reading
                Err(zk::Error::NoNode) => {}
                Err(e) => return Err(self.fail(StoreOp::ListNodes, &path, generation, e)),
            }
        }
        Ok(nodes)
    }

    async fn claim_node_id(&self, service: &str, node_id: u16) -> StoreResult<bool> {
        let (client, generation) = self.session().await?;
        let path = claim_path(&self.config.namespace, service, node_id);
        let owner = self.owner.as_bytes();

        match self.create_ephemeral(&client, &path, owner).await {
            Ok(()) => Ok(true),
            Err(zk::Error::NodeExists) => match client.get_data(&path).await {
                Ok((data, _)) => Ok(data == owner),
                // Holder went away in between; the next candidate will do
                Err(zk::Error::NoNode) => Ok(false),
                Err(e) => Err(self.fail(StoreOp::ClaimNodeId, &path, generation, e)),
            },
            Err(e) => Err(self.fail(StoreOp::ClaimNodeId, &path, generation, e)),
        }
    }

    fn on_connection_event(&self, listener: ConnectionListener) {
        lock(&self.listeners).push(listener);
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.abort();
        }
        // Dropping the last handle closes the session and its ephemeral nodes
        let client = lock(&self.slot).client.take();
        drop(client);
        info!(connect_string = %self.config.connect_string, "ZooKeeper store closed");
    }
}
