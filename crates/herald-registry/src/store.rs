//! Coordination-store adapter trait
//!
//! TigerStyle: One narrow seam between the lifecycle engine and the
//! ZooKeeper-style ensemble.
//!
//! Layout: `/{namespace}/{service}/{host}:{port}` holds one ephemeral node
//! per published process. Ephemeral nodes vanish when their session expires
//! or the adapter closes.

use crate::error::StoreResult;
use crate::node::{NodeKey, ServiceNode};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Connection-state change reported by the store client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Connection lost; the session may survive if it comes back in time
    Disconnected,
    /// Connection restored; with `session_expired` every ephemeral node is gone
    Reconnected { session_expired: bool },
}

/// Callback invoked on the store client's event thread
///
/// Must not block and must not call back into the store.
pub type ConnectionListener = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

/// Path segment under which node-id reservations live
pub const NODE_ID_CLAIMS_SEGMENT: &str = "_node_ids";

/// `/{namespace}/{service}`: parent of every published node of a service
pub fn service_path(namespace: &str, service: &str) -> String {
    format!("/{}/{}", namespace, service)
}

/// `/{namespace}/{service}/{host}:{port}`
pub fn node_path(namespace: &str, service: &str, key: &NodeKey) -> String {
    format!("{}/{}", service_path(namespace, service), key)
}

/// `/{namespace}/_node_ids/{service}/{node_id:04}`
pub fn claim_path(namespace: &str, service: &str, node_id: u16) -> String {
    format!(
        "/{}/{}/{}/{:04}",
        namespace, NODE_ID_CLAIMS_SEGMENT, service, node_id
    )
}

/// Operations, as named in logs, timeouts and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreOp {
    Connect,
    Publish,
    Unpublish,
    ListNodes,
    ClaimNodeId,
}

impl StoreOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Publish => "publish",
            Self::Unpublish => "unpublish",
            Self::ListNodes => "list_nodes",
            Self::ClaimNodeId => "claim_node_id",
        }
    }
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coordination-store adapter
///
/// Implementations must be safe to call concurrently; the lifecycle task is
/// the only publisher, while discovery clients list from any task.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Establish a session; idempotent
    async fn connect(&self) -> StoreResult<()>;

    /// Create or replace this process's ephemeral node for `service`
    async fn publish(&self, service: &str, node: &ServiceNode) -> StoreResult<()>;

    /// Remove the node for `key`; removing an absent node succeeds
    async fn unpublish(&self, service: &str, key: &NodeKey) -> StoreResult<()>;

    /// All nodes published for `service`, ordered by key
    async fn list_nodes(&self, service: &str) -> StoreResult<Vec<ServiceNode>>;

    /// Ephemerally reserve `node_id` for `service`
    ///
    /// Returns false when another session holds it.
    async fn claim_node_id(&self, service: &str, node_id: u16) -> StoreResult<bool>;

    /// Subscribe to connection-state changes
    fn on_connection_event(&self, listener: ConnectionListener);

    /// Release the session and its ephemeral nodes
    async fn close(&self);
}
