//! Herald Registry
//!
//! The coordination-store seam and the published node model.
//!
//! # Overview
//!
//! - [`CoordinationStore`]: publish, unpublish, list and reserve against a
//!   ZooKeeper-style ensemble, plus connection-state callbacks
//! - [`ServiceNode`]: what peers see for one process
//! - [`ZooKeeperStore`]: the networked backend
//! - [`MemoryEnsemble`] / [`MemoryStore`]: in-process ensemble with sessions,
//!   ephemeral nodes, expiry and fault injection

pub mod error;
pub mod memory;
pub mod node;
pub mod store;
pub mod zookeeper;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryEnsemble, MemoryStore, StoreFault};
pub use node::{HealthStatus, NodeKey, ServiceNode};
pub use store::{ConnectionEvent, ConnectionListener, CoordinationStore, StoreOp};
pub use zookeeper::{ZooKeeperConfig, ZooKeeperStore};
