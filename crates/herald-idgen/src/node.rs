//! Node identity
//!
//! TigerStyle: Node ids are validated at construction; an invalid id cannot exist.

use crate::error::{IdError, IdResult};
use crate::partition::{java_string_hash, non_negative};
use herald_core::constants::{ID_NODE_PRINTABLE_COUNT_MAX, NODE_ID_COUNT_MAX};
use std::fmt;

/// Small integer identifying this process among its peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u16);

impl NodeId {
    /// Create a node id in `[0, NODE_ID_COUNT_MAX)`
    pub fn new(id: u16) -> IdResult<Self> {
        if id >= NODE_ID_COUNT_MAX {
            return Err(IdError::InvalidNodeId {
                node_id: id as u32,
                limit: NODE_ID_COUNT_MAX,
            });
        }
        Ok(Self(id))
    }

    /// Derive a stable id from where the process is published
    ///
    /// Hashes `"{host}:{port}:{environment}"` with the Java string hash so
    /// JVM peers derive the same id, then reduces into the printable range.
    pub fn derive(host: &str, port: u16, environment: &str) -> Self {
        let key = format!("{}:{}:{}", host, port, environment);
        let id = non_negative(java_string_hash(&key)) % ID_NODE_PRINTABLE_COUNT_MAX as u32;
        debug_assert!(id < ID_NODE_PRINTABLE_COUNT_MAX as u32);
        Self(id as u16)
    }

    pub fn get(&self) -> u16 {
        self.0
    }

    /// Whether this id fits the three-digit node field of an ID
    pub fn is_printable(&self) -> bool {
        self.0 < ID_NODE_PRINTABLE_COUNT_MAX
    }

    /// The id `offset` places after this one, wrapping within the printable range
    pub fn wrapping_offset(&self, offset: u16) -> Self {
        let next = (self.0 as u32 + offset as u32) % ID_NODE_PRINTABLE_COUNT_MAX as u32;
        Self(next as u16)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for NodeId {
    type Error = IdError;

    fn try_from(id: u16) -> IdResult<Self> {
        Self::new(id)
    }
}
