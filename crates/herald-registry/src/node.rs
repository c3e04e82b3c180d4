//! Published node model
//!
//! TigerStyle: The store sees opaque bytes; encoding lives here.

use crate::error::StoreResult;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Coarse application health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Logical AND of two samples
    pub fn and(self, other: HealthStatus) -> HealthStatus {
        if self.is_healthy() && other.is_healthy() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }
}

impl From<bool> for HealthStatus {
    fn from(healthy: bool) -> Self {
        if healthy {
            Self::Healthy
        } else {
            Self::Unhealthy
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Identity of a published node within a service
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey {
    pub host: String,
    pub port: u16,
}

impl NodeKey {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// What peers see for one published process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceNode {
    pub host: String,
    pub port: u16,
    pub environment: String,
    #[serde(rename = "healthcheckStatus")]
    pub health: HealthStatus,
    #[serde(rename = "lastUpdatedTimeStamp")]
    pub last_updated_ms: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Opaque to Herald; forwarded unmodified
    #[serde(default)]
    pub node_data: BTreeMap<String, String>,
}

impl ServiceNode {
    pub fn new(host: impl Into<String>, port: u16, environment: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            environment: environment.into(),
            health: HealthStatus::Healthy,
            last_updated_ms: 0,
            tags: Vec::new(),
            node_data: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.host.clone(), self.port)
    }

    /// Whether the node refreshed within `stale_after_ms` of `now_ms`
    pub fn is_fresh(&self, now_ms: u64, stale_after_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_updated_ms) <= stale_after_ms
    }

    pub fn encode(&self) -> StoreResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(data: &[u8]) -> StoreResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}
