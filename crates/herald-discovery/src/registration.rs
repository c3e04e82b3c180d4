//! What this process publishes
//!
//! Resolved once at build time and immutable afterwards.

use herald_core::constants::SERVICE_NAME_LENGTH_BYTES_MAX;
use herald_core::Error;
use herald_registry::{HealthStatus, NodeKey, ServiceNode};
use std::collections::BTreeMap;

/// Identity and metadata of the published node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRegistration {
    pub service_name: String,
    pub environment: String,
    pub host: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub node_data: BTreeMap<String, String>,
}

impl ServiceRegistration {
    pub fn new(
        service_name: impl Into<String>,
        environment: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            environment: environment.into(),
            host: host.into(),
            port,
            tags: Vec::new(),
            node_data: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        validate_service_name(&self.service_name)?;
        if self.host.is_empty() {
            return Err(Error::invalid_config("host", "must not be empty"));
        }
        if self.host.contains('/') {
            return Err(Error::invalid_config("host", "must not contain '/'"));
        }
        if self.port == 0 {
            return Err(Error::invalid_config("port", "must be positive"));
        }
        Ok(())
    }

    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.host.clone(), self.port)
    }

    /// Node payload stamped with `now_ms` wall time
    pub fn to_node(&self, health: HealthStatus, now_ms: u64) -> ServiceNode {
        let mut node = ServiceNode::new(self.host.clone(), self.port, self.environment.clone());
        node.health = health;
        node.last_updated_ms = now_ms;
        node.tags = self.tags.clone();
        node.node_data = self.node_data.clone();
        node
    }
}

/// Service names become a single path segment in the store
pub fn validate_service_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::invalid_config("service_name", "must not be empty"));
    }
    if name.len() > SERVICE_NAME_LENGTH_BYTES_MAX {
        return Err(Error::invalid_config(
            "service_name",
            format!("must be at most {} bytes", SERVICE_NAME_LENGTH_BYTES_MAX),
        ));
    }
    if name.contains('/') || name.starts_with('_') {
        return Err(Error::invalid_config(
            "service_name",
            "must not contain '/' or start with '_'",
        ));
    }
    Ok(())
}
