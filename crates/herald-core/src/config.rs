//! Configuration for Herald
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.
//!
//! Keys are camelCase so existing service-discovery configuration blocks
//! deserialize unchanged.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Service-discovery configuration block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfig {
    /// Coordination-store connection string
    #[serde(default = "default_zookeeper")]
    pub zookeeper: String,

    /// Top-level path prefix under which services are published
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Logical deployment tag, e.g. "stage"
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Host peers will see; resolved from the machine when absent
    #[serde(default)]
    pub published_host: Option<String>,

    /// Port peers will see; the server's port when absent
    #[serde(default)]
    pub published_port: Option<u16>,

    /// Starting value of the rotation flag
    #[serde(default = "default_initial_rotation_status")]
    pub initial_rotation_status: bool,

    /// Probe and lifecycle period (seconds)
    #[serde(default = "default_check_interval")]
    pub dropwizard_check_interval: u64,

    /// Health window length (seconds)
    #[serde(default = "default_check_staleness")]
    pub dropwizard_check_staleness: u64,

    /// Backoff between coordination-store reconnect attempts
    #[serde(default = "default_connection_retry_interval_millis")]
    pub connection_retry_interval_millis: u64,

    /// Fixed node id; derived from host, port and environment when absent
    #[serde(default)]
    pub node_id: Option<u16>,

    /// Budget for the best-effort unpublish during stop
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Timeout applied to each coordination-store call
    #[serde(default = "default_store_operation_timeout_ms")]
    pub store_operation_timeout_ms: u64,
}

fn default_zookeeper() -> String {
    "localhost:2181".to_string()
}

fn default_namespace() -> String {
    "herald".to_string()
}

fn default_environment() -> String {
    "default".to_string()
}

fn default_initial_rotation_status() -> bool {
    true
}

fn default_check_interval() -> u64 {
    HEALTH_CHECK_INTERVAL_SECS_DEFAULT
}

fn default_check_staleness() -> u64 {
    HEALTH_CHECK_STALENESS_SECS_DEFAULT
}

fn default_connection_retry_interval_millis() -> u64 {
    STORE_RECONNECT_INTERVAL_MS_DEFAULT
}

fn default_shutdown_timeout_ms() -> u64 {
    SHUTDOWN_TIMEOUT_MS_DEFAULT
}

fn default_store_operation_timeout_ms() -> u64 {
    STORE_OPERATION_TIMEOUT_MS_DEFAULT
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            zookeeper: default_zookeeper(),
            namespace: default_namespace(),
            environment: default_environment(),
            published_host: None,
            published_port: None,
            initial_rotation_status: default_initial_rotation_status(),
            dropwizard_check_interval: default_check_interval(),
            dropwizard_check_staleness: default_check_staleness(),
            connection_retry_interval_millis: default_connection_retry_interval_millis(),
            node_id: None,
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            store_operation_timeout_ms: default_store_operation_timeout_ms(),
        }
    }
}

impl DiscoveryConfig {
    /// Load from a JSON file and validate
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::ConfigurationUnreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&raw)
    }

    /// Parse from JSON text and validate
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| Error::invalid_config("json", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the connection string
    pub fn with_zookeeper(mut self, zookeeper: impl Into<String>) -> Self {
        self.zookeeper = zookeeper.into();
        self
    }

    /// Set the namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the environment
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Override the published host
    pub fn with_published_host(mut self, host: impl Into<String>) -> Self {
        self.published_host = Some(host.into());
        self
    }

    /// Override the published port
    pub fn with_published_port(mut self, port: u16) -> Self {
        self.published_port = Some(port);
        self
    }

    /// Set the initial rotation status
    pub fn with_initial_rotation_status(mut self, in_rotation: bool) -> Self {
        self.initial_rotation_status = in_rotation;
        self
    }

    /// Set the probe interval and staleness window (seconds)
    pub fn with_health_checks(mut self, interval_secs: u64, staleness_secs: u64) -> Self {
        self.dropwizard_check_interval = interval_secs;
        self.dropwizard_check_staleness = staleness_secs;
        self
    }

    /// Pin the node id
    pub fn with_node_id(mut self, node_id: u16) -> Self {
        self.node_id = Some(node_id);
        self
    }

    /// Probe and lifecycle period in milliseconds
    pub fn check_interval_ms(&self) -> u64 {
        self.dropwizard_check_interval.saturating_mul(1000)
    }

    /// Staleness window in milliseconds
    pub fn check_staleness_ms(&self) -> u64 {
        self.dropwizard_check_staleness.saturating_mul(1000)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.zookeeper.trim().is_empty() {
            return Err(Error::invalid_config("zookeeper", "must not be empty"));
        }
        if self.namespace.is_empty() {
            return Err(Error::invalid_config("namespace", "must not be empty"));
        }
        if self.namespace.contains('/') {
            return Err(Error::invalid_config("namespace", "must not contain '/'"));
        }
        if self.environment.is_empty() {
            return Err(Error::invalid_config("environment", "must not be empty"));
        }
        if let Some(host) = &self.published_host {
            if host.trim().is_empty() || host.contains('/') {
                return Err(Error::invalid_config(
                    "publishedHost",
                    format!("malformed host '{}'", host),
                ));
            }
        }
        if self.published_port == Some(0) {
            return Err(Error::invalid_config("publishedPort", "must be > 0"));
        }
        if self.dropwizard_check_interval == 0 {
            return Err(Error::invalid_config(
                "dropwizardCheckInterval",
                "must be > 0",
            ));
        }
        if self.dropwizard_check_staleness == 0 {
            return Err(Error::invalid_config(
                "dropwizardCheckStaleness",
                "must be > 0",
            ));
        }
        if self.connection_retry_interval_millis == 0 {
            return Err(Error::invalid_config(
                "connectionRetryIntervalMillis",
                "must be > 0",
            ));
        }
        if let Some(node_id) = self.node_id {
            if node_id >= ID_NODE_PRINTABLE_COUNT_MAX {
                return Err(Error::invalid_config(
                    "nodeId",
                    format!("must be < {}", ID_NODE_PRINTABLE_COUNT_MAX),
                ));
            }
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(Error::invalid_config("shutdownTimeoutMs", "must be > 0"));
        }
        if self.store_operation_timeout_ms == 0 {
            return Err(Error::invalid_config(
                "storeOperationTimeoutMs",
                "must be > 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DiscoveryConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.initial_rotation_status);
        assert_eq!(config.check_interval_ms(), 15_000);
        assert_eq!(config.check_staleness_ms(), 30_000);
    }

    #[test]
    fn test_camel_case_keys() {
        let raw = r#"{
            "zookeeper": "zk-1:2181,zk-2:2181",
            "namespace": "test",
            "environment": "testing",
            "connectionRetryIntervalMillis": 5000,
            "publishedHost": "TestHost",
            "publishedPort": 8021,
            "initialRotationStatus": true,
            "dropwizardCheckInterval": 2,
            "dropwizardCheckStaleness": 2
        }"#;
        let config = DiscoveryConfig::from_json_str(raw).unwrap();
        assert_eq!(config.namespace, "test");
        assert_eq!(config.environment, "testing");
        assert_eq!(config.published_host.as_deref(), Some("TestHost"));
        assert_eq!(config.published_port, Some(8021));
        assert_eq!(config.check_interval_ms(), 2000);
        assert_eq!(config.node_id, None);
    }

    #[test]
    fn test_zookeeper_override() {
        let config = DiscoveryConfig::default().with_zookeeper("zk-9:2181");
        assert_eq!(config.zookeeper, "zk-9:2181");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let config = DiscoveryConfig::from_json_str("{}").unwrap();
        assert_eq!(config, DiscoveryConfig::default());
    }

    #[test]
    fn test_validation_rejects_zero_interval() {
        let config = DiscoveryConfig::default().with_health_checks(0, 2);
        match config.validate() {
            Err(Error::InvalidConfiguration { field, .. }) => {
                assert_eq!(field, "dropwizardCheckInterval")
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_validation_rejects_bad_overrides() {
        assert!(DiscoveryConfig::default()
            .with_published_port(0)
            .validate()
            .is_err());
        assert!(DiscoveryConfig::default()
            .with_published_host("  ")
            .validate()
            .is_err());
        assert!(DiscoveryConfig::default()
            .with_namespace("a/b")
            .validate()
            .is_err());
        assert!(DiscoveryConfig::default()
            .with_node_id(1000)
            .validate()
            .is_err());
        assert!(DiscoveryConfig::default()
            .with_node_id(999)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_negative_interval_is_a_parse_error() {
        let err = DiscoveryConfig::from_json_str(r#"{"dropwizardCheckInterval": -1}"#);
        assert!(matches!(err, Err(Error::InvalidConfiguration { .. })));
    }
}
