//! Discovery client
//!
//! Read side of the registry: lists peers of a service as seen in the store,
//! keeping only healthy, fresh nodes of the caller's environment.

use herald_core::constants::{
    HEALTH_CHECK_INTERVAL_SECS_DEFAULT, HEALTH_CHECK_STALENESS_SECS_DEFAULT,
};
use herald_core::{IoContext, RngProvider};
use herald_registry::{CoordinationStore, ServiceNode, StoreResult};
use std::sync::Arc;
use tracing::debug;

/// Nodes whose timestamp is older than this are presumed dead
///
/// A publisher refreshes every check interval; allow one staleness window
/// on top before giving up on it.
pub const CLIENT_STALE_AFTER_MS_DEFAULT: u64 =
    (HEALTH_CHECK_INTERVAL_SECS_DEFAULT + HEALTH_CHECK_STALENESS_SECS_DEFAULT) * 1000;

/// Looks up peers of one service in one environment
pub struct DiscoveryClient {
    store: Arc<dyn CoordinationStore>,
    service_name: String,
    environment: String,
    io: IoContext,
    stale_after_ms: u64,
}

impl std::fmt::Debug for DiscoveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryClient")
            .field("service_name", &self.service_name)
            .field("environment", &self.environment)
            .field("stale_after_ms", &self.stale_after_ms)
            .finish_non_exhaustive()
    }
}

impl DiscoveryClient {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        service_name: impl Into<String>,
        environment: impl Into<String>,
        io: IoContext,
    ) -> Self {
        Self {
            store,
            service_name: service_name.into(),
            environment: environment.into(),
            io,
            stale_after_ms: CLIENT_STALE_AFTER_MS_DEFAULT,
        }
    }

    pub fn with_stale_after_ms(mut self, stale_after_ms: u64) -> Self {
        self.stale_after_ms = stale_after_ms;
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Every usable node, ordered by host and port
    pub async fn get_all_nodes(&self) -> StoreResult<Vec<ServiceNode>> {
        let now_ms = self.io.now_ms();
        let listed = self.store.list_nodes(&self.service_name).await?;
        let total = listed.len();
        let nodes: Vec<ServiceNode> = listed
            .into_iter()
            .filter(|n| n.environment == self.environment)
            .filter(|n| n.health.is_healthy())
            .filter(|n| n.is_fresh(now_ms, self.stale_after_ms))
            .collect();
        debug!(
            service = %self.service_name,
            listed = total,
            usable = nodes.len(),
            "Listed service nodes"
        );
        Ok(nodes)
    }

    /// One usable node picked uniformly at random
    pub async fn get_node(&self) -> StoreResult<Option<ServiceNode>> {
        let mut nodes = self.get_all_nodes().await?;
        if nodes.is_empty() {
            return Ok(None);
        }
        let index = self.io.rng.gen_index(nodes.len());
        Ok(Some(nodes.swap_remove(index)))
    }
}
