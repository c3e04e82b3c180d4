//! Node-id reservation
//!
//! Two processes that derive the same node id would mint colliding IDs. The
//! allocator claims the preferred id in the store and, when another session
//! holds it, walks forward through the printable range.

use herald_core::constants::NODE_ID_PROBE_COUNT_MAX;
use herald_idgen::NodeId;
use herald_registry::CoordinationStore;
use tracing::{info, warn};

/// Claims a node id unique among live sessions of one service
#[derive(Debug, Clone, Copy)]
pub struct NodeIdAllocator {
    candidates_count_max: u16,
}

impl Default for NodeIdAllocator {
    fn default() -> Self {
        Self {
            candidates_count_max: NODE_ID_PROBE_COUNT_MAX,
        }
    }
}

impl NodeIdAllocator {
    pub fn new(candidates_count_max: u16) -> Self {
        assert!(candidates_count_max > 0, "must try at least the preferred id");
        Self {
            candidates_count_max,
        }
    }

    /// Claim `preferred` or the first free id after it
    ///
    /// Falls back to `preferred` unclaimed when the store is unavailable or
    /// every candidate is taken; ID uniqueness then rests on the derivation.
    pub async fn reserve(
        &self,
        store: &dyn CoordinationStore,
        service: &str,
        preferred: NodeId,
    ) -> NodeId {
        for offset in 0..self.candidates_count_max {
            let candidate = preferred.wrapping_offset(offset);
            match store.claim_node_id(service, candidate.get()).await {
                Ok(true) => {
                    if offset > 0 {
                        info!(
                            preferred = %preferred,
                            node_id = %candidate,
                            "Preferred node id taken; using next free id"
                        );
                    }
                    return candidate;
                }
                Ok(false) => continue,
                Err(e) => {
                    warn!(
                        node_id = %preferred,
                        error = %e,
                        "Node id reservation failed; using preferred id unclaimed"
                    );
                    return preferred;
                }
            }
        }
        warn!(
            node_id = %preferred,
            tried = self.candidates_count_max,
            "No free node id found; using preferred id unclaimed"
        );
        preferred
    }
}
