//! Server-start latch
//!
//! The hosting server calls [`ServerStatus::mark_started`] once it accepts
//! connections; the lifecycle never publishes before that.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// One-shot "server is accepting connections" barrier
#[derive(Debug, Clone)]
pub struct ServerStatus {
    started: Arc<watch::Sender<bool>>,
}

impl Default for ServerStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerStatus {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            started: Arc::new(tx),
        }
    }

    /// Trip the latch; repeated calls are no-ops
    pub fn mark_started(&self) {
        if !self.started.send_replace(true) {
            info!("Server marked as started");
        }
    }

    pub fn is_started(&self) -> bool {
        *self.started.borrow()
    }

    /// Resolves once the latch has tripped
    pub async fn wait_started(&self) {
        let mut rx = self.started.subscribe();
        // The sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(|started| *started).await;
    }
}
