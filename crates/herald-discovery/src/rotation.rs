//! Operator rotation flag
//!
//! TigerStyle: Single atomic; admin tasks write, the lifecycle reads.
//!
//! One flag exists per agent. Clones share it, so the admin surface and the
//! lifecycle task observe the same value without further plumbing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Whether this node should be advertised for traffic
#[derive(Debug, Clone)]
pub struct RotationStatus {
    in_rotation: Arc<AtomicBool>,
}

impl RotationStatus {
    pub fn new(initial: bool) -> Self {
        Self {
            in_rotation: Arc::new(AtomicBool::new(initial)),
        }
    }

    pub fn is_in_rotation(&self) -> bool {
        self.in_rotation.load(Ordering::Acquire)
    }

    /// Set the flag, returning the previous value
    pub fn set(&self, in_rotation: bool) -> bool {
        let previous = self.in_rotation.swap(in_rotation, Ordering::AcqRel);
        if previous != in_rotation {
            info!(in_rotation = in_rotation, "Rotation status changed");
        }
        previous
    }

    /// Take the node out of rotation; returns whether anything changed
    pub fn oor(&self) -> bool {
        self.set(false)
    }

    /// Put the node back in rotation; returns whether anything changed
    pub fn bir(&self) -> bool {
        !self.set(true)
    }
}
