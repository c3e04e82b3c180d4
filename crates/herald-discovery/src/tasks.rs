//! Admin tasks
//!
//! `oor` takes the node out of rotation, `bir` puts it back. Both only flip
//! the rotation flag; the lifecycle converges on its next tick.

use crate::rotation::RotationStatus;
use std::fmt;

/// Result of running an admin task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub task: String,
    /// Rotation flag after the task ran
    pub in_rotation: bool,
    /// False when the task was a no-op
    pub changed: bool,
}

/// Operator command exposed on the admin surface
pub trait AdminTask: Send + Sync + fmt::Debug {
    /// Name under which the task is addressed
    fn name(&self) -> &str;

    /// Run the task; idempotent
    fn execute(&self) -> TaskOutcome;
}

/// Out of rotation
#[derive(Debug, Clone)]
pub struct OorTask {
    rotation: RotationStatus,
}

impl OorTask {
    pub const NAME: &'static str = "oor";

    pub fn new(rotation: RotationStatus) -> Self {
        Self { rotation }
    }
}

impl AdminTask for OorTask {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn execute(&self) -> TaskOutcome {
        let changed = self.rotation.oor();
        TaskOutcome {
            task: Self::NAME.to_string(),
            in_rotation: self.rotation.is_in_rotation(),
            changed,
        }
    }
}

/// Back in rotation
#[derive(Debug, Clone)]
pub struct BirTask {
    rotation: RotationStatus,
}

impl BirTask {
    pub const NAME: &'static str = "bir";

    pub fn new(rotation: RotationStatus) -> Self {
        Self { rotation }
    }
}

impl AdminTask for BirTask {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn execute(&self) -> TaskOutcome {
        let changed = self.rotation.bir();
        TaskOutcome {
            task: Self::NAME.to_string(),
            in_rotation: self.rotation.is_in_rotation(),
            changed,
        }
    }
}
