//! ID validation constraints
//!
//! Constraints are pure predicates consulted by
//! [`IdGenerator::generate_with_constraints`](crate::IdGenerator::generate_with_constraints).

use crate::id::Id;
use crate::partition::KeyPartitioner;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Predicate an ID must satisfy to be handed out
pub trait IdConstraint: Send + Sync {
    fn is_valid(&self, id: &Id) -> bool;
}

impl<F> IdConstraint for F
where
    F: Fn(&Id) -> bool + Send + Sync,
{
    fn is_valid(&self, id: &Id) -> bool {
        self(id)
    }
}

/// Accepts IDs whose partition falls in an allowed set
#[derive(Clone)]
pub struct PartitionConstraint {
    partitioner: Arc<dyn KeyPartitioner>,
    allowed: BTreeSet<u32>,
}

impl PartitionConstraint {
    pub fn new(
        partitioner: Arc<dyn KeyPartitioner>,
        allowed: impl IntoIterator<Item = u32>,
    ) -> Self {
        Self {
            partitioner,
            allowed: allowed.into_iter().collect(),
        }
    }

    pub fn allowed(&self) -> &BTreeSet<u32> {
        &self.allowed
    }
}

impl fmt::Debug for PartitionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionConstraint")
            .field("allowed", &self.allowed)
            .finish_non_exhaustive()
    }
}

impl IdConstraint for PartitionConstraint {
    fn is_valid(&self, id: &Id) -> bool {
        self.allowed.contains(&self.partitioner.partition(id))
    }
}
