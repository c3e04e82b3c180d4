//! Herald ID generation
//!
//! Node identity, time-ordered identifiers and partitioning.
//!
//! # Overview
//!
//! ```text
//!   NodeId ──┐
//!            ├─> IdGenerator ──> Id ──> KeyPartitioner ──> partition
//!   clock ───┘        │
//!                     └─ IdConstraint (retry until satisfied)
//! ```
//!
//! IDs read `<domain><yyyyMMddHHmmssSSS><node:3><sequence:4>` and sort by
//! mint time within a node.

pub mod constraint;
pub mod error;
pub mod generator;
pub mod id;
pub mod node;
pub mod partition;

pub use constraint::{IdConstraint, PartitionConstraint};
pub use error::{IdError, IdResult};
pub use generator::IdGenerator;
pub use id::{validate_domain, Id};
pub use node::NodeId;
pub use partition::{java_string_hash, JavaHashCodePartitioner, KeyPartitioner};
