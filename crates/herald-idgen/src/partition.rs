//! Key partitioners
//!
//! TigerStyle: Partitioning is a pure function; every peer must compute the
//! same bucket for the same ID.
//!
//! The provided partitioner uses the Java `String.hashCode` function over
//! UTF-16 code units so that Herald agrees with JVM peers that shard on the
//! same IDs.

use crate::error::{IdError, IdResult};
use crate::id::Id;

/// Maps an ID onto one of `N` partitions
pub trait KeyPartitioner: Send + Sync {
    /// Partition index in `[0, N)`
    fn partition(&self, id: &Id) -> u32;
}

impl<F> KeyPartitioner for F
where
    F: Fn(&Id) -> u32 + Send + Sync,
{
    fn partition(&self, id: &Id) -> u32 {
        self(id)
    }
}

/// Java `String.hashCode`: `h = 31 * h + c` over UTF-16 units, wrapping i32
pub fn java_string_hash(text: &str) -> i32 {
    text.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
}

/// Absolute value of a hash; `i32::MIN` has no positive counterpart and maps to 0
pub fn non_negative(hash: i32) -> u32 {
    hash.checked_abs().unwrap_or(0) as u32
}

/// Partitioner compatible with `JavaHashCodeBasedKeyPartitioner`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JavaHashCodePartitioner {
    partitions_count: u32,
}

impl JavaHashCodePartitioner {
    /// Fails when `max_partitions` is not positive
    pub fn new(max_partitions: i64) -> IdResult<Self> {
        if max_partitions <= 0 || max_partitions > u32::MAX as i64 {
            return Err(IdError::invalid_config(
                "maxPartitions",
                format!("must be in [1, {}], got {}", u32::MAX, max_partitions),
            ));
        }
        Ok(Self {
            partitions_count: max_partitions as u32,
        })
    }

    pub fn max_partitions(&self) -> u32 {
        self.partitions_count
    }

    /// Partition of arbitrary text, identical to `partition` on an ID's text
    pub fn partition_text(&self, text: &str) -> u32 {
        let bucket = non_negative(java_string_hash(text)) % self.partitions_count;
        debug_assert!(bucket < self.partitions_count);
        bucket
    }
}

impl KeyPartitioner for JavaHashCodePartitioner {
    fn partition(&self, id: &Id) -> u32 {
        self.partition_text(id.as_str())
    }
}
