//! The `PartitionDetector` collaborator trait: tells a worker which slice of
//! the partition space it owns, without the cluster layer needing to know
//! how that assignment is actually made (static config, a discovery
//! service, consistent hashing — all out of scope here).

use crate::error::Result;

pub trait PartitionDetector: Send + Sync {
    /// Returns `(this worker's partition index, total partition count)`.
    fn current_partition(&self) -> Result<(usize, usize)>;
}

/// A `PartitionDetector` that always reports a fixed assignment — what a
/// statically-sharded deployment or a test harness wires up directly.
#[derive(Debug, Clone, Copy)]
pub struct StaticPartitionDetector {
    pub index: usize,
    pub count: usize,
}

impl PartitionDetector for StaticPartitionDetector {
    fn current_partition(&self) -> Result<(usize, usize)> {
        Ok((self.index, self.count))
    }
}
