//! Splits a 128-bit ID space into contiguous, non-overlapping ranges.
//!
//! Used by the cluster coordinator to carve up UUID space across workers,
//! and by the worker side to answer "is this vertex ID mine?" without a
//! round-trip to the master.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PartitionError {
    #[error("partition range end ({end}) must be greater than start ({start})")]
    EmptyRange { start: u128, end: u128 },
    #[error("partition count must be at least 1, got {0}")]
    ZeroPartitions(usize),
}

/// A `[start, end)` interval over 128-bit ID space, split into `n`
/// contiguous, non-overlapping sub-ranges.
///
/// `partSize = (end - start + 1) / n`; partition `i` covers
/// `[start + i*partSize, start + (i+1)*partSize)`, except the last
/// partition, which is forced to end exactly at `end` so the modulo
/// remainder from integer division is absorbed there rather than dropped.
#[derive(Debug, Clone)]
pub struct PartitionRange {
    start: u128,
    end: u128,
    // split_points[i] is the exclusive upper bound of partition i.
    // partition_for_id binary-searches this list.
    split_points: Vec<u128>,
}

impl PartitionRange {
    pub fn new(start: u128, end: u128, n: usize) -> Result<Self, PartitionError> {
        if end <= start {
            return Err(PartitionError::EmptyRange { start, end });
        }
        if n == 0 {
            return Err(PartitionError::ZeroPartitions(n));
        }

        let part_size = (end - start + 1) / n as u128;
        let mut split_points = Vec::with_capacity(n);
        for i in 0..n {
            let upper = if i == n - 1 { end } else { start + (i as u128 + 1) * part_size };
            split_points.push(upper);
        }
        Ok(Self { start, end, split_points })
    }

    /// Convenience constructor for the common case of splitting the full
    /// UUID space (`[0, 2^128)`) — `end` is exclusive, so the maximum
    /// 128-bit value plus one is represented as `u128::MAX` treated as an
    /// inclusive bound via a saturating span; callers that need the exact
    /// full space should pass `u128::MAX` as `end_inclusive`.
    pub fn from_uuid_bounds(start: uuid::Uuid, end_inclusive: uuid::Uuid, n: usize) -> Result<Self, PartitionError> {
        let start = u128::from_be_bytes(*start.as_bytes());
        let end_inclusive = u128::from_be_bytes(*end_inclusive.as_bytes());
        Self::new(start, end_inclusive.saturating_add(1), n)
    }

    pub fn partition_count(&self) -> usize {
        self.split_points.len()
    }

    /// The `[start, end)` extent covered by partition `i`.
    pub fn extents(&self, i: usize) -> Option<(u128, u128)> {
        if i >= self.split_points.len() {
            return None;
        }
        let lower = if i == 0 { self.start } else { self.split_points[i - 1] };
        Some((lower, self.split_points[i]))
    }

    /// Which partition owns `id`, via binary search over the split-point
    /// list. `id` must lie within `[start, end)` — callers outside this
    /// crate (the cluster relay path) are expected to have already
    /// validated that before calling.
    pub fn partition_for_id(&self, id: u128) -> usize {
        self.split_points.partition_point(|&upper| upper <= id)
    }

    pub fn start(&self) -> u128 {
        self.start
    }

    pub fn end(&self) -> u128 {
        self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_split_has_equal_sized_partitions() {
        let range = PartitionRange::new(0, 100, 4).unwrap();
        assert_eq!(range.extents(0), Some((0, 25)));
        assert_eq!(range.extents(1), Some((25, 50)));
        assert_eq!(range.extents(2), Some((50, 75)));
        assert_eq!(range.extents(3), Some((75, 100)));
    }

    #[test]
    fn uneven_split_absorbs_remainder_in_last_partition() {
        // part_size = (100 - 0 + 1) / 3 = 33
        let range = PartitionRange::new(0, 100, 3).unwrap();
        assert_eq!(range.extents(0), Some((0, 33)));
        assert_eq!(range.extents(1), Some((33, 66)));
        // Last partition absorbs the remainder instead of stopping at 99.
        assert_eq!(range.extents(2), Some((66, 100)));
    }

    #[test]
    fn partition_for_id_matches_extents() {
        let range = PartitionRange::new(0, 100, 3).unwrap();
        assert_eq!(range.partition_for_id(0), 0);
        assert_eq!(range.partition_for_id(32), 0);
        assert_eq!(range.partition_for_id(33), 1);
        assert_eq!(range.partition_for_id(65), 1);
        assert_eq!(range.partition_for_id(66), 2);
        assert_eq!(range.partition_for_id(99), 2);
    }

    #[test]
    fn single_partition_covers_the_whole_range() {
        let range = PartitionRange::new(10, 20, 1).unwrap();
        assert_eq!(range.extents(0), Some((10, 20)));
        assert_eq!(range.partition_for_id(10), 0);
        assert_eq!(range.partition_for_id(19), 0);
    }

    #[test]
    fn rejects_empty_or_inverted_range() {
        assert_eq!(PartitionRange::new(5, 5, 2).unwrap_err(), PartitionError::EmptyRange { start: 5, end: 5 });
        assert_eq!(PartitionRange::new(10, 5, 2).unwrap_err(), PartitionError::EmptyRange { start: 10, end: 5 });
    }

    #[test]
    fn rejects_zero_partitions() {
        assert_eq!(PartitionRange::new(0, 10, 0).unwrap_err(), PartitionError::ZeroPartitions(0));
    }

    proptest::proptest! {
        #[test]
        fn partitions_cover_the_range_with_no_gaps_or_overlaps(
            start in 0u128..1_000_000,
            span in 1u128..1_000_000,
            n in 1usize..17,
        ) {
            let end = start + span;
            let range = PartitionRange::new(start, end, n).unwrap();
            let mut cursor = start;
            for i in 0..range.partition_count() {
                let (lo, hi) = range.extents(i).unwrap();
                proptest::prop_assert_eq!(lo, cursor);
                proptest::prop_assert!(hi > lo);
                cursor = hi;
            }
            proptest::prop_assert_eq!(cursor, end);
        }

        #[test]
        fn partition_for_id_agrees_with_linear_scan(
            start in 0u128..1_000_000,
            span in 1u128..1_000_000,
            n in 1usize..17,
            offset in 0u128..1_000_000,
        ) {
            let end = start + span;
            let range = PartitionRange::new(start, end, n).unwrap();
            let id = start + (offset % span);
            let via_search = range.partition_for_id(id);
            let via_scan = (0..range.partition_count())
                .find(|&i| {
                    let (lo, hi) = range.extents(i).unwrap();
                    id >= lo && id < hi
                })
                .unwrap();
            proptest::prop_assert_eq!(via_search, via_scan);
        }
    }
}
