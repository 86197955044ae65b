//! Version retention for segment compaction.
//!
//! Compaction rewrites a collection's segment keeping only the versions some
//! reader can still observe. The oldest active snapshot is the *horizon*:
//!
//! - every version newer than the horizon is kept,
//! - the newest version at or below the horizon is kept as the base,
//! - older versions are unreachable and dropped,
//! - a tombstone base is dropped once it is `tombstone_retention` sequences
//!   older than the horizon.
//!
//! Compaction never changes what any snapshot at or above the horizon reads.

use std::ops::Range;

/// Configuration for compaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionConfig {
    /// Minimum age in sequences, relative to the horizon, before a tombstone
    /// can be removed. 0 removes them as soon as no snapshot needs them.
    pub tombstone_retention: u64,
}

impl CompactionConfig {
    /// Creates a config that preserves tombstones for `sequences` sequences.
    #[must_use]
    pub const fn with_tombstone_retention(sequences: u64) -> Self {
        Self {
            tombstone_retention: sequences,
        }
    }
}

/// Result of compacting one segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionResult {
    /// Number of records in the input.
    pub input_records: usize,
    /// Number of records in the output.
    pub output_records: usize,
    /// Number of tombstones removed.
    pub tombstones_removed: usize,
    /// Number of shadowed versions removed.
    pub obsolete_versions_removed: usize,
    /// Segment size before compaction.
    pub bytes_before: u64,
    /// Segment size after compaction.
    pub bytes_after: u64,
}

impl CompactionResult {
    /// Bytes reclaimed.
    #[must_use]
    pub fn bytes_saved(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Sequence and kind of one stored version.
pub(crate) trait VersionMeta {
    fn sequence(&self) -> u64;
    fn is_tombstone(&self) -> bool;
}

/// What happens to one key's version chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Retention {
    /// Indices of the versions that survive.
    pub(crate) keep: Range<usize>,
    /// Whether the dropped prefix ends with a tombstone base.
    pub(crate) dropped_tombstone: bool,
}

/// Decides which versions of one key survive.
///
/// `versions` must be sorted by ascending sequence. The survivors always
/// form a suffix of the chain.
pub(crate) fn retain<V: VersionMeta>(
    versions: &[V],
    horizon: u64,
    config: &CompactionConfig,
) -> Retention {
    let above = versions.partition_point(|v| v.sequence() <= horizon);
    if above == 0 {
        return Retention {
            keep: 0..versions.len(),
            dropped_tombstone: false,
        };
    }

    let base = &versions[above - 1];
    let expired = base.is_tombstone()
        && horizon - base.sequence() >= config.tombstone_retention;
    if expired {
        Retention {
            keep: above..versions.len(),
            dropped_tombstone: true,
        }
    } else {
        Retention {
            keep: above - 1..versions.len(),
            dropped_tombstone: false,
        }
    }
}
