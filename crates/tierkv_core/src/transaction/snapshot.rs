//! Registry of open read snapshots.

use crate::types::SequenceNumber;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Tracks the committed sequence and every snapshot still in use.
///
/// Snapshots are acquired and the horizon is computed under the same lock,
/// so a compaction pass can never discard a version that a snapshot taken
/// concurrently with it will read.
#[derive(Debug, Default)]
pub struct SnapshotRegistry {
    active: Mutex<BTreeMap<u64, usize>>,
    committed: AtomicU64,
}

impl SnapshotRegistry {
    /// Creates a registry whose committed sequence is `committed`.
    #[must_use]
    pub fn new(committed: SequenceNumber) -> Arc<Self> {
        Arc::new(Self {
            active: Mutex::new(BTreeMap::new()),
            committed: AtomicU64::new(committed.as_u64()),
        })
    }

    /// Pins the current committed state.
    #[must_use]
    pub fn acquire(self: &Arc<Self>) -> Snapshot {
        let mut active = self.active.lock();
        let seq = self.committed.load(Ordering::Acquire);
        *active.entry(seq).or_insert(0) += 1;
        Snapshot {
            registry: Arc::clone(self),
            seq: SequenceNumber::new(seq),
        }
    }

    /// The last published commit sequence.
    #[must_use]
    pub fn committed(&self) -> SequenceNumber {
        SequenceNumber::new(self.committed.load(Ordering::Acquire))
    }

    /// Makes `seq` visible to snapshots acquired from now on.
    pub fn publish(&self, seq: SequenceNumber) {
        let _active = self.active.lock();
        self.committed.fetch_max(seq.as_u64(), Ordering::AcqRel);
    }

    /// Oldest sequence any open or future snapshot can read.
    #[must_use]
    pub fn horizon(&self) -> SequenceNumber {
        let active = self.active.lock();
        let committed = self.committed.load(Ordering::Acquire);
        let oldest = active.keys().next().copied().unwrap_or(committed);
        SequenceNumber::new(oldest.min(committed))
    }

    /// Number of open snapshots.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().values().sum()
    }

    fn release(&self, seq: u64) {
        let mut active = self.active.lock();
        if let Some(count) = active.get_mut(&seq) {
            *count -= 1;
            if *count == 0 {
                active.remove(&seq);
            }
        }
    }
}

/// A pinned read view; releases itself on drop.
#[derive(Debug)]
pub struct Snapshot {
    registry: Arc<SnapshotRegistry>,
    seq: SequenceNumber,
}

impl Snapshot {
    /// Sequence this snapshot reads at.
    #[must_use]
    pub fn seq(&self) -> SequenceNumber {
        self.seq
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.registry.release(self.seq.as_u64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horizon_follows_oldest_snapshot() {
        let registry = SnapshotRegistry::new(SequenceNumber::new(5));
        assert_eq!(registry.horizon(), SequenceNumber::new(5));

        let old = registry.acquire();
        registry.publish(SequenceNumber::new(8));
        let new = registry.acquire();
        assert_eq!(old.seq(), SequenceNumber::new(5));
        assert_eq!(new.seq(), SequenceNumber::new(8));
        assert_eq!(registry.horizon(), SequenceNumber::new(5));
        assert_eq!(registry.active_count(), 2);

        drop(old);
        assert_eq!(registry.horizon(), SequenceNumber::new(8));
        drop(new);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn shared_sequences_are_counted() {
        let registry = SnapshotRegistry::new(SequenceNumber::new(1));
        let a = registry.acquire();
        let b = registry.acquire();
        registry.publish(SequenceNumber::new(3));
        drop(a);
        assert_eq!(registry.horizon(), SequenceNumber::new(1));
        drop(b);
        assert_eq!(registry.horizon(), SequenceNumber::new(3));
    }

    #[test]
    fn publish_never_moves_backwards() {
        let registry = SnapshotRegistry::new(SequenceNumber::new(4));
        registry.publish(SequenceNumber::new(2));
        assert_eq!(registry.committed(), SequenceNumber::new(4));
    }
}
