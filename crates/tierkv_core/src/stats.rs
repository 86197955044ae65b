//! Operation counters.
//!
//! ```rust,ignore
//! let stats = db.stats();
//! println!("commits: {} conflicts: {}", stats.commits, stats.conflicts);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of one open database.
///
/// Counters are relaxed atomics; a [`StatsSnapshot`] is not a consistent
/// cut across counters.
#[derive(Debug, Default)]
pub struct DatabaseStats {
    reads: AtomicU64,
    bytes_read: AtomicU64,
    writes: AtomicU64,
    bytes_written: AtomicU64,
    deletes: AtomicU64,
    prefix_deletes: AtomicU64,
    commits: AtomicU64,
    aborts: AtomicU64,
    conflicts: AtomicU64,
    cursors: AtomicU64,
    compactions: AtomicU64,
    checkpoints: AtomicU64,
}

impl DatabaseStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self, bytes: usize) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self, bytes: usize) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_prefix_delete(&self) {
        self.prefix_deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    /// A conflict also aborts the transaction.
    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
        self.record_abort();
    }

    pub(crate) fn record_cursor(&self) {
        self.cursors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            reads: load(&self.reads),
            bytes_read: load(&self.bytes_read),
            writes: load(&self.writes),
            bytes_written: load(&self.bytes_written),
            deletes: load(&self.deletes),
            prefix_deletes: load(&self.prefix_deletes),
            commits: load(&self.commits),
            aborts: load(&self.aborts),
            conflicts: load(&self.conflicts),
            cursors: load(&self.cursors),
            compactions: load(&self.compactions),
            checkpoints: load(&self.checkpoints),
        }
    }
}

/// A point-in-time copy of [`DatabaseStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Point reads (`get` and `get_into`).
    pub reads: u64,
    /// Value bytes returned by point reads.
    pub bytes_read: u64,
    /// Puts, bound or unbound.
    pub writes: u64,
    /// Value bytes passed to puts.
    pub bytes_written: u64,
    /// Single-key deletes.
    pub deletes: u64,
    /// Prefix deletes.
    pub prefix_deletes: u64,
    /// Commits, including unbound single-operation commits.
    pub commits: u64,
    /// Aborted transactions, conflicts included.
    pub aborts: u64,
    /// Commits rejected by a write-write conflict.
    pub conflicts: u64,
    /// Cursors created.
    pub cursors: u64,
    /// Collections rewritten by compaction.
    pub compactions: u64,
    /// WAL checkpoints.
    pub checkpoints: u64,
}
