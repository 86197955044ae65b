//! Transaction manager.

use crate::catalog::{Catalog, Collection};
use crate::error::{CoreError, CoreResult};
use crate::transaction::snapshot::SnapshotRegistry;
use crate::transaction::write_set::{PendingWrite, WriteSet};
use crate::types::{SequenceNumber, TransactionId};
use crate::value::StoredValue;
use crate::wal::{WalManager, WalRecord};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Writes of one collection resolved at commit time.
struct ResolvedWrites {
    collection: Arc<Collection>,
    ops: Vec<(Vec<u8>, Option<StoredValue>)>,
}

/// Orders commits and makes them durable.
///
/// Commits serialize on a single lock. Within it a commit checks
/// first-committer-wins conflicts against its snapshot, writes
/// `Begin, ops..., Commit` to the WAL in one append, applies the ops to the
/// segment stores, and finally publishes its sequence to new snapshots.
pub struct TransactionManager {
    wal: WalManager,
    commit_lock: Mutex<()>,
    next_txid: AtomicU64,
    next_seq: AtomicU64,
    snapshots: Arc<SnapshotRegistry>,
    durability: bool,
}

impl TransactionManager {
    /// Creates a manager resuming after recovery.
    pub(crate) fn new(
        wal: WalManager,
        next_txid: TransactionId,
        committed: SequenceNumber,
        durability: bool,
    ) -> Self {
        Self {
            wal,
            commit_lock: Mutex::new(()),
            next_txid: AtomicU64::new(next_txid.as_u64()),
            next_seq: AtomicU64::new(committed.next().as_u64()),
            snapshots: SnapshotRegistry::new(committed),
            durability,
        }
    }

    pub(crate) fn snapshots(&self) -> &Arc<SnapshotRegistry> {
        &self.snapshots
    }

    pub(crate) fn wal(&self) -> &WalManager {
        &self.wal
    }

    /// Allocates an ID for a new begin..commit cycle.
    pub(crate) fn allocate_txid(&self) -> TransactionId {
        TransactionId::new(self.next_txid.fetch_add(1, Ordering::Relaxed))
    }

    /// Blocks commits while the guard lives.
    pub(crate) fn lock_commits(&self) -> MutexGuard<'_, ()> {
        self.commit_lock.lock()
    }

    /// Commits `writes` read at `snapshot`.
    ///
    /// Returns the assigned sequence, or `None` when there was nothing to
    /// write.
    ///
    /// # Errors
    ///
    /// `Conflict` if a written key, or a key under a prefix delete, has a
    /// version newer than `snapshot`; `InvalidHandle` if a target collection
    /// was dropped. Nothing is applied in either case.
    pub(crate) fn commit(
        &self,
        txid: TransactionId,
        snapshot: SequenceNumber,
        writes: &WriteSet,
        prio: bool,
        catalog: &Catalog,
    ) -> CoreResult<Option<SequenceNumber>> {
        let _guard = self.commit_lock.lock();

        let mut resolved = Vec::new();
        for (id, pending) in writes.collections() {
            let collection = catalog
                .get(id)
                .filter(|c| !c.is_dropped())
                .ok_or_else(|| CoreError::invalid_handle("collection"))?;
            let store = &collection.store;

            for key in pending.writes.keys() {
                if store.latest_seq(key).is_some_and(|seq| seq > snapshot) {
                    return Err(CoreError::Conflict {
                        collection_id: id.as_u32(),
                        key: key.clone(),
                    });
                }
            }
            for prefix in &pending.prefix_deletes {
                if let Some(key) = store.prefix_changed_since(prefix, snapshot) {
                    return Err(CoreError::Conflict {
                        collection_id: id.as_u32(),
                        key,
                    });
                }
            }

            let mut ops = Vec::new();
            for prefix in &pending.prefix_deletes {
                ops.extend(
                    store
                        .live_keys_with_prefix(prefix)
                        .into_iter()
                        .filter(|key| !pending.writes.contains_key(key))
                        .map(|key| (key, None)),
                );
            }
            ops.extend(pending.writes.iter().map(|(key, write)| {
                let value = match write {
                    PendingWrite::Put(value) => Some(value.clone()),
                    PendingWrite::Delete => None,
                };
                (key.clone(), value)
            }));

            if !ops.is_empty() {
                resolved.push(ResolvedWrites { collection, ops });
            }
        }

        if resolved.is_empty() {
            return Ok(None);
        }

        let seq = SequenceNumber::new(self.next_seq.load(Ordering::Acquire));
        let mut records = vec![WalRecord::Begin { txid }];
        for target in &resolved {
            let collection_id = target.collection.id;
            records.extend(target.ops.iter().map(|(key, value)| match value {
                Some(value) => WalRecord::Put {
                    txid,
                    collection_id,
                    key: key.clone(),
                    value: value.bytes.clone(),
                    compressed: value.compressed,
                },
                None => WalRecord::Delete {
                    txid,
                    collection_id,
                    key: key.clone(),
                },
            }));
        }
        records.push(WalRecord::Commit {
            txid,
            sequence: seq,
        });

        self.wal.append_batch(&records)?;
        if self.durability || prio {
            self.wal.sync()?;
        } else {
            self.wal.flush()?;
        }
        self.next_seq.store(seq.next().as_u64(), Ordering::Release);

        for target in &resolved {
            for (key, value) in &target.ops {
                target.collection.store.apply(key, seq, value.as_ref())?;
            }
        }
        self.snapshots.publish(seq);

        tracing::debug!(
            txid = txid.as_u64(),
            seq = seq.as_u64(),
            ops = records.len() - 2,
            "committed transaction"
        );
        Ok(Some(seq))
    }

    /// Makes every store durable and empties the WAL.
    ///
    /// Returns the sequence covered by the checkpoint.
    pub(crate) fn checkpoint(&self, catalog: &Catalog) -> CoreResult<SequenceNumber> {
        let _guard = self.commit_lock.lock();
        for collection in catalog.all() {
            collection.store.sync()?;
        }
        let committed = self.snapshots.committed();
        self.wal.reset(committed)?;
        tracing::debug!(seq = committed.as_u64(), "checkpointed WAL");
        Ok(committed)
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("next_seq", &self.next_seq.load(Ordering::Relaxed))
            .field("durability", &self.durability)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::manifest::CollectionEntry;
    use crate::mclass::{MediaLayout, MediaPolicy};
    use crate::types::CollectionId;
    use tempfile::{tempdir, TempDir};
    use tierkv_storage::InMemoryBackend;

    struct Fixture {
        _dir: TempDir,
        catalog: Catalog,
        manager: TransactionManager,
    }

    const C: CollectionId = CollectionId::new(1);

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let layout = MediaLayout::resolve(dir.path(), "capacity", None, None);
        let catalog = Catalog::default();
        let entry = CollectionEntry {
            id: 1,
            prefix_len: 0,
            policy: MediaPolicy::Auto,
        };
        catalog.insert(Arc::new(Collection::open("c", &entry, &layout, true).unwrap()));
        let manager = TransactionManager::new(
            WalManager::new(Box::new(InMemoryBackend::new())),
            TransactionId::new(1),
            SequenceNumber::new(0),
            false,
        );
        Fixture {
            _dir: dir,
            catalog,
            manager,
        }
    }

    fn v(bytes: &[u8]) -> StoredValue {
        StoredValue::plain(bytes.to_vec())
    }

    fn commit(f: &Fixture, snapshot: u64, writes: &WriteSet) -> CoreResult<Option<SequenceNumber>> {
        let txid = f.manager.allocate_txid();
        f.manager
            .commit(txid, SequenceNumber::new(snapshot), writes, false, &f.catalog)
    }

    fn read(f: &Fixture, key: &[u8]) -> Option<Vec<u8>> {
        let snapshot = f.manager.snapshots().committed();
        f.catalog
            .get(C)
            .unwrap()
            .store
            .get_at(key, snapshot)
            .unwrap()
            .map(|v| v.bytes)
    }

    #[test]
    fn commit_assigns_increasing_sequences() {
        let f = fixture();
        let mut writes = WriteSet::default();
        writes.put(C, b"k", v(b"1"));
        assert_eq!(commit(&f, 0, &writes).unwrap(), Some(SequenceNumber::new(1)));
        assert_eq!(commit(&f, 1, &writes).unwrap(), Some(SequenceNumber::new(2)));
        assert_eq!(f.manager.snapshots().committed(), SequenceNumber::new(2));
        assert_eq!(read(&f, b"k").as_deref(), Some(&b"1"[..]));
    }

    #[test]
    fn empty_commit_writes_nothing() {
        let f = fixture();
        assert_eq!(commit(&f, 0, &WriteSet::default()).unwrap(), None);
        assert_eq!(f.manager.wal().size().unwrap(), 0);
    }

    #[test]
    fn first_committer_wins() {
        let f = fixture();
        let mut a = WriteSet::default();
        a.put(C, b"k", v(b"a"));
        let mut b = WriteSet::default();
        b.put(C, b"k", v(b"b"));

        commit(&f, 0, &a).unwrap();
        let err = commit(&f, 0, &b).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(read(&f, b"k").as_deref(), Some(&b"a"[..]));
    }

    #[test]
    fn prefix_delete_conflicts_and_expands() {
        let f = fixture();
        let mut seed = WriteSet::default();
        seed.put(C, b"p1", v(b"x"));
        seed.put(C, b"p2", v(b"x"));
        seed.put(C, b"q1", v(b"x"));
        commit(&f, 0, &seed).unwrap();

        let mut late = WriteSet::default();
        late.prefix_delete(C, b"p");
        assert_eq!(
            commit(&f, 0, &late).unwrap_err().kind(),
            ErrorKind::Conflict
        );

        let mut ok = WriteSet::default();
        ok.prefix_delete(C, b"p");
        ok.put(C, b"p2", v(b"kept"));
        commit(&f, 1, &ok).unwrap();
        assert_eq!(read(&f, b"p1"), None);
        assert_eq!(read(&f, b"p2").as_deref(), Some(&b"kept"[..]));
        assert_eq!(read(&f, b"q1").as_deref(), Some(&b"x"[..]));
    }

    #[test]
    fn dropped_collection_is_invalid_handle() {
        let f = fixture();
        f.catalog.get(C).unwrap().mark_dropped();
        let mut writes = WriteSet::default();
        writes.delete(C, b"k");
        assert_eq!(
            commit(&f, 0, &writes).unwrap_err().kind(),
            ErrorKind::InvalidHandle
        );
    }

    #[test]
    fn checkpoint_resets_wal() {
        let f = fixture();
        let mut writes = WriteSet::default();
        writes.put(C, b"k", v(b"1"));
        commit(&f, 0, &writes).unwrap();
        assert_eq!(f.manager.wal().recover(false).unwrap().len(), 3);

        assert_eq!(
            f.manager.checkpoint(&f.catalog).unwrap(),
            SequenceNumber::new(1)
        );
        let records = f.manager.wal().recover(false).unwrap();
        assert_eq!(
            records[0].1,
            WalRecord::Checkpoint {
                sequence: SequenceNumber::new(1)
            }
        );
    }
}
