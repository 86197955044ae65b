//! Buffered writes of an active transaction.

use crate::segment::bounds_ordered;
use crate::types::CollectionId;
use crate::value::StoredValue;
use std::collections::BTreeMap;
use std::ops::Bound;

/// A buffered write to one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PendingWrite {
    /// Insert or overwrite.
    Put(StoredValue),
    /// Tombstone.
    Delete,
}

/// Writes to one collection.
#[derive(Debug, Default)]
pub(crate) struct CollectionWrites {
    pub(crate) writes: BTreeMap<Vec<u8>, PendingWrite>,
    /// No entry is a prefix of another.
    pub(crate) prefix_deletes: Vec<Vec<u8>>,
}

impl CollectionWrites {
    fn covered(&self, key: &[u8]) -> bool {
        self.prefix_deletes.iter().any(|p| key.starts_with(p))
    }

    fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.prefix_deletes.is_empty()
    }
}

/// How a transaction resolves a read of one key.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PendingRead<'a> {
    /// The transaction has not touched the key; read the snapshot.
    Snapshot,
    /// The transaction deleted the key.
    Deleted,
    /// The transaction wrote this value.
    Value(&'a StoredValue),
}

/// All buffered writes of a transaction, per collection.
#[derive(Debug, Default)]
pub(crate) struct WriteSet {
    collections: BTreeMap<CollectionId, CollectionWrites>,
}

impl WriteSet {
    pub(crate) fn put(&mut self, id: CollectionId, key: &[u8], value: StoredValue) {
        self.collections
            .entry(id)
            .or_default()
            .writes
            .insert(key.to_vec(), PendingWrite::Put(value));
    }

    pub(crate) fn delete(&mut self, id: CollectionId, key: &[u8]) {
        self.collections
            .entry(id)
            .or_default()
            .writes
            .insert(key.to_vec(), PendingWrite::Delete);
    }

    /// Deletes everything under `prefix`, discarding earlier writes there.
    pub(crate) fn prefix_delete(&mut self, id: CollectionId, prefix: &[u8]) {
        let c = self.collections.entry(id).or_default();
        c.writes.retain(|key, _| !key.starts_with(prefix));
        if !c.covered(prefix) {
            c.prefix_deletes.retain(|p| !p.starts_with(prefix));
            c.prefix_deletes.push(prefix.to_vec());
        }
    }

    pub(crate) fn read(&self, id: CollectionId, key: &[u8]) -> PendingRead<'_> {
        let Some(c) = self.collections.get(&id) else {
            return PendingRead::Snapshot;
        };
        match c.writes.get(key) {
            Some(PendingWrite::Put(value)) => PendingRead::Value(value),
            Some(PendingWrite::Delete) => PendingRead::Deleted,
            None if c.covered(key) => PendingRead::Deleted,
            None => PendingRead::Snapshot,
        }
    }

    /// Whether the snapshot's version of `key` is replaced by this set.
    pub(crate) fn shadows(&self, id: CollectionId, key: &[u8]) -> bool {
        self.collections
            .get(&id)
            .is_some_and(|c| c.writes.contains_key(key) || c.covered(key))
    }

    /// First pending put in `(lower, upper)`, walking backwards if `reverse`.
    pub(crate) fn seek_put(
        &self,
        id: CollectionId,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        reverse: bool,
    ) -> Option<(&[u8], &StoredValue)> {
        let c = self.collections.get(&id)?;
        if !bounds_ordered(lower, upper) {
            return None;
        }
        let mut range = c.writes.range::<[u8], _>((lower, upper));
        if reverse {
            range.rev().find_map(as_put)
        } else {
            range.find_map(as_put)
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.collections.values().all(CollectionWrites::is_empty)
    }

    pub(crate) fn collections(&self) -> impl Iterator<Item = (CollectionId, &CollectionWrites)> {
        self.collections
            .iter()
            .filter(|(_, c)| !c.is_empty())
            .map(|(id, c)| (*id, c))
    }
}

fn as_put<'a>(
    (key, write): (&'a Vec<u8>, &'a PendingWrite),
) -> Option<(&'a [u8], &'a StoredValue)> {
    match write {
        PendingWrite::Put(value) => Some((key.as_slice(), value)),
        PendingWrite::Delete => None,
    }
}
