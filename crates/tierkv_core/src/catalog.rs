//! Collection catalog.
//!
//! Holds the open state of every collection in the manifest. Collections are
//! opened together with the database so that WAL replay can reach them.

use crate::dir::segment_path;
use crate::error::{CoreError, CoreResult};
use crate::manifest::CollectionEntry;
use crate::mclass::{MediaClass, MediaLayout};
use crate::segment::SegmentStore;
use crate::types::CollectionId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tierkv_storage::{FileBackend, InMemoryBackend, OverlayBackend, StorageBackend};

/// A collection's metadata and storage.
#[derive(Debug)]
pub(crate) struct Collection {
    pub(crate) id: CollectionId,
    pub(crate) name: String,
    pub(crate) prefix_len: usize,
    pub(crate) class: MediaClass,
    pub(crate) store: SegmentStore,
    dropped: AtomicBool,
}

impl Collection {
    /// Opens the segment of a manifest entry in its media class.
    ///
    /// A read-only open leaves the segment file as it is: replayed
    /// versions stay in memory and a missing file reads as empty.
    pub(crate) fn open(
        name: &str,
        entry: &CollectionEntry,
        layout: &MediaLayout,
        writable: bool,
    ) -> CoreResult<Self> {
        let id = CollectionId::new(entry.id);
        let class = entry.policy.resolve(layout)?;
        let path = segment_path(layout.dir(class)?, id);
        let backend: Box<dyn StorageBackend> = if writable {
            Box::new(FileBackend::open_with_create_dirs(&path)?)
        } else if path.exists() {
            let file = FileBackend::open_read_only(&path)?;
            Box::new(OverlayBackend::new(Box::new(file))?)
        } else {
            Box::new(InMemoryBackend::new())
        };
        let store = SegmentStore::open(id, backend, writable)?;

        tracing::debug!(
            collection = name,
            id = %id,
            class = %class,
            policy = ?entry.policy,
            keys = store.key_count(),
            "opened collection"
        );

        Ok(Self {
            id,
            name: name.to_string(),
            prefix_len: entry.prefix_len as usize,
            class,
            store,
            dropped: AtomicBool::new(false),
        })
    }

    pub(crate) fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    pub(crate) fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::Release);
    }

    /// Fails with `InvalidHandle` once the collection is dropped.
    pub(crate) fn ensure_live(&self) -> CoreResult<()> {
        if self.is_dropped() {
            return Err(CoreError::invalid_handle("collection"));
        }
        Ok(())
    }
}

/// Open collections by ID.
#[derive(Debug, Default)]
pub(crate) struct Catalog {
    collections: RwLock<HashMap<CollectionId, Arc<Collection>>>,
}

impl Catalog {
    pub(crate) fn insert(&self, collection: Arc<Collection>) {
        self.collections.write().insert(collection.id, collection);
    }

    pub(crate) fn remove(&self, id: CollectionId) -> Option<Arc<Collection>> {
        self.collections.write().remove(&id)
    }

    pub(crate) fn get(&self, id: CollectionId) -> Option<Arc<Collection>> {
        self.collections.read().get(&id).cloned()
    }

    pub(crate) fn by_name(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections
            .read()
            .values()
            .find(|c| c.name == name)
            .cloned()
    }

    /// Every open collection, ordered by ID.
    pub(crate) fn all(&self) -> Vec<Arc<Collection>> {
        let mut all: Vec<_> = self.collections.read().values().cloned().collect();
        all.sort_by_key(|c| c.id);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mclass::MediaPolicy;
    use crate::types::SequenceNumber;
    use crate::value::StoredValue;
    use tempfile::tempdir;

    fn layout(home: &std::path::Path) -> MediaLayout {
        MediaLayout::resolve(home, "capacity", None, None)
    }

    #[test]
    fn open_places_segment_in_capacity() {
        let temp = tempdir().unwrap();
        let layout = layout(temp.path());
        let entry = CollectionEntry {
            id: 4,
            prefix_len: 2,
            policy: MediaPolicy::Auto,
        };

        let c = Collection::open("users", &entry, &layout, true).unwrap();
        assert_eq!(c.class, MediaClass::Capacity);
        assert_eq!(c.prefix_len, 2);
        assert!(temp.path().join("capacity").join("kvs-000004.dat").exists());
    }

    #[test]
    fn unconfigured_policy_fails() {
        let temp = tempdir().unwrap();
        let entry = CollectionEntry {
            id: 1,
            prefix_len: 0,
            policy: MediaPolicy::PmemOnly,
        };
        let err = Collection::open("c", &entry, &layout(temp.path()), true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }

    #[test]
    fn catalog_lookup_and_drop() {
        let temp = tempdir().unwrap();
        let layout = layout(temp.path());
        let catalog = Catalog::default();
        for (id, name) in [(2, "b"), (1, "a")] {
            let entry = CollectionEntry {
                id,
                prefix_len: 0,
                policy: MediaPolicy::CapacityOnly,
            };
            catalog.insert(Arc::new(Collection::open(name, &entry, &layout, true).unwrap()));
        }

        let ids: Vec<_> = catalog.all().iter().map(|c| c.id.as_u32()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(catalog.by_name("b").unwrap().id, CollectionId::new(2));

        let removed = catalog.remove(CollectionId::new(1)).unwrap();
        removed.mark_dropped();
        assert_eq!(removed.ensure_live().unwrap_err().kind(), ErrorKind::InvalidHandle);
        assert!(catalog.get(CollectionId::new(1)).is_none());
    }

    #[test]
    fn read_only_open_keeps_segment_bytes() {
        let temp = tempdir().unwrap();
        let layout = layout(temp.path());
        let entry = CollectionEntry {
            id: 3,
            prefix_len: 0,
            policy: MediaPolicy::Auto,
        };
        let path = segment_path(layout.dir(MediaClass::Capacity).unwrap(), CollectionId::new(3));

        let c = Collection::open("c", &entry, &layout, true).unwrap();
        c.store
            .apply(b"a", SequenceNumber::new(1), Some(&StoredValue::plain(b"1".to_vec())))
            .unwrap();
        drop(c);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(&[7, 0, 0]);
        std::fs::write(&path, &bytes).unwrap();

        let c = Collection::open("c", &entry, &layout, false).unwrap();
        c.store
            .apply(b"b", SequenceNumber::new(2), Some(&StoredValue::plain(b"2".to_vec())))
            .unwrap();
        let b = c.store.get_at(b"b", SequenceNumber::new(2)).unwrap().unwrap();
        assert_eq!(b.bytes, b"2");
        assert_eq!(c.store.key_count(), 2);
        drop(c);

        assert_eq!(std::fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn read_only_open_of_missing_segment_is_empty() {
        let temp = tempdir().unwrap();
        let layout = layout(temp.path());
        let entry = CollectionEntry {
            id: 9,
            prefix_len: 0,
            policy: MediaPolicy::Auto,
        };

        let c = Collection::open("c", &entry, &layout, false).unwrap();
        assert_eq!(c.store.key_count(), 0);
        assert!(!temp.path().join("capacity").exists());
    }
}
