//! Per-collection segment store.

use crate::error::{CoreError, CoreResult};
use crate::segment::compaction::{retain, CompactionConfig, CompactionResult, VersionMeta};
use crate::segment::record::SegmentRecord;
use crate::types::{CollectionId, SequenceNumber};
use crate::value::StoredValue;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use std::collections::BTreeMap;
use std::ops::Bound;
use tierkv_storage::StorageBackend;

/// Location of one committed version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Version {
    seq: u64,
    offset: u64,
    len: u32,
    tombstone: bool,
}

impl VersionMeta for Version {
    fn sequence(&self) -> u64 {
        self.seq
    }

    fn is_tombstone(&self) -> bool {
        self.tombstone
    }
}

/// Newest version visible at `snapshot`.
fn visible(versions: &[Version], snapshot: u64) -> Option<&Version> {
    let n = versions.partition_point(|v| v.seq <= snapshot);
    n.checked_sub(1).map(|i| &versions[i])
}

struct StoreInner {
    backend: Box<dyn StorageBackend>,
    /// key -> versions by ascending sequence
    index: BTreeMap<Vec<u8>, Vec<Version>>,
    live_bytes: u64,
    max_seq: u64,
}

impl StoreInner {
    fn read_version(&self, key: &[u8], version: &Version) -> CoreResult<StoredValue> {
        let data = self.backend.read_at(version.offset, version.len as usize)?;
        let record = SegmentRecord::decode(&data)?;
        if record.key != key || record.sequence.as_u64() != version.seq {
            return Err(CoreError::segment_corruption(format!(
                "record at offset {} does not match the index",
                version.offset
            )));
        }
        record
            .stored_value()
            .ok_or_else(|| CoreError::segment_corruption("indexed value is a tombstone"))
    }

    fn insert_version(&mut self, key: Vec<u8>, version: Version) {
        let versions = self.index.entry(key).or_default();
        let Err(pos) = versions.binary_search_by_key(&version.seq, |v| v.seq) else {
            return;
        };
        versions.insert(pos, version);

        if pos + 1 == versions.len() {
            if let Some(prev) = pos.checked_sub(1).map(|i| versions[i]) {
                if !prev.tombstone {
                    self.live_bytes -= u64::from(prev.len);
                }
            }
            if !version.tombstone {
                self.live_bytes += u64::from(version.len);
            }
        }
        self.max_seq = self.max_seq.max(version.seq);
    }
}

/// Append-only store of one collection's versions.
///
/// Every committed write is appended as a [`SegmentRecord`]; an in-memory
/// index maps each key to its version chain so reads at any snapshot can
/// find the right record. Compaction rewrites the file with only the
/// versions still reachable.
pub struct SegmentStore {
    collection_id: CollectionId,
    inner: RwLock<StoreInner>,
}

impl SegmentStore {
    /// Opens a store over `backend`, rebuilding the index.
    ///
    /// An incomplete record at the end of the file is a crash during
    /// append; it is cut when `repair` is set. A record that fails its CRC
    /// or belongs to another collection is corruption.
    pub fn open(
        collection_id: CollectionId,
        backend: Box<dyn StorageBackend>,
        repair: bool,
    ) -> CoreResult<Self> {
        let size = backend.size()?;
        let mut inner = StoreInner {
            backend,
            index: BTreeMap::new(),
            live_bytes: 0,
            max_seq: 0,
        };

        let mut offset = 0u64;
        while offset + 4 <= size {
            let len_bytes = inner.backend.read_at(offset, 4)?;
            let record_len =
                u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);
            if (record_len as usize) < SegmentRecord::HEADER_SIZE + SegmentRecord::CRC_SIZE {
                return Err(CoreError::segment_corruption(format!(
                    "record length {record_len} at offset {offset} in {collection_id}"
                )));
            }
            if offset + u64::from(record_len) > size {
                break;
            }

            let data = inner.backend.read_at(offset, record_len as usize)?;
            let record = SegmentRecord::decode(&data)?;
            if record.collection_id != collection_id {
                return Err(CoreError::segment_corruption(format!(
                    "record for {} found in segment of {collection_id}",
                    record.collection_id
                )));
            }

            let version = Version {
                seq: record.sequence.as_u64(),
                offset,
                len: record_len,
                tombstone: record.is_tombstone(),
            };
            inner.insert_version(record.key, version);
            offset += u64::from(record_len);
        }

        if offset < size {
            tracing::warn!(
                collection = %collection_id,
                valid_len = offset,
                size,
                "segment has a torn tail"
            );
            if repair {
                inner.backend.truncate(offset)?;
            }
        }

        Ok(Self {
            collection_id,
            inner: RwLock::new(inner),
        })
    }

    /// Returns the collection this store belongs to.
    #[must_use]
    pub fn collection_id(&self) -> CollectionId {
        self.collection_id
    }

    /// Appends a committed version; `None` writes a tombstone.
    ///
    /// Applying a `(key, seq)` that is already present is a no-op, which
    /// makes WAL replay idempotent.
    pub(crate) fn apply(
        &self,
        key: &[u8],
        seq: SequenceNumber,
        value: Option<&StoredValue>,
    ) -> CoreResult<()> {
        let mut inner = self.inner.write();
        let exists = inner.index.get(key).is_some_and(|versions| {
            versions
                .binary_search_by_key(&seq.as_u64(), |v| v.seq)
                .is_ok()
        });
        if exists {
            return Ok(());
        }

        let record = SegmentRecord::from_write(self.collection_id, key, seq, value);
        let encoded = record.encode()?;
        let len = u32::try_from(encoded.len())
            .map_err(|_| CoreError::invalid_argument("segment record too large"))?;
        let offset = inner.backend.append(&encoded)?;
        inner.insert_version(
            key.to_vec(),
            Version {
                seq: seq.as_u64(),
                offset,
                len,
                tombstone: value.is_none(),
            },
        );
        Ok(())
    }

    /// Reads `key` as of `snapshot`.
    pub(crate) fn get_at(&self, key: &[u8], snapshot: SequenceNumber) -> CoreResult<Option<StoredValue>> {
        let inner = self.inner.read();
        let Some(version) = inner
            .index
            .get(key)
            .and_then(|versions| visible(versions, snapshot.as_u64()))
        else {
            return Ok(None);
        };
        if version.tombstone {
            return Ok(None);
        }
        inner.read_version(key, version).map(Some)
    }

    /// Sequence of the newest version of `key`, tombstones included.
    pub(crate) fn latest_seq(&self, key: &[u8]) -> Option<SequenceNumber> {
        self.inner
            .read()
            .index
            .get(key)
            .and_then(|versions| versions.last())
            .map(|v| SequenceNumber::new(v.seq))
    }

    /// First key under `prefix` written after `snapshot`.
    pub(crate) fn prefix_changed_since(
        &self,
        prefix: &[u8],
        snapshot: SequenceNumber,
    ) -> Option<Vec<u8>> {
        let inner = self.inner.read();
        inner
            .index
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .find(|(_, versions)| versions.last().is_some_and(|v| v.seq > snapshot.as_u64()))
            .map(|(key, _)| key.clone())
    }

    /// Keys under `prefix` whose newest version is not a tombstone.
    pub(crate) fn live_keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        let inner = self.inner.read();
        inner
            .index
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, versions)| versions.last().is_some_and(|v| !v.tombstone))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Finds the first key in `(lower, upper)` visible at `snapshot`.
    ///
    /// Walks backwards from `upper` when `reverse` is set. Keys for which
    /// `skip` returns true are passed over.
    pub(crate) fn seek_visible(
        &self,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        reverse: bool,
        snapshot: SequenceNumber,
        skip: impl Fn(&[u8]) -> bool,
    ) -> CoreResult<Option<(Vec<u8>, StoredValue)>> {
        if !bounds_ordered(lower, upper) {
            return Ok(None);
        }

        let inner = self.inner.read();
        let range = inner.index.range::<[u8], _>((lower, upper));
        let mut candidates: Box<dyn Iterator<Item = (&Vec<u8>, &Vec<Version>)>> = if reverse {
            Box::new(range.rev())
        } else {
            Box::new(range)
        };

        let found = candidates.find_map(|(key, versions)| {
            if skip(key) {
                return None;
            }
            visible(versions, snapshot.as_u64())
                .filter(|v| !v.tombstone)
                .map(|v| (key, *v))
        });

        match found {
            Some((key, version)) => {
                let value = inner.read_version(key, &version)?;
                Ok(Some((key.clone(), value)))
            }
            None => Ok(None),
        }
    }

    /// Segment file size and the bytes of each key's newest live version.
    pub(crate) fn sizes(&self) -> CoreResult<(u64, u64)> {
        let inner = self.inner.read();
        Ok((inner.backend.size()?, inner.live_bytes))
    }

    /// Highest sequence stored.
    pub(crate) fn max_seq(&self) -> SequenceNumber {
        SequenceNumber::new(self.inner.read().max_seq)
    }

    /// Number of keys with at least one stored version.
    pub(crate) fn key_count(&self) -> usize {
        self.inner.read().index.len()
    }

    /// Rewrites the segment keeping only versions reachable from `horizon`.
    ///
    /// The output is built under an upgradable read lock, so readers keep
    /// going; only the swap takes the write lock. Returns `None` when
    /// `canceled` turns true before the rewrite; the segment is then
    /// untouched.
    pub(crate) fn compact(
        &self,
        horizon: SequenceNumber,
        config: &CompactionConfig,
        canceled: impl Fn() -> bool,
    ) -> CoreResult<Option<CompactionResult>> {
        let inner = self.inner.upgradable_read();
        let bytes_before = inner.backend.size()?;
        let mut result = CompactionResult {
            bytes_before,
            ..CompactionResult::default()
        };

        let mut output = Vec::new();
        let mut index = BTreeMap::new();
        let mut live_bytes = 0u64;

        for (key, versions) in &inner.index {
            if canceled() {
                return Ok(None);
            }
            result.input_records += versions.len();

            let retention = retain(versions, horizon.as_u64(), config);
            let dropped = versions.len() - retention.keep.len();
            if retention.dropped_tombstone {
                result.tombstones_removed += 1;
                result.obsolete_versions_removed += dropped - 1;
            } else {
                result.obsolete_versions_removed += dropped;
            }

            let kept = &versions[retention.keep];
            if kept.is_empty() {
                continue;
            }

            let mut chain = Vec::with_capacity(kept.len());
            for version in kept {
                let data = inner.backend.read_at(version.offset, version.len as usize)?;
                chain.push(Version {
                    offset: output.len() as u64,
                    ..*version
                });
                output.extend_from_slice(&data);
            }
            if let Some(latest) = chain.last().filter(|v| !v.tombstone) {
                live_bytes += u64::from(latest.len);
            }
            result.output_records += chain.len();
            index.insert(key.clone(), chain);
        }

        if canceled() {
            return Ok(None);
        }

        let mut inner = RwLockUpgradableReadGuard::upgrade(inner);
        inner.backend.rewrite(&output)?;
        inner.index = index;
        inner.live_bytes = live_bytes;
        result.bytes_after = output.len() as u64;
        Ok(Some(result))
    }

    /// Pushes buffered appends to the OS.
    pub(crate) fn flush(&self) -> CoreResult<()> {
        self.inner.write().backend.flush()?;
        Ok(())
    }

    /// Flushes and fsyncs the segment.
    pub(crate) fn sync(&self) -> CoreResult<()> {
        let mut inner = self.inner.write();
        inner.backend.flush()?;
        inner.backend.sync()?;
        Ok(())
    }
}

impl std::fmt::Debug for SegmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentStore")
            .field("collection_id", &self.collection_id)
            .finish_non_exhaustive()
    }
}

/// Whether a BTreeMap range over `(lower, upper)` is well-formed.
pub(crate) fn bounds_ordered(lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> bool {
    match (lower, upper) {
        (Bound::Included(lo), Bound::Included(hi)) => lo <= hi,
        (Bound::Included(lo) | Bound::Excluded(lo), Bound::Included(hi) | Bound::Excluded(hi)) => {
            lo < hi
        }
        _ => true,
    }
}
