//! Collection handles.

use crate::catalog::Collection;
use crate::config::KvsConfig;
use crate::cursor::{Cursor, CursorOptions};
use crate::database::DbShared;
use crate::error::{CoreError, CoreResult};
use crate::limits::{validate_key, validate_prefix_filter, validate_value};
use crate::mclass::MediaClass;
use crate::transaction::{PendingRead, Transaction, WriteSet};
use crate::types::SequenceNumber;
use crate::value::StoredValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-write options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutFlags {
    /// Fsync the WAL at commit even when durability is disabled.
    pub prio: bool,
    /// Store this value uncompressed.
    pub vcomp_off: bool,
}

/// A handle to one collection.
///
/// Writes without a transaction commit immediately as single-operation
/// transactions; writes through a [`Transaction`] become visible when it
/// commits. Several handles may be open on the same collection, each with
/// its own compression settings.
#[derive(Debug)]
pub struct Kvs {
    db: Arc<DbShared>,
    collection: Arc<Collection>,
    config: KvsConfig,
    closed: Arc<AtomicBool>,
}

impl Kvs {
    pub(crate) fn new(db: Arc<DbShared>, collection: Arc<Collection>, config: KvsConfig) -> Self {
        Self {
            db,
            collection,
            config,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.collection.name
    }

    /// Required key prefix length, 0 when unset.
    #[must_use]
    pub fn prefix_len(&self) -> usize {
        self.collection.prefix_len
    }

    /// Media class holding the collection's data.
    #[must_use]
    pub fn media_class(&self) -> MediaClass {
        self.collection.class
    }

    fn check(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoreError::invalid_handle("kvs"));
        }
        self.db.check_open()?;
        self.collection.ensure_live()
    }

    fn check_writable(&self) -> CoreResult<()> {
        self.check()?;
        self.db.check_writable()
    }

    /// Inserts or overwrites `key`, committing immediately.
    pub fn put(&self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.put_with(None, key, value, PutFlags::default())
    }

    /// Inserts or overwrites `key`, inside `txn` when given.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty, oversized, or too-short key or an
    /// oversized value; `InvalidState` on a read-only database or an
    /// inactive transaction; `Conflict` when committing immediately loses
    /// to a concurrent transaction.
    pub fn put_with(
        &self,
        txn: Option<&Transaction>,
        key: &[u8],
        value: &[u8],
        flags: PutFlags,
    ) -> CoreResult<()> {
        self.check_writable()?;
        validate_key(key, self.collection.prefix_len)?;
        validate_value(value)?;
        let stored = StoredValue::encode(value, &self.config, flags.vcomp_off)?;

        match txn {
            Some(txn) => txn.with_active(&self.db, |inner| {
                inner.writes.put(self.collection.id, key, stored);
                inner.prio |= flags.prio;
                Ok(())
            })?,
            None => self.commit_single(key, Some(stored), flags.prio)?,
        }
        self.db.stats.record_write(value.len());
        Ok(())
    }

    /// Reads `key` at the latest committed state.
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.lookup(None, key)
    }

    /// Reads `key` as `txn` sees it: its own writes over its snapshot.
    pub fn get_in_txn(&self, txn: &Transaction, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.lookup(Some(txn), key)
    }

    /// Reads `key` into `buf`.
    ///
    /// Returns the full value length, which exceeds `buf.len()` when the
    /// value was truncated, or `None` if the key is absent.
    pub fn get_into(
        &self,
        txn: Option<&Transaction>,
        key: &[u8],
        buf: &mut [u8],
    ) -> CoreResult<Option<usize>> {
        let Some(value) = self.lookup(txn, key)? else {
            return Ok(None);
        };
        let n = value.len().min(buf.len());
        buf[..n].copy_from_slice(&value[..n]);
        Ok(Some(value.len()))
    }

    fn lookup(&self, txn: Option<&Transaction>, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.check()?;
        validate_key(key, self.collection.prefix_len)?;
        let store = &self.collection.store;

        let value = match txn {
            Some(txn) => txn.with_active(&self.db, |inner| {
                match inner.writes.read(self.collection.id, key) {
                    PendingRead::Value(value) => value.decode().map(Some),
                    PendingRead::Deleted => Ok(None),
                    PendingRead::Snapshot => {
                        let stored = self.db.guard(store.get_at(key, inner.snapshot_seq()?))?;
                        stored.map(|v| v.decode()).transpose()
                    }
                }
            })?,
            None => {
                let snapshot = self.db.txns.snapshots().acquire();
                let stored = self.db.guard(store.get_at(key, snapshot.seq()))?;
                stored.map(|v| v.decode()).transpose()?
            }
        };

        self.db
            .stats
            .record_read(value.as_ref().map_or(0, Vec::len));
        Ok(value)
    }

    /// Deletes `key`, committing immediately.
    pub fn delete(&self, key: &[u8]) -> CoreResult<()> {
        self.remove(None, key)
    }

    /// Deletes `key` inside `txn`.
    pub fn delete_in_txn(&self, txn: &Transaction, key: &[u8]) -> CoreResult<()> {
        self.remove(Some(txn), key)
    }

    fn remove(&self, txn: Option<&Transaction>, key: &[u8]) -> CoreResult<()> {
        self.check_writable()?;
        validate_key(key, self.collection.prefix_len)?;

        match txn {
            Some(txn) => txn.with_active(&self.db, |inner| {
                inner.writes.delete(self.collection.id, key);
                Ok(())
            })?,
            None => self.commit_single(key, None, false)?,
        }
        self.db.stats.record_delete();
        Ok(())
    }

    /// Deletes every key starting with `prefix` when `txn` commits.
    ///
    /// Earlier writes of `txn` under the prefix are discarded; later ones
    /// survive.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty or oversized prefix, or one whose
    /// length differs from the collection's non-zero prefix length.
    pub fn prefix_delete(&self, txn: &Transaction, prefix: &[u8]) -> CoreResult<()> {
        self.check_writable()?;
        validate_prefix_filter(prefix, self.collection.prefix_len)?;
        txn.with_active(&self.db, |inner| {
            inner.writes.prefix_delete(self.collection.id, prefix);
            Ok(())
        })?;
        self.db.stats.record_prefix_delete();
        Ok(())
    }

    /// Opens a cursor over the collection.
    pub fn cursor<'t>(&self, options: CursorOptions<'t>) -> CoreResult<Cursor<'t>> {
        self.check()?;
        let cursor = Cursor::new(
            Arc::clone(&self.db),
            Arc::clone(&self.collection),
            Arc::clone(&self.closed),
            options,
        )?;
        self.db.stats.record_cursor();
        Ok(cursor)
    }

    /// Invalidates the handle. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn commit_single(&self, key: &[u8], value: Option<StoredValue>, prio: bool) -> CoreResult<()> {
        let mut writes = WriteSet::default();
        match value {
            Some(value) => writes.put(self.collection.id, key, value),
            None => writes.delete(self.collection.id, key),
        }

        let txid = self.db.txns.allocate_txid();
        let result = self.db.guard(self.db.txns.commit(
            txid,
            SequenceNumber::new(u64::MAX),
            &writes,
            prio,
            &self.db.catalog,
        ));
        match result {
            Ok(_) => {
                self.db.stats.record_commit();
                Ok(())
            }
            Err(e) => {
                self.db.stats.record_abort();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KvsCreateConfig, ValueCompression};
    use crate::error::ErrorKind;
    use crate::testing::{with_db, QUIET};

    #[test]
    fn put_get_delete() {
        with_db(QUIET, |db| {
            db.create_collection("c", &[]).unwrap();
            let kvs = db.open_collection("c", &[]).unwrap();
            kvs.put(b"k", b"v").unwrap();
            kvs.put(b"empty", b"").unwrap();
            assert_eq!(kvs.get(b"k").unwrap().as_deref(), Some(&b"v"[..]));
            assert_eq!(kvs.get(b"empty").unwrap(), Some(Vec::new()));

            kvs.delete(b"k").unwrap();
            assert_eq!(kvs.get(b"k").unwrap(), None);
            assert_eq!(kvs.get(b"never").unwrap(), None);
        });
    }

    #[test]
    fn get_into_reports_full_length() {
        with_db(QUIET, |db| {
            db.create_collection("c", &[]).unwrap();
            let kvs = db.open_collection("c", &[]).unwrap();
            kvs.put(b"k", b"hello world").unwrap();

            let mut buf = [0u8; 5];
            assert_eq!(kvs.get_into(None, b"k", &mut buf).unwrap(), Some(11));
            assert_eq!(&buf, b"hello");
            assert_eq!(kvs.get_into(None, b"x", &mut buf).unwrap(), None);
        });
    }

    #[test]
    fn key_validation() {
        with_db(QUIET, |db| {
            db.create_collection_with("p", KvsCreateConfig::new().prefix_len(4))
                .unwrap();
            let kvs = db.open_collection("p", &[]).unwrap();
            assert_eq!(kvs.put(b"", b"v").unwrap_err().kind(), ErrorKind::InvalidArgument);
            assert_eq!(kvs.put(b"abc", b"v").unwrap_err().kind(), ErrorKind::InvalidArgument);
            kvs.put(b"abcd", b"v").unwrap();

            let txn = db.transaction().unwrap();
            txn.begin().unwrap();
            assert_eq!(
                kvs.prefix_delete(&txn, b"ab").unwrap_err().kind(),
                ErrorKind::InvalidArgument
            );
            kvs.prefix_delete(&txn, b"abcd").unwrap();
            txn.commit().unwrap();
            assert_eq!(kvs.get(b"abcd").unwrap(), None);
        });
    }

    #[test]
    fn compressed_values_read_back() {
        with_db(QUIET, |db| {
            db.create_collection("z", &[]).unwrap();
            let kvs = db
                .open_collection_with(
                    "z",
                    KvsConfig::new().compression(ValueCompression::Zstd),
                )
                .unwrap();
            let value = vec![b'a'; 4096];
            kvs.put(b"k", &value).unwrap();
            assert_eq!(kvs.get(b"k").unwrap(), Some(value));

            let plain = db.open_collection("z", &[]).unwrap();
            assert_eq!(plain.get(b"k").unwrap().map(|v| v.len()), Some(4096));
        });
    }

    #[test]
    fn closed_handle_is_invalid() {
        with_db(QUIET, |db| {
            db.create_collection("c", &[]).unwrap();
            let kvs = db.open_collection("c", &[]).unwrap();
            kvs.close();
            kvs.close();
            assert_eq!(kvs.get(b"k").unwrap_err().kind(), ErrorKind::InvalidHandle);
        });
    }

    #[test]
    fn dropped_collection_invalidates_handles() {
        with_db(QUIET, |db| {
            db.create_collection("c", &[]).unwrap();
            let kvs = db.open_collection("c", &[]).unwrap();
            kvs.put(b"k", b"v").unwrap();
            db.drop_collection("c").unwrap();
            assert_eq!(kvs.get(b"k").unwrap_err().kind(), ErrorKind::InvalidHandle);
            assert_eq!(
                db.open_collection("c", &[]).unwrap_err().kind(),
                ErrorKind::NotFound
            );
        });
    }
}
