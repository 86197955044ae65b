//! WAL writer.

use crate::error::CoreResult;
use crate::types::SequenceNumber;
use crate::wal::iterator::WalRecordIterator;
use crate::wal::record::WalRecord;
use parking_lot::Mutex;
use tierkv_storage::StorageBackend;

/// Manages WAL writes and reads.
///
/// Commits hand over a whole transaction at once, and the records land as
/// one contiguous append, so a crash can only tear the final transaction.
pub struct WalManager {
    backend: Mutex<Box<dyn StorageBackend>>,
}

impl WalManager {
    /// Creates a new WAL manager.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend: Mutex::new(backend),
        }
    }

    /// Appends `records` contiguously and returns the starting offset.
    pub fn append_batch(&self, records: &[WalRecord]) -> CoreResult<u64> {
        let mut data = Vec::new();
        for record in records {
            data.extend(record.encode()?);
        }
        let offset = self.backend.lock().append(&data)?;
        Ok(offset)
    }

    /// Appends a single record.
    pub fn append(&self, record: &WalRecord) -> CoreResult<u64> {
        self.append_batch(std::slice::from_ref(record))
    }

    /// Pushes buffered bytes to the OS.
    pub fn flush(&self) -> CoreResult<()> {
        self.backend.lock().flush()?;
        Ok(())
    }

    /// Flushes and fsyncs.
    pub fn sync(&self) -> CoreResult<()> {
        let mut backend = self.backend.lock();
        backend.flush()?;
        backend.sync()?;
        Ok(())
    }

    /// Returns the current WAL size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Reads every record, cutting a torn tail when `repair` is set.
    ///
    /// # Errors
    ///
    /// Returns corruption errors from the iterator.
    pub fn recover(&self, repair: bool) -> CoreResult<Vec<(u64, WalRecord)>> {
        let mut backend = self.backend.lock();
        let (records, valid_len, torn) = {
            let mut iter = WalRecordIterator::new(backend.as_ref(), 0)?;
            let records = iter.by_ref().collect::<CoreResult<Vec<_>>>()?;
            (records, iter.valid_len(), iter.has_torn_tail())
        };

        if torn && repair {
            tracing::warn!(valid_len, "truncating torn WAL tail");
            backend.truncate(valid_len)?;
        }
        Ok(records)
    }

    /// Empties the WAL and records a checkpoint at `sequence`.
    ///
    /// Called once segments are durable up to `sequence`.
    pub fn reset(&self, sequence: SequenceNumber) -> CoreResult<()> {
        let data = WalRecord::Checkpoint { sequence }.encode()?;
        let mut backend = self.backend.lock();
        backend.truncate(0)?;
        backend.append(&data)?;
        backend.flush()?;
        backend.sync()?;
        Ok(())
    }
}

impl std::fmt::Debug for WalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalManager").finish_non_exhaustive()
    }
}
