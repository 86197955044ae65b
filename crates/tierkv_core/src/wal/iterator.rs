//! Streaming WAL record iterator.
//!
//! Reads one record at a time from the backend, so recovery memory does not
//! grow with the WAL size.

use crate::error::{CoreError, CoreResult};
use crate::wal::record::{WalRecord, WalRecordType, CRC_SIZE, HEADER_SIZE, WAL_MAGIC, WAL_VERSION};
use tierkv_storage::StorageBackend;

/// A streaming iterator over WAL records.
///
/// Yields `(offset, record)` pairs. A truncated header or payload at the end
/// of the log is a clean end of stream; [`WalRecordIterator::valid_len`]
/// then reports where the last complete record ends so the caller can cut
/// the torn tail. CRC mismatches, bad magic, unknown record types, and
/// future versions are errors.
pub struct WalRecordIterator<'a> {
    backend: &'a dyn StorageBackend,
    total_size: u64,
    offset: u64,
    finished: bool,
}

impl<'a> WalRecordIterator<'a> {
    /// Creates an iterator starting at `start_offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn new(backend: &'a dyn StorageBackend, start_offset: u64) -> CoreResult<Self> {
        Ok(Self {
            backend,
            total_size: backend.size()?,
            offset: start_offset,
            finished: false,
        })
    }

    /// End offset of the last complete record read so far.
    #[must_use]
    pub fn valid_len(&self) -> u64 {
        self.offset
    }

    /// Whether bytes remain past [`Self::valid_len`].
    #[must_use]
    pub fn has_torn_tail(&self) -> bool {
        self.finished && self.offset < self.total_size
    }

    fn read_next(&mut self) -> CoreResult<Option<(u64, WalRecord)>> {
        if self.finished {
            return Ok(None);
        }

        let start = self.offset;
        let remaining = self.total_size - start;
        if remaining < (HEADER_SIZE + CRC_SIZE) as u64 {
            self.finished = true;
            return Ok(None);
        }

        let header = self.backend.read_at(start, HEADER_SIZE)?;
        if header[0..4] != WAL_MAGIC {
            self.finished = true;
            return Err(CoreError::wal_corruption(format!(
                "invalid magic at offset {start}"
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > WAL_VERSION {
            self.finished = true;
            return Err(CoreError::wal_corruption(format!(
                "unsupported version {version} at offset {start}"
            )));
        }

        let type_byte = header[6];
        let Some(record_type) = WalRecordType::from_byte(type_byte) else {
            self.finished = true;
            return Err(CoreError::wal_corruption(format!(
                "unknown record type {type_byte} at offset {start}"
            )));
        };

        let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        let record_len = (HEADER_SIZE + payload_len + CRC_SIZE) as u64;
        if record_len > remaining {
            self.finished = true;
            return Ok(None);
        }

        let body = self
            .backend
            .read_at(start + HEADER_SIZE as u64, payload_len + CRC_SIZE)?;
        let (payload, crc_bytes) = body.split_at(payload_len);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        hasher.update(payload);
        let actual = hasher.finalize();
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if expected != actual {
            self.finished = true;
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        let record = WalRecord::decode_payload(record_type, payload)?;
        self.offset = start + record_len;
        Ok(Some((start, record)))
    }
}

impl Iterator for WalRecordIterator<'_> {
    type Item = CoreResult<(u64, WalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
