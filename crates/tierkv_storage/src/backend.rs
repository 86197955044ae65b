//! The storage backend trait.

use crate::error::StorageResult;

/// A byte store the engine writes WAL and segment files into.
///
/// # Invariants
///
/// - `append` returns the offset the bytes landed at, which equals the size
///   before the call
/// - `read_at` returns exactly the bytes previously appended at that offset
/// - after `sync` returns, every appended byte survives power loss
/// - `rewrite` replaces the whole content atomically: a crash leaves either
///   the old or the new content, never a mix
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range is not
    /// fully inside the stored bytes.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// This does not guarantee the bytes reached the device; use
    /// [`StorageBackend::sync`] for that.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the number of stored bytes.
    fn size(&self) -> StorageResult<u64>;

    /// Forces data and metadata to the device.
    fn sync(&mut self) -> StorageResult<()>;

    /// Drops every byte at or after `new_size`.
    ///
    /// Used to cut a torn tail after a crash and to empty the WAL after a
    /// checkpoint.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the whole content with `data`.
    ///
    /// Compaction uses this to swap a rewritten segment into place.
    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()>;
}
