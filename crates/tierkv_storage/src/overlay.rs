//! Read-only file with an in-memory tail.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};

/// A backend that never writes to its base.
///
/// Reads below the base length go to the base; appends, truncates, and
/// rewrites only change an in-memory view. Read-only databases use it so
/// that recovery can repair and replay without touching the disk.
pub struct OverlayBackend {
    base: Box<dyn StorageBackend>,
    base_len: u64,
    tail: Vec<u8>,
}

impl OverlayBackend {
    /// Wraps `base`, whose current bytes become the visible prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the base size cannot be read.
    pub fn new(base: Box<dyn StorageBackend>) -> StorageResult<Self> {
        let base_len = base.size()?;
        Ok(Self {
            base,
            base_len,
            tail: Vec::new(),
        })
    }

    /// Returns the number of bytes held only in memory.
    #[must_use]
    pub fn tail_len(&self) -> usize {
        self.tail.len()
    }
}

impl std::fmt::Debug for OverlayBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayBackend")
            .field("base_len", &self.base_len)
            .field("tail_len", &self.tail.len())
            .finish_non_exhaustive()
    }
}

impl StorageBackend for OverlayBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = self.base_len + self.tail.len() as u64;
        let end = offset.saturating_add(len as u64);
        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if end <= self.base_len {
            return self.base.read_at(offset, len);
        }

        let mut out = Vec::with_capacity(len);
        if offset < self.base_len {
            out.extend(self.base.read_at(offset, (self.base_len - offset) as usize)?);
        }
        let from = offset.saturating_sub(self.base_len) as usize;
        let to = (end - self.base_len) as usize;
        out.extend_from_slice(&self.tail[from..to]);
        Ok(out)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.base_len + self.tail.len() as u64;
        self.tail.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.base_len + self.tail.len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let size = self.base_len + self.tail.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }

        if new_size >= self.base_len {
            self.tail.truncate((new_size - self.base_len) as usize);
        } else {
            self.base_len = new_size;
            self.tail.clear();
        }
        Ok(())
    }

    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()> {
        self.base_len = 0;
        self.tail = data.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileBackend;
    use crate::memory::InMemoryBackend;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn appends_stay_in_memory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kvs.dat");
        fs::write(&path, b"base").unwrap();

        let file = FileBackend::open_read_only(&path).unwrap();
        let mut overlay = OverlayBackend::new(Box::new(file)).unwrap();
        assert_eq!(overlay.append(b"+tail").unwrap(), 4);
        overlay.sync().unwrap();

        assert_eq!(overlay.size().unwrap(), 9);
        assert_eq!(overlay.read_at(2, 5).unwrap(), b"se+ta");
        assert_eq!(overlay.read_at(5, 4).unwrap(), b"tail");
        assert_eq!(overlay.tail_len(), 5);
        assert_eq!(fs::read(&path).unwrap(), b"base");
    }

    #[test]
    fn truncate_hides_base_bytes() {
        let base = InMemoryBackend::with_data(b"abcdef".to_vec());
        let mut overlay = OverlayBackend::new(Box::new(base)).unwrap();

        overlay.truncate(3).unwrap();
        assert_eq!(overlay.append(b"XY").unwrap(), 3);
        assert_eq!(overlay.read_at(0, 5).unwrap(), b"abcXY");
        assert!(overlay.read_at(4, 2).is_err());
        assert!(overlay.truncate(9).is_err());
    }

    #[test]
    fn rewrite_replaces_visible_content() {
        let base = InMemoryBackend::with_data(b"stale".to_vec());
        let mut overlay = OverlayBackend::new(Box::new(base)).unwrap();

        overlay.rewrite(b"new").unwrap();
        assert_eq!(overlay.size().unwrap(), 3);
        assert_eq!(overlay.read_at(0, 3).unwrap(), b"new");
    }
}
