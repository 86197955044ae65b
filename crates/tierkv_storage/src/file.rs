//! File-backed storage.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Suffix of the scratch file written by [`StorageBackend::rewrite`].
const REWRITE_SUFFIX: &str = "rewrite";

/// A storage backend over a single file.
///
/// Reads and appends share one file handle behind a mutex, so a `FileBackend`
/// can be read from several threads at once. The logical size is tracked in
/// memory and always matches the file length.
///
/// # Durability
///
/// - `flush()` hands buffered bytes to the OS (`File::flush`)
/// - `sync()` calls `File::sync_all`
/// - `rewrite()` writes a sibling file, syncs it and renames it over the
///   original
///
/// # Example
///
/// ```no_run
/// use tierkv_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("kvs-000001.dat")).unwrap();
/// backend.append(b"record").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    size: u64,
}

impl FileBackend {
    /// Opens the file at `path`, creating it when missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = Self::open_file(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size,
        })
    }

    /// Opens the file at `path`, creating missing parent directories first.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory or the file cannot be created.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Opens an existing file at `path` without write access.
    ///
    /// Appends, truncates, and rewrites fail with an I/O error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size,
        })
    }

    /// Returns the path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_file(path: &Path) -> StorageResult<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(file)
    }

    fn rewrite_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".");
        name.push(REWRITE_SUFFIX);
        PathBuf::from(name)
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let end = offset.saturating_add(len as u64);
        if offset > self.size || end > self.size {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: self.size,
            });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.size;
        if data.is_empty() {
            return Ok(offset);
        }

        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        self.size += data.len() as u64;

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.get_mut().flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.size)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.get_mut().sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if new_size > self.size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: self.size,
            });
        }

        let file = self.file.get_mut();
        file.set_len(new_size)?;
        file.sync_all()?;
        self.size = new_size;

        Ok(())
    }

    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()> {
        let scratch = self.rewrite_path();
        {
            let mut out = File::create(&scratch)?;
            out.write_all(data)?;
            out.sync_all()?;
        }
        fs::rename(&scratch, &self.path)?;
        sync_parent(&self.path)?;

        *self.file.get_mut() = Self::open_file(&self.path)?;
        self.size = data.len() as u64;
        Ok(())
    }
}

/// Makes a rename inside the parent of `path` durable.
#[cfg(unix)]
fn sync_parent(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> StorageResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kvs.dat");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
        assert_eq!(backend.path(), path);
    }

    #[test]
    fn append_returns_offsets_and_reads_back() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("kvs.dat")).unwrap();

        assert_eq!(backend.append(b"alpha").unwrap(), 0);
        assert_eq!(backend.append(b"beta").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 9);

        assert_eq!(backend.read_at(5, 4).unwrap(), b"beta");
        assert!(backend.read_at(7, 0).unwrap().is_empty());
    }

    #[test]
    fn read_past_end_fails() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("kvs.dat")).unwrap();
        backend.append(b"abc").unwrap();

        assert!(matches!(
            backend.read_at(2, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn content_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kvs.dat");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"durable bytes").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 13);
        assert_eq!(backend.read_at(0, 13).unwrap(), b"durable bytes");
    }

    #[test]
    fn truncate_cuts_tail() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("wal.log")).unwrap();
        backend.append(b"complete|torn").unwrap();

        backend.truncate(8).unwrap();
        assert_eq!(backend.size().unwrap(), 8);
        assert_eq!(backend.append(b"!").unwrap(), 8);
        assert_eq!(backend.read_at(0, 9).unwrap(), b"complete!");

        assert!(matches!(
            backend.truncate(100),
            Err(StorageError::TruncateBeyondEnd { .. })
        ));
    }

    #[test]
    fn rewrite_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kvs.dat");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"old old old").unwrap();
        backend.rewrite(b"new").unwrap();

        assert_eq!(backend.size().unwrap(), 3);
        assert_eq!(backend.read_at(0, 3).unwrap(), b"new");
        assert_eq!(backend.append(b"+").unwrap(), 3);
        assert!(!backend.rewrite_path().exists());

        drop(backend);
        assert_eq!(fs::read(&path).unwrap(), b"new+");
    }

    #[test]
    fn open_with_create_dirs_builds_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("staging").join("kvs.dat");

        let backend = FileBackend::open_with_create_dirs(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn read_only_open_leaves_file_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        fs::write(&path, b"abcdef").unwrap();

        let mut backend = FileBackend::open_read_only(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 6);
        assert_eq!(backend.read_at(2, 3).unwrap(), b"cde");
        assert!(backend.append(b"x").is_err());
        assert!(backend.truncate(2).is_err());

        drop(backend);
        assert_eq!(fs::read(&path).unwrap(), b"abcdef");
    }

    #[test]
    fn read_only_open_requires_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.dat");

        assert!(FileBackend::open_read_only(&path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn rewrite_in_nested_directory_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("capacity").join("kvs-000001.dat");

        let mut backend = FileBackend::open_with_create_dirs(&path).unwrap();
        backend.append(b"stale versions").unwrap();
        backend.rewrite(b"live").unwrap();
        drop(backend);

        let reopened = FileBackend::open(&path).unwrap();
        assert_eq!(reopened.size().unwrap(), 4);
        assert_eq!(reopened.read_at(0, 4).unwrap(), b"live");
    }
}
