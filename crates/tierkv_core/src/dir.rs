//! Database directory management.
//!
//! This module handles the file system layout of a TierKV home:
//!
//! ```text
//! <home>/
//! ├─ MANIFEST          # CBOR metadata (tiers, collections, last sequence)
//! ├─ LOCK              # Advisory lock for single-process access
//! └─ capacity/         # Default capacity tier
//!    ├─ wal.log        # Write-ahead log (on pmem when configured)
//!    └─ kvs-000001.dat # One segment file per collection, in its tier
//! ```

use crate::error::{CoreError, CoreResult};
use crate::manifest::Manifest;
use crate::mclass::MediaLayout;
use crate::types::CollectionId;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TEMP: &str = "MANIFEST.tmp";
const LOCK_FILE: &str = "LOCK";
const WAL_FILE: &str = "wal.log";

/// Whether `home` holds a database.
#[must_use]
pub fn exists(home: &Path) -> bool {
    home.join(MANIFEST_FILE).is_file()
}

/// Path of the WAL for `layout`.
#[must_use]
pub fn wal_path(layout: &MediaLayout) -> PathBuf {
    layout.wal_dir().join(WAL_FILE)
}

/// Path of the segment file of collection `id` inside `class_dir`.
#[must_use]
pub fn segment_path(class_dir: &Path, id: CollectionId) -> PathBuf {
    class_dir.join(format!("kvs-{:06}.dat", id.as_u32()))
}

/// Removes a segment file and makes the removal durable.
pub(crate) fn remove_segment(class_dir: &Path, id: CollectionId) -> CoreResult<()> {
    let path = segment_path(class_dir, id);
    if path.exists() {
        fs::remove_file(&path)?;
        sync_directory(class_dir)?;
    }
    Ok(())
}

/// Removes every directory of `layout` and then `home`.
pub(crate) fn destroy(home: &Path, layout: &MediaLayout) -> CoreResult<()> {
    for (_, dir) in layout.configured_dirs() {
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
    }
    if home.exists() {
        fs::remove_dir_all(home)?;
    }
    Ok(())
}

/// Holds the exclusive lock on a home directory.
///
/// Only one `DatabaseDir` can exist per directory at a time across
/// processes; the lock is released when the value is dropped.
#[derive(Debug)]
pub struct DatabaseDir {
    path: PathBuf,
    _lock_file: File,
}

impl DatabaseDir {
    /// Initializes a new home: directory, tiers, and first manifest.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if a manifest is present and `Busy` if the
    /// directory is locked.
    pub fn create(home: &Path, manifest: &Manifest, layout: &MediaLayout) -> CoreResult<Self> {
        fs::create_dir_all(home)?;
        if exists(home) {
            return Err(CoreError::already_exists(format!(
                "database at {}",
                home.display()
            )));
        }

        let dir = Self::lock(home)?;
        for (_, class_dir) in layout.configured_dirs() {
            fs::create_dir_all(class_dir)?;
        }
        dir.save_manifest(manifest)?;
        Ok(dir)
    }

    /// Locks an existing home.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` without a manifest and `Busy` if another process
    /// holds the lock.
    pub fn open(home: &Path) -> CoreResult<Self> {
        if !exists(home) {
            return Err(CoreError::not_found(format!(
                "database at {}",
                home.display()
            )));
        }
        Self::lock(home)
    }

    fn lock(home: &Path) -> CoreResult<Self> {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(home.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::busy(format!(
                "database {} is locked by another process",
                home.display()
            )));
        }

        Ok(Self {
            path: home.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Loads the manifest.
    pub fn load_manifest(&self) -> CoreResult<Manifest> {
        let data = fs::read(self.path.join(MANIFEST_FILE))?;
        Manifest::decode(&data)
    }

    /// Saves the manifest atomically (temp file, fsync, rename, dir fsync).
    pub fn save_manifest(&self, manifest: &Manifest) -> CoreResult<()> {
        let temp_path = self.path.join(MANIFEST_TEMP);

        let data = manifest.encode()?;
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.path.join(MANIFEST_FILE))?;
        sync_directory(&self.path)
    }

    /// Resolves the tier directories recorded in `manifest`.
    #[must_use]
    pub fn layout(&self, manifest: &Manifest) -> MediaLayout {
        MediaLayout::resolve(
            &self.path,
            &manifest.capacity_path,
            manifest.staging_path.as_deref(),
            manifest.pmem_path.as_deref(),
        )
    }

    /// Makes sure every configured tier directory exists.
    pub(crate) fn ensure_class_dirs(layout: &MediaLayout) -> CoreResult<()> {
        for (_, dir) in layout.configured_dirs() {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn sync_directory(path: &Path) -> CoreResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> CoreResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mclass::MediaPolicy;
    use tempfile::tempdir;

    fn layout_for(home: &Path, manifest: &Manifest) -> MediaLayout {
        MediaLayout::resolve(
            home,
            &manifest.capacity_path,
            manifest.staging_path.as_deref(),
            manifest.pmem_path.as_deref(),
        )
    }

    #[test]
    fn create_then_open() {
        let temp = tempdir().unwrap();
        let home = temp.path().join("db");
        let manifest = Manifest::default();
        let layout = layout_for(&home, &manifest);

        let dir = DatabaseDir::create(&home, &manifest, &layout).unwrap();
        assert!(exists(&home));
        assert!(home.join("capacity").is_dir());
        drop(dir);

        let dir = DatabaseDir::open(&home).unwrap();
        assert_eq!(dir.load_manifest().unwrap(), manifest);
    }

    #[test]
    fn create_twice_fails() {
        let temp = tempdir().unwrap();
        let manifest = Manifest::default();
        let layout = layout_for(temp.path(), &manifest);

        drop(DatabaseDir::create(temp.path(), &manifest, &layout).unwrap());
        assert_eq!(
            DatabaseDir::create(temp.path(), &manifest, &layout)
                .unwrap_err()
                .kind(),
            ErrorKind::AlreadyExists
        );
    }

    #[test]
    fn open_missing_is_not_found() {
        let temp = tempdir().unwrap();
        assert_eq!(
            DatabaseDir::open(&temp.path().join("none"))
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let manifest = Manifest::default();
        let layout = layout_for(temp.path(), &manifest);

        let _held = DatabaseDir::create(temp.path(), &manifest, &layout).unwrap();
        assert_eq!(
            DatabaseDir::open(temp.path()).unwrap_err().kind(),
            ErrorKind::Busy
        );
    }

    #[test]
    fn manifest_save_replaces() {
        let temp = tempdir().unwrap();
        let mut manifest = Manifest::default();
        let layout = layout_for(temp.path(), &manifest);
        let dir = DatabaseDir::create(temp.path(), &manifest, &layout).unwrap();

        manifest.add_collection("users", 0, MediaPolicy::Auto).unwrap();
        dir.save_manifest(&manifest).unwrap();
        assert!(dir.load_manifest().unwrap().get_collection("users").is_some());
        assert!(!temp.path().join(MANIFEST_TEMP).exists());
    }

    #[test]
    fn paths_are_correct() {
        let temp = tempdir().unwrap();
        let manifest = Manifest::new("capacity".into(), None, Some("pm".into()));
        let layout = layout_for(temp.path(), &manifest);

        assert_eq!(wal_path(&layout), temp.path().join("pm").join("wal.log"));
        assert_eq!(
            segment_path(&temp.path().join("capacity"), CollectionId::new(3)),
            temp.path().join("capacity").join("kvs-000003.dat")
        );
    }

    #[test]
    fn destroy_removes_external_tiers() {
        let temp = tempdir().unwrap();
        let home = temp.path().join("db");
        let external = temp.path().join("fast");
        let manifest = Manifest::new(
            "capacity".into(),
            Some(external.to_string_lossy().into_owned()),
            None,
        );
        let layout = layout_for(&home, &manifest);
        drop(DatabaseDir::create(&home, &manifest, &layout).unwrap());
        assert!(external.is_dir());

        destroy(&home, &layout).unwrap();
        assert!(!home.exists());
        assert!(!external.exists());
    }
}
