//! Shared integration test harness.

#![allow(dead_code)]

use parking_lot::{Mutex, MutexGuard};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tierkv_core::{Kvdb, Runtime};

/// Only one runtime may be live per process.
static RUNTIME_LOCK: Mutex<()> = Mutex::new(());

/// Open parameters that keep tests fast and deterministic.
pub const FAST: &[&str] = &["durability.enabled=false", "compaction.interval_ms=0"];

/// A runtime and a scratch directory, held for one test.
pub struct Harness {
    pub rt: Runtime,
    pub dir: TempDir,
    images: AtomicUsize,
    _serial: MutexGuard<'static, ()>,
}

impl Harness {
    pub fn new() -> Self {
        let serial = RUNTIME_LOCK.lock();
        Self {
            rt: Runtime::init(None, &[]).unwrap(),
            dir: tempfile::tempdir().unwrap(),
            images: AtomicUsize::new(0),
            _serial: serial,
        }
    }

    /// Default home directory.
    pub fn home(&self) -> PathBuf {
        self.dir.path().join("db")
    }

    /// Creates a database at the default home.
    pub fn create(&self, params: &[&str]) {
        Kvdb::create(&self.rt, self.home(), params).unwrap();
    }

    pub fn open(&self, params: &[&str]) -> Kvdb {
        Kvdb::open(&self.rt, self.home(), params).unwrap()
    }

    /// Creates and opens a database at the default home.
    pub fn fresh(&self, params: &[&str]) -> Kvdb {
        self.create(&[]);
        self.open(params)
    }

    /// Copies `home` as it is on disk right now, as a crash would leave it.
    pub fn crash_image(&self, home: &Path) -> PathBuf {
        let n = self.images.fetch_add(1, Ordering::Relaxed);
        let image = self.dir.path().join(format!("crash-{n}"));
        copy_tree(home, &image);
        image
    }
}

fn copy_tree(from: &Path, to: &Path) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_tree(&entry.path(), &target);
        } else {
            fs::copy(entry.path(), &target).unwrap();
        }
    }
}

/// Polls `done` until it holds or five seconds pass.
pub fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    done()
}

/// Path of the WAL under the default capacity directory of `home`.
pub fn wal_file(home: &Path) -> PathBuf {
    home.join("capacity").join("wal.log")
}

/// Path of a collection's segment under the default capacity directory.
pub fn segment_file(home: &Path, id: u32) -> PathBuf {
    home.join("capacity").join(format!("kvs-{id:06}.dat"))
}
