//! Helpers shared by unit tests that need a live runtime.

use crate::database::Kvdb;
use crate::runtime::Runtime;
use parking_lot::Mutex;
use tempfile::tempdir;

/// Serializes tests that initialize the process-wide runtime.
static RUNTIME_LOCK: Mutex<()> = Mutex::new(());

/// Runs `f` against a fresh database opened with `params`.
pub(crate) fn with_db(params: &[&str], f: impl FnOnce(&Kvdb)) {
    let _serial = RUNTIME_LOCK.lock();
    let dir = tempdir().unwrap();
    let home = dir.path().join("db");
    let rt = Runtime::init(None, &[]).unwrap();
    Kvdb::create(&rt, &home, &[]).unwrap();
    let db = Kvdb::open(&rt, &home, params).unwrap();
    f(&db);
    db.close().unwrap();
    rt.finalize().unwrap();
}

/// Open parameters for fast, timer-free tests.
pub(crate) const QUIET: &[&str] = &["durability.enabled=false", "compaction.interval_ms=0"];
