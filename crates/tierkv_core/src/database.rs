//! Database handle, recovery, and shutdown.

use crate::catalog::{Catalog, Collection};
use crate::compactor::{self, CompactFlags, CompactStatus, CompactionControl};
use crate::config::{Config, CreateConfig, KvsConfig, KvsCreateConfig};
use crate::dir::{self, DatabaseDir};
use crate::error::{CoreError, CoreResult};
use crate::kvs::Kvs;
use crate::limits::validate_name;
use crate::manifest::{Manifest, DEFAULT_CAPACITY_DIR};
use crate::mclass::{MediaClass, MediaClassInfo, MediaLayout};
use crate::runtime::{Runtime, RuntimeInner};
use crate::stats::{DatabaseStats, StatsSnapshot};
use crate::transaction::{Transaction, TransactionManager};
use crate::types::{CollectionId, SequenceNumber, TransactionId};
use crate::value::StoredValue;
use crate::wal::{WalManager, WalRecord};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tierkv_storage::{FileBackend, InMemoryBackend, OverlayBackend, StorageBackend};

/// State shared by a database handle and every handle derived from it.
pub(crate) struct DbShared {
    runtime: Arc<RuntimeInner>,
    home: PathBuf,
    pub(crate) config: Config,
    pub(crate) layout: MediaLayout,
    /// Holds the directory lock; `None` once closed.
    dir: Mutex<Option<DatabaseDir>>,
    manifest: Mutex<Manifest>,
    pub(crate) catalog: Catalog,
    pub(crate) txns: TransactionManager,
    pub(crate) stats: DatabaseStats,
    pub(crate) compaction: Arc<CompactionControl>,
    worker: Mutex<Option<JoinHandle<()>>>,
    open: AtomicBool,
    failed: AtomicBool,
}

impl DbShared {
    /// Fails with `InvalidHandle` once closed and `DatabaseFailed` after a
    /// storage fault.
    pub(crate) fn check_open(&self) -> CoreResult<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(CoreError::invalid_handle("database"));
        }
        if self.failed.load(Ordering::Acquire) {
            return Err(CoreError::DatabaseFailed);
        }
        Ok(())
    }

    pub(crate) fn check_writable(&self) -> CoreResult<()> {
        self.check_open()?;
        if self.config.read_only {
            return Err(CoreError::invalid_state("database is read-only"));
        }
        Ok(())
    }

    /// Passes `result` through, marking the database failed on a storage
    /// fault.
    pub(crate) fn guard<T>(&self, result: CoreResult<T>) -> CoreResult<T> {
        if let Err(e) = &result {
            if e.is_storage_fault() && !self.failed.swap(true, Ordering::AcqRel) {
                tracing::error!(
                    home = %self.home.display(),
                    error = %e,
                    "storage fault, database marked failed"
                );
            }
        }
        result
    }

    /// Syncs every segment, empties the WAL, and records the covered
    /// sequence in the manifest.
    pub(crate) fn checkpoint(&self) -> CoreResult<()> {
        let seq = self.guard(self.txns.checkpoint(&self.catalog))?;
        let mut manifest = self.manifest.lock();
        if manifest.last_sequence != seq.as_u64() {
            let mut next = manifest.clone();
            next.last_sequence = seq.as_u64();
            self.save_manifest(&next)?;
            *manifest = next;
        }
        self.stats.record_checkpoint();
        Ok(())
    }

    fn save_manifest(&self, manifest: &Manifest) -> CoreResult<()> {
        let dir = self.dir.lock();
        let dir = dir
            .as_ref()
            .ok_or_else(|| CoreError::invalid_handle("database"))?;
        self.guard(dir.save_manifest(manifest))
    }

    fn close(&self) -> CoreResult<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        self.compaction.shutdown();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!("compaction thread panicked");
            }
        }

        let result = if self.config.read_only || self.failed.load(Ordering::Acquire) {
            Ok(())
        } else {
            self.checkpoint()
        };

        *self.dir.lock() = None;
        self.runtime.release_home(&self.home);
        tracing::info!(home = %self.home.display(), "closed database");
        result
    }
}

impl std::fmt::Debug for DbShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbShared")
            .field("home", &self.home)
            .field("read_only", &self.config.read_only)
            .field("open", &self.open.load(Ordering::Relaxed))
            .field("failed", &self.failed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Outcome of replaying the WAL over the segments.
#[derive(Debug, Default)]
struct Replay {
    committed: u64,
    max_txid: u64,
    applied: usize,
    skipped: usize,
    incomplete: usize,
}

struct ReplayOp {
    collection_id: CollectionId,
    key: Vec<u8>,
    value: Option<StoredValue>,
}

/// Applies committed WAL transactions that the segments do not hold yet.
///
/// A collection's versions below its highest segment sequence are already
/// durable, so only commits at or above it are applied to it. Operations on
/// collections that no longer exist are skipped.
fn replay(records: Vec<(u64, WalRecord)>, catalog: &Catalog, last_sequence: u64) -> CoreResult<Replay> {
    let floors: HashMap<CollectionId, u64> = catalog
        .all()
        .iter()
        .map(|c| (c.id, c.store.max_seq().as_u64()))
        .collect();

    let mut out = Replay {
        committed: floors.values().copied().fold(last_sequence, u64::max),
        ..Replay::default()
    };
    let mut pending: HashMap<TransactionId, Vec<ReplayOp>> = HashMap::new();

    for (offset, record) in records {
        if let Some(txid) = record.txid() {
            out.max_txid = out.max_txid.max(txid.as_u64());
        }
        match record {
            WalRecord::Begin { txid } => {
                pending.insert(txid, Vec::new());
            }
            WalRecord::Put {
                txid,
                collection_id,
                key,
                value,
                compressed,
            } => {
                if let Some(ops) = pending.get_mut(&txid) {
                    ops.push(ReplayOp {
                        collection_id,
                        key,
                        value: Some(StoredValue {
                            bytes: value,
                            compressed,
                        }),
                    });
                }
            }
            WalRecord::Delete {
                txid,
                collection_id,
                key,
            } => {
                if let Some(ops) = pending.get_mut(&txid) {
                    ops.push(ReplayOp {
                        collection_id,
                        key,
                        value: None,
                    });
                }
            }
            WalRecord::Commit { txid, sequence } => {
                out.committed = out.committed.max(sequence.as_u64());
                let Some(ops) = pending.remove(&txid) else {
                    tracing::warn!(offset, txid = txid.as_u64(), "commit without begin in WAL");
                    continue;
                };
                for op in ops {
                    let Some(collection) = catalog.get(op.collection_id) else {
                        out.skipped += 1;
                        continue;
                    };
                    // A crash can leave part of the newest group in the
                    // segment; `apply` skips the versions already there.
                    let floor = floors.get(&op.collection_id).copied().unwrap_or(0);
                    if sequence.as_u64() >= floor {
                        collection.store.apply(&op.key, sequence, op.value.as_ref())?;
                        out.applied += 1;
                    }
                }
            }
            WalRecord::Checkpoint { sequence } => {
                out.committed = out.committed.max(sequence.as_u64());
            }
        }
    }

    out.incomplete = pending.len();
    Ok(out)
}

fn path_string(path: &Path) -> CoreResult<String> {
    path.to_str().map(str::to_string).ok_or_else(|| {
        CoreError::invalid_argument(format!("path {} is not valid UTF-8", path.display()))
    })
}

/// Resolves `home` to the key the runtime registry uses.
fn canonical_home(home: &Path) -> CoreResult<PathBuf> {
    if !dir::exists(home) {
        return Err(CoreError::not_found(format!("database at {}", home.display())));
    }
    Ok(fs::canonicalize(home)?)
}

/// An open database.
///
/// A `Kvdb` owns a home directory exclusively, both against other processes
/// (advisory lock) and within this process (runtime registry). Collections,
/// transactions, and cursors obtained from it stay valid until it is closed.
///
/// # Example
///
/// ```no_run
/// use tierkv_core::{Kvdb, Runtime};
///
/// # fn demo() -> tierkv_core::CoreResult<()> {
/// let rt = Runtime::init(None, &[])?;
/// Kvdb::create(&rt, "/tmp/db", &[])?;
/// let db = Kvdb::open(&rt, "/tmp/db", &["durability.enabled=false"])?;
/// db.create_collection("users", &[])?;
/// let users = db.open_collection("users", &[])?;
/// users.put(b"alice", b"1")?;
/// db.close()?;
/// # Ok(())
/// # }
/// ```
pub struct Kvdb {
    shared: Arc<DbShared>,
}

impl Kvdb {
    /// Creates a database at `home` from `storage.*.path` parameters.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if a database is present, `InvalidArgument` for
    /// malformed parameters, `IoFailure` for storage errors.
    pub fn create(runtime: &Runtime, home: impl AsRef<Path>, params: &[&str]) -> CoreResult<()> {
        Self::create_with(runtime, home, CreateConfig::from_params(params)?)
    }

    /// Creates a database at `home`.
    pub fn create_with(runtime: &Runtime, home: impl AsRef<Path>, config: CreateConfig) -> CoreResult<()> {
        runtime.inner().ensure_live()?;
        let home = home.as_ref();

        let capacity = match &config.capacity_path {
            Some(path) => path_string(path)?,
            None => DEFAULT_CAPACITY_DIR.to_string(),
        };
        let staging = config.staging_path.as_deref().map(path_string).transpose()?;
        let pmem = config.pmem_path.as_deref().map(path_string).transpose()?;
        let manifest = Manifest::new(capacity, staging, pmem);
        let layout = MediaLayout::resolve(
            home,
            &manifest.capacity_path,
            manifest.staging_path.as_deref(),
            manifest.pmem_path.as_deref(),
        );

        DatabaseDir::create(home, &manifest, &layout)?;
        tracing::info!(
            home = %home.display(),
            staging = layout.is_configured(MediaClass::Staging),
            pmem = layout.is_configured(MediaClass::Pmem),
            wal = %layout.wal_class(),
            "created database"
        );
        Ok(())
    }

    /// Opens the database at `home` with open-time parameters.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent, `Busy` if already open here or in another
    /// process, `InvalidArgument` for malformed parameters, `IoFailure` if
    /// recovery finds corruption.
    pub fn open(runtime: &Runtime, home: impl AsRef<Path>, params: &[&str]) -> CoreResult<Self> {
        Self::open_with(runtime, home, Config::from_params(params)?)
    }

    /// Opens the database at `home`.
    pub fn open_with(runtime: &Runtime, home: impl AsRef<Path>, config: Config) -> CoreResult<Self> {
        let runtime = runtime.inner();
        runtime.ensure_live()?;
        config.validate()?;
        let home = canonical_home(home.as_ref())?;

        runtime.register_home(&home)?;
        let shared = match Self::recover(runtime, &home, config) {
            Ok(shared) => Arc::new(shared),
            Err(e) => {
                runtime.release_home(&home);
                return Err(e);
            }
        };

        if !shared.config.read_only {
            let interval = shared
                .config
                .compaction_interval
                .unwrap_or(runtime.config().compaction_interval);
            match compactor::spawn(&shared, interval) {
                Ok(worker) => *shared.worker.lock() = Some(worker),
                Err(e) => {
                    let _ = shared.close();
                    return Err(e);
                }
            }
        }

        Ok(Self { shared })
    }

    fn recover(runtime: &Arc<RuntimeInner>, home: &Path, config: Config) -> CoreResult<DbShared> {
        let dir = DatabaseDir::open(home)?;
        let manifest = dir.load_manifest()?;
        let layout = dir.layout(&manifest);
        let writable = !config.read_only;
        if writable {
            DatabaseDir::ensure_class_dirs(&layout)?;
        }

        let catalog = Catalog::default();
        for (name, entry) in &manifest.collections {
            catalog.insert(Arc::new(Collection::open(name, entry, &layout, writable)?));
        }

        let wal_path = dir::wal_path(&layout);
        let wal_backend: Box<dyn StorageBackend> = if writable {
            Box::new(FileBackend::open_with_create_dirs(&wal_path)?)
        } else if wal_path.exists() {
            let file = FileBackend::open_read_only(&wal_path)?;
            Box::new(OverlayBackend::new(Box::new(file))?)
        } else {
            Box::new(InMemoryBackend::new())
        };
        let wal = WalManager::new(wal_backend);
        let records = wal.recover(writable)?;
        let wal_records = records.len();
        let replay = replay(records, &catalog, manifest.last_sequence)?;

        tracing::info!(
            home = %home.display(),
            collections = manifest.collections.len(),
            wal_records,
            replayed = replay.applied,
            skipped = replay.skipped,
            incomplete = replay.incomplete,
            committed = replay.committed,
            read_only = config.read_only,
            "opened database"
        );

        let txns = TransactionManager::new(
            wal,
            TransactionId::new(replay.max_txid + 1),
            SequenceNumber::new(replay.committed),
            config.durability,
        );

        Ok(DbShared {
            runtime: Arc::clone(runtime),
            home: home.to_path_buf(),
            config,
            layout,
            dir: Mutex::new(Some(dir)),
            manifest: Mutex::new(manifest),
            catalog,
            txns,
            stats: DatabaseStats::new(),
            compaction: Arc::new(CompactionControl::default()),
            worker: Mutex::new(None),
            open: AtomicBool::new(true),
            failed: AtomicBool::new(false),
        })
    }

    /// Destroys the database at `home`, including every tier directory.
    ///
    /// # Errors
    ///
    /// `Busy` if the database is open, `NotFound` if absent.
    pub fn destroy(runtime: &Runtime, home: impl AsRef<Path>) -> CoreResult<()> {
        let runtime = runtime.inner();
        runtime.ensure_live()?;
        let home = canonical_home(home.as_ref())?;
        if runtime.is_open(&home) {
            return Err(CoreError::busy(format!(
                "database {} is open",
                home.display()
            )));
        }

        let dir = DatabaseDir::open(&home)?;
        let manifest = dir.load_manifest()?;
        let layout = dir.layout(&manifest);
        drop(dir);

        dir::destroy(&home, &layout)?;
        tracing::info!(home = %home.display(), "destroyed database");
        Ok(())
    }

    /// Checkpoints, stops compaction, and releases the home. Idempotent.
    ///
    /// Every handle derived from this database fails with `InvalidHandle`
    /// afterwards.
    pub fn close(&self) -> CoreResult<()> {
        self.shared.close()
    }

    /// Canonical home directory.
    #[must_use]
    pub fn home(&self) -> &Path {
        &self.shared.home
    }

    /// Names of every collection, sorted.
    pub fn collection_names(&self) -> CoreResult<Vec<String>> {
        self.shared.check_open()?;
        Ok(self.shared.manifest.lock().collections.keys().cloned().collect())
    }

    /// Creates a collection from `prefix.length` and `mclass.policy`
    /// parameters.
    pub fn create_collection(&self, name: &str, params: &[&str]) -> CoreResult<()> {
        self.create_collection_with(name, KvsCreateConfig::from_params(params)?)
    }

    /// Creates a collection.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` for a taken name, `InvalidArgument` for a bad name or
    /// prefix length, `ResourceExhausted` at the collection limit,
    /// `NotSupported` when the policy names an unconfigured tier.
    pub fn create_collection_with(&self, name: &str, config: KvsCreateConfig) -> CoreResult<()> {
        let db = &self.shared;
        db.check_writable()?;
        validate_name(name)?;
        config.validate()?;
        config.policy.resolve(&db.layout)?;

        let mut manifest = db.manifest.lock();
        let mut next = manifest.clone();
        let prefix_len = u32::try_from(config.prefix_len)
            .map_err(|_| CoreError::invalid_argument("prefix length out of range"))?;
        let id = next.add_collection(name, prefix_len, config.policy)?;
        let entry = next
            .get_collection(name)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("collection {name:?}")))?;

        let collection = db.guard(Collection::open(name, &entry, &db.layout, true))?;
        db.save_manifest(&next)?;
        *manifest = next;
        db.catalog.insert(Arc::new(collection));

        tracing::info!(collection = name, id = %id, prefix_len, "created collection");
        Ok(())
    }

    /// Opens a handle to a collection with `compression.value.*` parameters.
    pub fn open_collection(&self, name: &str, params: &[&str]) -> CoreResult<Kvs> {
        self.open_collection_with(name, KvsConfig::from_params(params)?)
    }

    /// Opens a handle to a collection.
    ///
    /// # Errors
    ///
    /// `NotFound` if no collection has that name.
    pub fn open_collection_with(&self, name: &str, config: KvsConfig) -> CoreResult<Kvs> {
        self.shared.check_open()?;
        let collection = self
            .shared
            .catalog
            .by_name(name)
            .ok_or_else(|| CoreError::not_found(format!("collection {name:?}")))?;
        Ok(Kvs::new(Arc::clone(&self.shared), collection, config))
    }

    /// Removes a collection and its data.
    ///
    /// Open handles to it fail with `InvalidHandle` afterwards.
    ///
    /// # Errors
    ///
    /// `NotFound` if no collection has that name.
    pub fn drop_collection(&self, name: &str) -> CoreResult<()> {
        let db = &self.shared;
        db.check_writable()?;

        let _commits = db.txns.lock_commits();
        let _rewrites = db.compaction.lock_rewrites();
        let mut manifest = db.manifest.lock();
        let entry = manifest
            .get_collection(name)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("collection {name:?}")))?;

        let mut next = manifest.clone();
        next.remove_collection(name);
        db.save_manifest(&next)?;
        *manifest = next;

        let id = CollectionId::new(entry.id);
        if let Some(collection) = db.catalog.remove(id) {
            collection.mark_dropped();
            db.guard(dir::remove_segment(db.layout.dir(collection.class)?, id))?;
        }

        tracing::info!(collection = name, id = %id, "dropped collection");
        Ok(())
    }

    /// Makes every committed write durable and truncates the WAL.
    pub fn sync(&self) -> CoreResult<()> {
        self.shared.check_open()?;
        if self.shared.config.read_only {
            return Ok(());
        }
        self.shared.checkpoint()
    }

    /// Hands buffered writes to the operating system without fsync.
    pub fn flush(&self) -> CoreResult<()> {
        let db = &self.shared;
        db.check_open()?;
        db.guard(db.txns.wal().flush())?;
        for collection in db.catalog.all() {
            db.guard(collection.store.flush())?;
        }
        Ok(())
    }

    /// Queues a compaction request and returns immediately.
    pub fn compact(&self, flags: CompactFlags) -> CoreResult<()> {
        self.shared.check_writable()?;
        self.shared.compaction.request(flags);
        Ok(())
    }

    /// Reports the watermarks, the current space amplification, and the
    /// state of the compaction thread.
    pub fn compact_status(&self) -> CoreResult<CompactStatus> {
        let db = &self.shared;
        db.check_open()?;
        let samp = db.guard(compactor::space_amp(db))?;
        Ok(db
            .compaction
            .status(db.config.samp_lwm_pct, db.config.samp_hwm_pct, samp))
    }

    /// Reports usage of one media class.
    ///
    /// # Errors
    ///
    /// `NotSupported` if the class is not configured.
    pub fn mclass_info(&self, class: MediaClass) -> CoreResult<MediaClassInfo> {
        self.shared.check_open()?;
        self.shared.layout.info(class)
    }

    /// Allocates a transaction in the `Invalid` state.
    pub fn transaction(&self) -> CoreResult<Transaction> {
        self.shared.check_open()?;
        Ok(Transaction::new(Arc::clone(&self.shared)))
    }

    /// Current operation counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Whether the database was opened read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.shared.config.read_only
    }
}

impl Drop for Kvdb {
    fn drop(&mut self) {
        if let Err(e) = self.shared.close() {
            tracing::error!(error = %e, "failed to close database on drop");
        }
    }
}

impl std::fmt::Debug for Kvdb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kvdb")
            .field("shared", &self.shared)
            .finish()
    }
}
