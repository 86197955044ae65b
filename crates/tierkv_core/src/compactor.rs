//! Background compaction.
//!
//! Each open, writable database runs one `tierkv-compact` thread. It wakes
//! on explicit [`Kvdb::compact`](crate::Kvdb::compact) requests and on a
//! periodic timer. A timer pass only starts when space amplification is
//! above the high watermark and stops once it falls to the low watermark;
//! a requested pass rewrites every collection that has reclaimable space,
//! unless `samp_lwm` asks it to stop at the low watermark too.
//!
//! Collections are compacted one at a time, worst amplification first.
//! Cancellation is observed between collections and between keys.

use crate::catalog::Collection;
use crate::database::DbShared;
use crate::error::CoreResult;
use crate::segment::CompactionConfig;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

/// Name of the compaction thread.
pub const COMPACTION_THREAD_NAME: &str = "tierkv-compact";

/// WAL size at which the worker checkpoints on its own.
const WAL_CHECKPOINT_BYTES: u64 = 64 * 1024 * 1024;

/// Options of a [`Kvdb::compact`](crate::Kvdb::compact) request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactFlags {
    /// Cancel the pass in flight and drop queued requests.
    pub cancel: bool,
    /// Stop once space amplification reaches the low watermark.
    pub samp_lwm: bool,
}

/// Last observed compaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactStatus {
    /// Low watermark, percent.
    pub samp_lwm: u32,
    /// High watermark, percent.
    pub samp_hwm: u32,
    /// Current space amplification, percent.
    pub samp_curr: u32,
    /// A pass is running.
    pub active: bool,
    /// The last pass was canceled.
    pub canceled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Job {
    Requested { until_lwm: bool },
    Timer,
}

#[derive(Debug, Default)]
struct Queue {
    requests: VecDeque<Job>,
    shutdown: bool,
}

/// Coordination between API callers and the compaction thread.
#[derive(Debug, Default)]
pub(crate) struct CompactionControl {
    queue: Mutex<Queue>,
    wake: Condvar,
    /// Held while a collection is rewritten; dropping a collection waits.
    rewrite: Mutex<()>,
    active: AtomicBool,
    canceled: AtomicBool,
    cancel_requested: AtomicBool,
}

impl CompactionControl {
    pub(crate) fn request(&self, flags: CompactFlags) {
        let mut queue = self.queue.lock();
        if flags.cancel {
            queue.requests.clear();
            self.cancel_requested.store(true, Ordering::Release);
            self.canceled.store(true, Ordering::Release);
        } else {
            queue.requests.push_back(Job::Requested {
                until_lwm: flags.samp_lwm,
            });
        }
        self.wake.notify_one();
    }

    pub(crate) fn shutdown(&self) {
        let mut queue = self.queue.lock();
        queue.shutdown = true;
        queue.requests.clear();
        self.cancel_requested.store(true, Ordering::Release);
        self.wake.notify_all();
    }

    pub(crate) fn lock_rewrites(&self) -> MutexGuard<'_, ()> {
        self.rewrite.lock()
    }

    fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Blocks until there is work; `None` on shutdown.
    fn next_job(&self, interval: Duration) -> Option<Job> {
        let mut queue = self.queue.lock();
        loop {
            if queue.shutdown {
                return None;
            }
            if let Some(job) = queue.requests.pop_front() {
                return Some(job);
            }
            if interval.is_zero() {
                self.wake.wait(&mut queue);
            } else if self.wake.wait_for(&mut queue, interval).timed_out()
                && !queue.shutdown
                && queue.requests.is_empty()
            {
                return Some(Job::Timer);
            }
        }
    }

    fn begin_pass(&self) {
        let _queue = self.queue.lock();
        self.cancel_requested.store(false, Ordering::Release);
        self.canceled.store(false, Ordering::Release);
        self.active.store(true, Ordering::Release);
    }

    fn end_pass(&self, canceled: bool) {
        if canceled {
            self.canceled.store(true, Ordering::Release);
        }
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn status(&self, samp_lwm: u32, samp_hwm: u32, samp_curr: u32) -> CompactStatus {
        CompactStatus {
            samp_lwm,
            samp_hwm,
            samp_curr,
            active: self.active.load(Ordering::Acquire),
            canceled: self.canceled.load(Ordering::Acquire),
        }
    }
}

/// `100 * total / live`, 100 for an empty store.
pub(crate) fn amplification(total: u64, live: u64) -> u32 {
    if live == 0 {
        return if total == 0 { 100 } else { u32::MAX };
    }
    u32::try_from(total.saturating_mul(100) / live).unwrap_or(u32::MAX)
}

/// Space amplification over every collection of `db`.
pub(crate) fn space_amp(db: &DbShared) -> CoreResult<u32> {
    let (mut total, mut live) = (0u64, 0u64);
    for collection in db.catalog.all() {
        let (t, l) = collection.store.sizes()?;
        total += t;
        live += l;
    }
    Ok(amplification(total, live))
}

/// Starts the compaction thread of `db`.
pub(crate) fn spawn(db: &Arc<DbShared>, interval: Duration) -> CoreResult<JoinHandle<()>> {
    let weak = Arc::downgrade(db);
    let control = Arc::clone(&db.compaction);
    let handle = std::thread::Builder::new()
        .name(COMPACTION_THREAD_NAME.to_string())
        .spawn(move || worker_loop(&weak, &control, interval))?;
    Ok(handle)
}

fn worker_loop(db: &Weak<DbShared>, control: &CompactionControl, interval: Duration) {
    while let Some(job) = control.next_job(interval) {
        let Some(db) = db.upgrade() else {
            break;
        };
        if db.check_open().is_err() {
            break;
        }

        if let Err(e) = run_pass(&db, control, job) {
            tracing::error!(error = %e, "compaction pass failed");
        }
        if job == Job::Timer {
            if let Err(e) = checkpoint_if_large(&db) {
                tracing::error!(error = %e, "background checkpoint failed");
            }
        }
    }
    tracing::debug!("compaction thread exiting");
}

fn checkpoint_if_large(db: &DbShared) -> CoreResult<()> {
    if db.txns.wal().size()? >= WAL_CHECKPOINT_BYTES {
        db.checkpoint()?;
    }
    Ok(())
}

fn run_pass(db: &DbShared, control: &CompactionControl, job: Job) -> CoreResult<()> {
    let lwm = db.config.samp_lwm_pct;
    let start = db.guard(space_amp(db))?;
    if job == Job::Timer && start <= db.config.samp_hwm_pct {
        return Ok(());
    }
    let until_lwm = match job {
        Job::Requested { until_lwm } => until_lwm,
        Job::Timer => true,
    };

    control.begin_pass();
    tracing::info!(
        ?job,
        samp = start,
        snapshots = db.txns.snapshots().active_count(),
        "compaction pass started"
    );

    let mut order: Vec<(u32, Arc<Collection>)> = Vec::new();
    for collection in db.catalog.all() {
        let (total, live) = db.guard(collection.store.sizes())?;
        if total > live {
            order.push((amplification(total, live), collection));
        }
    }
    order.sort_by(|a, b| b.0.cmp(&a.0));

    let config = CompactionConfig::with_tombstone_retention(db.config.tombstone_retention);
    let mut canceled = false;
    let mut result = Ok(());
    for (_, collection) in order {
        if control.cancel_requested() {
            canceled = true;
            break;
        }
        if until_lwm {
            match db.guard(space_amp(db)) {
                Ok(samp) if samp <= lwm => break,
                Ok(_) => {}
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        let _rewrite = control.lock_rewrites();
        if collection.is_dropped() {
            continue;
        }
        let horizon = db.txns.snapshots().horizon();
        match db.guard(collection.store.compact(horizon, &config, || control.cancel_requested())) {
            Ok(Some(stats)) => {
                db.stats.record_compaction();
                tracing::info!(
                    collection = %collection.name,
                    horizon = horizon.as_u64(),
                    records_in = stats.input_records,
                    records_out = stats.output_records,
                    bytes_saved = stats.bytes_saved(),
                    "compacted collection"
                );
            }
            Ok(None) => {
                canceled = true;
                break;
            }
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }

    control.end_pass(canceled);
    if canceled {
        tracing::warn!("compaction pass canceled");
    } else {
        tracing::info!("compaction pass finished");
    }
    result
}
