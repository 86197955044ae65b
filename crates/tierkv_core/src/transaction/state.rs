//! Transaction handle and state machine.

use crate::database::DbShared;
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::transaction::snapshot::Snapshot;
use crate::transaction::write_set::WriteSet;
use crate::types::{SequenceNumber, TransactionId};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// State of a transaction.
///
/// ```text
/// Invalid --begin--> Active --commit--> Committed --begin--> Active ...
///                       \---abort----> Aborted   --begin--> Active ...
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Allocated but never begun.
    Invalid,
    /// Accepting reads and writes.
    Active,
    /// Last cycle committed.
    Committed,
    /// Last cycle aborted, explicitly or by a conflict.
    Aborted,
}

pub(crate) struct TxnInner {
    pub(crate) state: TransactionState,
    closed: bool,
    /// Incremented by every `begin`; cursors remember the cycle they saw.
    pub(crate) cycle: u64,
    txid: TransactionId,
    snapshot: Option<Snapshot>,
    pub(crate) writes: WriteSet,
    pub(crate) prio: bool,
}

impl TxnInner {
    /// Sequence the active cycle reads at.
    pub(crate) fn snapshot_seq(&self) -> CoreResult<SequenceNumber> {
        self.snapshot
            .as_ref()
            .map(Snapshot::seq)
            .ok_or_else(|| CoreError::invalid_state("transaction is not active"))
    }

    fn end(&mut self, state: TransactionState) {
        self.state = state;
        self.snapshot = None;
        self.writes = WriteSet::default();
        self.prio = false;
    }
}

/// A reusable unit of atomic work across the collections of one database.
///
/// Obtained from [`Kvdb::transaction`](crate::Kvdb::transaction) in the
/// `Invalid` state. Each `begin` pins a snapshot of the committed state;
/// reads through the transaction see that snapshot overlaid with the
/// transaction's own writes. `commit` applies all writes atomically or
/// fails with `Conflict` if another commit touched a written key first.
///
/// Dropping or closing an active transaction aborts it.
///
/// # Example
///
/// ```no_run
/// # fn demo(db: &tierkv_core::Kvdb, kvs: &tierkv_core::Kvs) -> tierkv_core::CoreResult<()> {
/// let txn = db.transaction()?;
/// txn.begin()?;
/// kvs.put_with(Some(&txn), b"k", b"v", Default::default())?;
/// txn.commit()?;
/// # Ok(())
/// # }
/// ```
pub struct Transaction {
    db: Arc<DbShared>,
    inner: Mutex<TxnInner>,
}

impl Transaction {
    pub(crate) fn new(db: Arc<DbShared>) -> Self {
        Self {
            db,
            inner: Mutex::new(TxnInner {
                state: TransactionState::Invalid,
                closed: false,
                cycle: 0,
                txid: TransactionId::new(0),
                snapshot: None,
                writes: WriteSet::default(),
                prio: false,
            }),
        }
    }

    fn lock_open(&self) -> CoreResult<MutexGuard<'_, TxnInner>> {
        let inner = self.inner.lock();
        if inner.closed {
            return Err(CoreError::invalid_handle("transaction"));
        }
        self.db.check_open()?;
        Ok(inner)
    }

    /// Starts a new cycle with a fresh snapshot.
    ///
    /// # Errors
    ///
    /// `InvalidState` if already active; `InvalidHandle` if the transaction
    /// or its database is closed.
    pub fn begin(&self) -> CoreResult<()> {
        let mut inner = self.lock_open()?;
        if inner.state == TransactionState::Active {
            return Err(CoreError::invalid_state("transaction is already active"));
        }

        inner.cycle += 1;
        inner.txid = self.db.txns.allocate_txid();
        inner.snapshot = Some(self.db.txns.snapshots().acquire());
        inner.writes = WriteSet::default();
        inner.prio = false;
        inner.state = TransactionState::Active;
        Ok(())
    }

    /// Commits every buffered write atomically.
    ///
    /// On any error other than a closed handle the transaction ends
    /// `Aborted` and nothing is applied.
    ///
    /// # Errors
    ///
    /// `Conflict` on a write-write conflict; `InvalidState` unless active or
    /// when writing to a read-only database.
    pub fn commit(&self) -> CoreResult<()> {
        let mut inner = self.lock_open()?;
        if inner.state != TransactionState::Active {
            return Err(CoreError::invalid_state("transaction is not active"));
        }

        let result = if inner.writes.is_empty() {
            Ok(None)
        } else if self.db.config.read_only {
            Err(CoreError::invalid_state("database is read-only"))
        } else {
            let snapshot = inner.snapshot_seq()?;
            self.db.guard(self.db.txns.commit(
                inner.txid,
                snapshot,
                &inner.writes,
                inner.prio,
                &self.db.catalog,
            ))
        };

        match result {
            Ok(_) => {
                inner.end(TransactionState::Committed);
                self.db.stats.record_commit();
                Ok(())
            }
            Err(e) => {
                inner.end(TransactionState::Aborted);
                if e.kind() == ErrorKind::Conflict {
                    self.db.stats.record_conflict();
                } else {
                    self.db.stats.record_abort();
                }
                Err(e)
            }
        }
    }

    /// Discards every buffered write.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless active.
    pub fn abort(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(CoreError::invalid_handle("transaction"));
        }
        if inner.state != TransactionState::Active {
            return Err(CoreError::invalid_state("transaction is not active"));
        }
        inner.end(TransactionState::Aborted);
        self.db.stats.record_abort();
        Ok(())
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    /// Aborts an active cycle and invalidates the handle. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        if inner.state == TransactionState::Active {
            tracing::warn!(txid = inner.txid.as_u64(), "aborting active transaction on close");
            inner.end(TransactionState::Aborted);
            self.db.stats.record_abort();
        }
        inner.closed = true;
    }

    /// Runs `f` on an active transaction of `db`.
    pub(crate) fn with_active<R>(
        &self,
        db: &Arc<DbShared>,
        f: impl FnOnce(&mut TxnInner) -> CoreResult<R>,
    ) -> CoreResult<R> {
        if !Arc::ptr_eq(&self.db, db) {
            return Err(CoreError::invalid_argument(
                "transaction belongs to another database",
            ));
        }
        let mut inner = self.lock_open()?;
        if inner.state != TransactionState::Active {
            return Err(CoreError::invalid_state("transaction is not active"));
        }
        f(&mut inner)
    }

    /// Runs `f` if the transaction is still in cycle `cycle`.
    pub(crate) fn with_cycle<R>(
        &self,
        cycle: u64,
        f: impl FnOnce(&TxnInner) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let inner = self.lock_open()?;
        if inner.state != TransactionState::Active || inner.cycle != cycle {
            return Err(CoreError::invalid_state(
                "cursor's transaction is no longer active",
            ));
        }
        f(&inner)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if !inner.closed && inner.state == TransactionState::Active {
            tracing::warn!(txid = inner.txid.as_u64(), "aborting active transaction on drop");
            inner.end(TransactionState::Aborted);
            self.db.stats.record_abort();
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Transaction")
            .field("state", &inner.state)
            .field("txid", &inner.txid)
            .finish_non_exhaustive()
    }
}
