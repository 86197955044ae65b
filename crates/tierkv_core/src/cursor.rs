//! Ordered cursors over a collection.
//!
//! A cursor merges two sources: the versions in the segment store visible
//! at its snapshot, and, for a cursor bound to a transaction, that
//! transaction's pending writes. A pending write to a key always wins over
//! the stored version, and pending deletes hide stored keys.
//!
//! Position is kept as a key bound rather than an iterator, so every read
//! re-seeks under short read locks and commits never wait on open cursors.

use crate::catalog::Collection;
use crate::database::DbShared;
use crate::error::{CoreError, CoreResult};
use crate::limits::KVS_KEY_LEN_MAX;
use crate::transaction::{Snapshot, Transaction};
use crate::value::StoredValue;
use std::cmp::Ordering as KeyOrdering;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How a cursor is created.
///
/// ```no_run
/// # use tierkv_core::{CursorOptions, Kvs};
/// # fn demo(kvs: &Kvs) -> tierkv_core::CoreResult<()> {
/// let mut cursor = kvs.cursor(CursorOptions::new().prefix(b"user:").reverse(true))?;
/// while let Some((key, value)) = cursor.read()? {
///     println!("{key:?} = {value:?}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct CursorOptions<'t> {
    prefix: Option<&'t [u8]>,
    reverse: bool,
    txn: Option<&'t Transaction>,
}

impl<'t> CursorOptions<'t> {
    /// Forward cursor over the whole collection at a fresh snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the cursor to keys starting with `prefix`.
    #[must_use]
    pub fn prefix(mut self, prefix: &'t [u8]) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Walks keys in descending order.
    #[must_use]
    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Reads through `txn`, seeing its pending writes.
    #[must_use]
    pub fn txn(mut self, txn: &'t Transaction) -> Self {
        self.txn = Some(txn);
        self
    }
}

/// Where the next read starts, in cursor direction.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Position {
    Start,
    /// The next read may return this key.
    At(Vec<u8>),
    /// The next read returns a key strictly past this one.
    After(Vec<u8>),
}

/// The view a cursor reads.
enum View<'t> {
    Snapshot(Snapshot),
    Txn { txn: &'t Transaction, cycle: u64 },
}

/// An ordered iterator over one collection.
///
/// Reads return `Ok(None)` at the end of the stream, and keep doing so until
/// the cursor is repositioned with [`seek`](Self::seek),
/// [`seek_range`](Self::seek_range), or [`update_view`](Self::update_view).
pub struct Cursor<'t> {
    db: Arc<DbShared>,
    collection: Arc<Collection>,
    kvs_closed: Arc<AtomicBool>,
    view: Option<View<'t>>,
    reverse: bool,
    prefix: Option<Vec<u8>>,
    range: Option<(Vec<u8>, Vec<u8>)>,
    position: Position,
    eof: bool,
}

impl<'t> Cursor<'t> {
    pub(crate) fn new(
        db: Arc<DbShared>,
        collection: Arc<Collection>,
        kvs_closed: Arc<AtomicBool>,
        options: CursorOptions<'t>,
    ) -> CoreResult<Self> {
        if let Some(prefix) = options.prefix {
            if prefix.len() > KVS_KEY_LEN_MAX {
                return Err(CoreError::invalid_argument(format!(
                    "cursor prefix is {} bytes, maximum is {KVS_KEY_LEN_MAX}",
                    prefix.len()
                )));
            }
        }

        let view = match options.txn {
            Some(txn) => {
                let cycle = txn.with_active(&db, |inner| Ok(inner.cycle))?;
                View::Txn { txn, cycle }
            }
            None => View::Snapshot(db.txns.snapshots().acquire()),
        };

        Ok(Self {
            db,
            collection,
            kvs_closed,
            view: Some(view),
            reverse: options.reverse,
            prefix: options.prefix.filter(|p| !p.is_empty()).map(<[u8]>::to_vec),
            range: None,
            position: Position::Start,
            eof: false,
        })
    }

    /// Whether the cursor walks keys in descending order.
    #[must_use]
    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    fn check(&self) -> CoreResult<()> {
        if self.view.is_none() || self.kvs_closed.load(Ordering::Acquire) {
            return Err(CoreError::invalid_handle("cursor"));
        }
        self.db.check_open()?;
        self.collection.ensure_live()
    }

    /// Returns the next key and value, or `None` at the end of the stream.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` after [`destroy`](Self::destroy); `InvalidState` if
    /// the bound transaction is no longer in the cycle the cursor saw.
    pub fn read(&mut self) -> CoreResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.check()?;
        if self.eof {
            return Ok(None);
        }
        match self.next_entry()? {
            Some((key, value)) => {
                self.position = Position::After(key.clone());
                self.db.stats.record_read(value.len());
                Ok(Some((key, value)))
            }
            None => {
                self.eof = true;
                Ok(None)
            }
        }
    }

    /// Moves to the first visible key at or past `key` in cursor direction.
    ///
    /// Returns the key the next read yields, or `None` if there is none.
    pub fn seek(&mut self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.check()?;
        self.position = Position::At(key.to_vec());
        self.settle()
    }

    /// Bounds later reads to `[min, max]` and moves to its start, or its
    /// end for a reverse cursor.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `min > max`.
    pub fn seek_range(&mut self, min: &[u8], max: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.check()?;
        if min > max {
            return Err(CoreError::invalid_argument("seek range minimum exceeds maximum"));
        }
        self.range = Some((min.to_vec(), max.to_vec()));
        self.position = Position::Start;
        self.settle()
    }

    /// Rebinds the cursor to the latest state it may see.
    ///
    /// An unbound cursor takes a fresh snapshot. A cursor bound to a
    /// transaction adopts the transaction's current cycle, so it keeps
    /// working after a commit or abort followed by `begin`. The position is
    /// kept: the next read continues after the last key returned.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the bound transaction is not active.
    pub fn update_view(&mut self) -> CoreResult<()> {
        self.check()?;
        match &mut self.view {
            Some(View::Snapshot(snapshot)) => {
                *snapshot = self.db.txns.snapshots().acquire();
            }
            Some(View::Txn { txn, cycle }) => {
                *cycle = txn.with_active(&self.db, |inner| Ok(inner.cycle))?;
            }
            None => {}
        }
        self.eof = false;
        Ok(())
    }

    /// Releases the cursor's snapshot. Idempotent.
    pub fn destroy(&mut self) {
        self.view = None;
    }

    /// Peeks the next entry and pins the position on it.
    fn settle(&mut self) -> CoreResult<Option<Vec<u8>>> {
        match self.next_entry()? {
            Some((key, _)) => {
                self.eof = false;
                self.position = Position::At(key.clone());
                Ok(Some(key))
            }
            None => {
                self.eof = true;
                Ok(None)
            }
        }
    }

    /// Key bounds from the prefix filter, the seek range, and the position.
    fn bounds(&self) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
        let mut lower = Bound::Unbounded;
        let mut upper = Bound::Unbounded;

        if let Some(prefix) = &self.prefix {
            lower = Bound::Included(prefix.clone());
            upper = prefix_successor(prefix).map_or(Bound::Unbounded, Bound::Excluded);
        }
        if let Some((min, max)) = &self.range {
            lower = tighter(lower, Bound::Included(min.clone()), KeyOrdering::Greater);
            upper = tighter(upper, Bound::Included(max.clone()), KeyOrdering::Less);
        }

        let from = match &self.position {
            Position::Start => Bound::Unbounded,
            Position::At(key) => Bound::Included(key.clone()),
            Position::After(key) => Bound::Excluded(key.clone()),
        };
        if self.reverse {
            upper = tighter(upper, from, KeyOrdering::Less);
        } else {
            lower = tighter(lower, from, KeyOrdering::Greater);
        }
        (lower, upper)
    }

    fn next_entry(&self) -> CoreResult<Option<(Vec<u8>, Vec<u8>)>> {
        let (lower, upper) = self.bounds();
        let (lower, upper) = (borrowed(&lower), borrowed(&upper));
        let id = self.collection.id;
        let store = &self.collection.store;

        let found = match &self.view {
            Some(View::Snapshot(snapshot)) => self.db.guard(store.seek_visible(
                lower,
                upper,
                self.reverse,
                snapshot.seq(),
                |_| false,
            ))?,
            Some(View::Txn { txn, cycle }) => txn.with_cycle(*cycle, |inner| {
                let stored = self.db.guard(store.seek_visible(
                    lower,
                    upper,
                    self.reverse,
                    inner.snapshot_seq()?,
                    |key| inner.writes.shadows(id, key),
                ))?;
                let pending = inner
                    .writes
                    .seek_put(id, lower, upper, self.reverse)
                    .map(|(key, value)| (key.to_vec(), value.clone()));
                Ok(nearest(stored, pending, self.reverse))
            })?,
            None => return Err(CoreError::invalid_handle("cursor")),
        };

        match found {
            Some((key, value)) => Ok(Some((key, value.decode()?))),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("collection", &self.collection.name)
            .field("reverse", &self.reverse)
            .field("position", &self.position)
            .field("eof", &self.eof)
            .field("destroyed", &self.view.is_none())
            .finish_non_exhaustive()
    }
}

/// Picks the entry that comes first in cursor direction.
fn nearest(
    stored: Option<(Vec<u8>, StoredValue)>,
    pending: Option<(Vec<u8>, StoredValue)>,
    reverse: bool,
) -> Option<(Vec<u8>, StoredValue)> {
    match (stored, pending) {
        (Some(s), Some(p)) => {
            let stored_first = if reverse { s.0 > p.0 } else { s.0 < p.0 };
            Some(if stored_first { s } else { p })
        }
        (entry, None) | (None, entry) => entry,
    }
}

/// Smallest key greater than every key starting with `prefix`.
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut next = prefix.to_vec();
    while let Some(last) = next.pop() {
        if last < u8::MAX {
            next.push(last + 1);
            return Some(next);
        }
    }
    None
}

/// Of two bounds on the same side, the one further in direction `wins`.
///
/// `Greater` keeps the larger lower bound, `Less` the smaller upper bound;
/// on equal keys the exclusive bound is tighter.
fn tighter(a: Bound<Vec<u8>>, b: Bound<Vec<u8>>, wins: KeyOrdering) -> Bound<Vec<u8>> {
    let keep_a = match (&a, &b) {
        (Bound::Unbounded, _) => false,
        (_, Bound::Unbounded) => true,
        (Bound::Included(x) | Bound::Excluded(x), Bound::Included(y) | Bound::Excluded(y)) => {
            match x.cmp(y) {
                KeyOrdering::Equal => matches!(a, Bound::Excluded(_)),
                order => order == wins,
            }
        }
    };
    if keep_a {
        a
    } else {
        b
    }
}

fn borrowed(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(key) => Bound::Included(key.as_slice()),
        Bound::Excluded(key) => Bound::Excluded(key.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}
