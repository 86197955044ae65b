//! Transactions with snapshot isolation.
//!
//! - **Atomicity**: a commit's writes land in one WAL append and become
//!   visible together when its sequence is published
//! - **Isolation**: every transaction reads a pinned snapshot across all
//!   collections; write-write conflicts are first-committer-wins
//! - **Durability**: with `durability.enabled` the WAL is fsynced before
//!   commit returns

mod manager;
mod snapshot;
mod state;
mod write_set;

pub use state::{Transaction, TransactionState};

pub(crate) use manager::TransactionManager;
pub(crate) use snapshot::{Snapshot, SnapshotRegistry};
pub(crate) use state::TxnInner;
pub(crate) use write_set::{PendingRead, WriteSet};
