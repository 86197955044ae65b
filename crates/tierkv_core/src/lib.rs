//! # TierKV Core
//!
//! Transactional, multi-collection embedded key-value engine.
//!
//! This crate provides:
//! - [`Runtime`], the process-wide context every database lives under
//! - [`Kvdb`], a database bound to a home directory, holding named
//!   collections spread over capacity, staging, and pmem media classes
//! - [`Kvs`] collection handles with put, get, delete, and prefix delete
//! - [`Transaction`]s with snapshot isolation across collections and
//!   first-committer-wins conflicts
//! - [`Cursor`]s reading a fixed snapshot, optionally through a transaction
//! - A write-ahead log, per-collection segment files, crash recovery, and a
//!   background compaction thread
//!
//! ## Example
//!
//! ```no_run
//! use tierkv_core::{CursorOptions, Kvdb, Runtime};
//!
//! # fn main() -> tierkv_core::CoreResult<()> {
//! let rt = Runtime::init(None, &[])?;
//! Kvdb::create(&rt, "/tmp/tierkv-demo", &[])?;
//! let db = Kvdb::open(&rt, "/tmp/tierkv-demo", &[])?;
//! db.create_collection("fruit", &["prefix.length=0"])?;
//! let fruit = db.open_collection("fruit", &[])?;
//!
//! let txn = db.transaction()?;
//! txn.begin()?;
//! fruit.put_with(Some(&txn), b"apple", b"red", Default::default())?;
//! fruit.put_with(Some(&txn), b"banana", b"yellow", Default::default())?;
//! txn.commit()?;
//!
//! let mut cursor = fruit.cursor(CursorOptions::new())?;
//! while let Some((key, value)) = cursor.read()? {
//!     println!("{} = {}", String::from_utf8_lossy(&key), String::from_utf8_lossy(&value));
//! }
//! db.close()?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod limits;
pub mod segment;
pub mod types;
pub mod wal;

mod catalog;
mod compactor;
mod cursor;
mod database;
mod dir;
mod error;
mod kvs;
mod manifest;
mod mclass;
mod runtime;
mod stats;
mod transaction;
mod value;

#[cfg(test)]
mod testing;

pub use compactor::{CompactFlags, CompactStatus, COMPACTION_THREAD_NAME};
pub use config::{Config, CreateConfig, KvsConfig, KvsCreateConfig, ValueCompression};
pub use cursor::{Cursor, CursorOptions};
pub use database::Kvdb;
pub use error::{CoreError, CoreResult, ErrorKind};
pub use kvs::{Kvs, PutFlags};
pub use mclass::{MediaClass, MediaClassInfo, MediaLayout, MediaPolicy};
pub use runtime::{Runtime, RuntimeConfig};
pub use stats::StatsSnapshot;
pub use transaction::{Transaction, TransactionState};
pub use types::{CollectionId, SequenceNumber, TransactionId};
