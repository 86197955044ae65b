//! Write-Ahead Log (WAL) for durability and crash recovery.
//!
//! Every commit is written to the WAL before it is applied to the segment
//! files. On open, committed transactions whose versions are missing from
//! the segments are replayed.
//!
//! ## WAL Record Format
//!
//! ```text
//! | magic "TWAL" (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! A transaction is written as `Begin, Put/Delete..., Commit` in a single
//! append at commit time. `sync` empties the log and writes a `Checkpoint`
//! carrying the last committed sequence.
//!
//! ## Recovery Policy
//!
//! - A truncated header or payload at the end of the log is a crash during
//!   append: the tail is cut and recovery continues with earlier records.
//! - CRC mismatch, bad magic, unknown record types, and future versions are
//!   corruption and fail the open.
//! - A `Begin` without its `Commit` is skipped.

mod iterator;
mod record;
mod writer;

pub use iterator::WalRecordIterator;
pub use record::{WalRecord, WalRecordType, WAL_MAGIC, WAL_VERSION};
pub use writer::WalManager;
