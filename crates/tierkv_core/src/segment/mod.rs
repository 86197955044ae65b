//! Segment storage for committed key versions.
//!
//! Each collection owns one append-only segment file living in the media
//! class its policy selects. Records are immutable once written; compaction
//! rewrites the whole file atomically.
//!
//! ## Segment Record Format
//!
//! ```text
//! | len (4) | collection (4) | flags (1) | sequence (8) | key_len (2) | key | value | crc32 (4) |
//! ```

mod compaction;
mod record;
mod store;

pub use compaction::{CompactionConfig, CompactionResult};
pub use record::{SegmentRecord, SegmentRecordFlags};
pub use store::SegmentStore;

pub(crate) use store::bounds_ordered;
