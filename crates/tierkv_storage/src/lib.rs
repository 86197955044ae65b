//! # TierKV Storage
//!
//! Byte-store backends underneath the TierKV engine.
//!
//! A backend is an **opaque, append-only byte store**: the engine owns every
//! file format (WAL records, segment records) and a backend never looks
//! inside the bytes it keeps.
//!
//! ## Backends
//!
//! - [`FileBackend`] - a single file on a media-class directory
//! - [`InMemoryBackend`] - a growable buffer, used by tests and scratch stores
//! - [`OverlayBackend`] - a read-only base with an in-memory tail
//!
//! ## Example
//!
//! ```rust
//! use tierkv_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"segment bytes").unwrap();
//! assert_eq!(backend.read_at(offset, 7).unwrap(), b"segment");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod overlay;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use overlay::OverlayBackend;
