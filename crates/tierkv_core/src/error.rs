//! Error types for the TierKV engine.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse classification of a [`CoreError`].
///
/// Callers that only need to branch on the failure category (retry on
/// `Conflict`, report `NotFound`) match on the kind instead of the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A named database or collection does not exist.
    NotFound,
    /// A database or collection with that name already exists.
    AlreadyExists,
    /// The resource is held exclusively elsewhere.
    Busy,
    /// A parameter, key, value, or name is malformed or out of range.
    InvalidArgument,
    /// The operation is not valid in the object's current state.
    InvalidState,
    /// The handle was closed, destroyed, or outlived its parent.
    InvalidHandle,
    /// A write-write conflict was detected at commit.
    Conflict,
    /// Storage failed or persisted data is corrupt.
    IoFailure,
    /// A fixed limit was reached.
    ResourceExhausted,
    /// The requested feature or media class is not available.
    NotSupported,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::AlreadyExists => "already exists",
            Self::Busy => "busy",
            Self::InvalidArgument => "invalid argument",
            Self::InvalidState => "invalid state",
            Self::InvalidHandle => "invalid handle",
            Self::Conflict => "conflict",
            Self::IoFailure => "I/O failure",
            Self::ResourceExhausted => "resource exhausted",
            Self::NotSupported => "not supported",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in TierKV core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tierkv_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// WAL is corrupted or invalid.
    #[error("WAL corruption: {message}")]
    WalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A segment file is corrupted or invalid.
    #[error("segment corruption: {message}")]
    SegmentCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// The manifest is corrupted or has an unknown format.
    #[error("invalid manifest: {message}")]
    InvalidManifest {
        /// Description of the problem.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// The database saw corruption after open and refuses further work.
    #[error("database failed after a storage error and must be reopened")]
    DatabaseFailed,

    /// A database or collection does not exist.
    #[error("{what} not found")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// A database or collection already exists.
    #[error("{what} already exists")]
    AlreadyExists {
        /// What collided.
        what: String,
    },

    /// The resource is held by someone else.
    #[error("busy: {message}")]
    Busy {
        /// Who holds it.
        message: String,
    },

    /// Malformed argument.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the argument problem.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// The handle is no longer usable.
    #[error("invalid handle: {what} is closed")]
    InvalidHandle {
        /// The kind of handle.
        what: &'static str,
    },

    /// Write-write conflict at commit.
    #[error("transaction conflict on key {key:?} in collection {collection_id}")]
    Conflict {
        /// Collection where the conflict occurred.
        collection_id: u32,
        /// The conflicting key.
        key: Vec<u8>,
    },

    /// A fixed limit was reached.
    #[error("resource exhausted: {message}")]
    ResourceExhausted {
        /// Which limit.
        message: String,
    },

    /// Feature or media class not available.
    #[error("not supported: {message}")]
    NotSupported {
        /// What is unsupported.
        message: String,
    },
}

impl CoreError {
    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage(_)
            | Self::Io(_)
            | Self::WalCorruption { .. }
            | Self::SegmentCorruption { .. }
            | Self::InvalidManifest { .. }
            | Self::ChecksumMismatch { .. }
            | Self::DatabaseFailed => ErrorKind::IoFailure,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::Busy { .. } => ErrorKind::Busy,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::InvalidHandle { .. } => ErrorKind::InvalidHandle,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Self::NotSupported { .. } => ErrorKind::NotSupported,
        }
    }

    /// Creates a WAL corruption error.
    pub fn wal_corruption(message: impl Into<String>) -> Self {
        Self::WalCorruption {
            message: message.into(),
        }
    }

    /// Creates a segment corruption error.
    pub fn segment_corruption(message: impl Into<String>) -> Self {
        Self::SegmentCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid manifest error.
    pub fn invalid_manifest(message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates an already exists error.
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists { what: what.into() }
    }

    /// Creates a busy error.
    pub fn busy(message: impl Into<String>) -> Self {
        Self::Busy {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an invalid handle error.
    #[must_use]
    pub fn invalid_handle(what: &'static str) -> Self {
        Self::InvalidHandle { what }
    }

    /// Creates a resource exhausted error.
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            message: message.into(),
        }
    }

    /// Creates a not supported error.
    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::NotSupported {
            message: message.into(),
        }
    }

    /// Whether this error means persisted state can no longer be trusted.
    pub(crate) fn is_storage_fault(&self) -> bool {
        self.kind() == ErrorKind::IoFailure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(CoreError::not_found("kvs x").kind(), ErrorKind::NotFound);
        assert_eq!(CoreError::busy("home").kind(), ErrorKind::Busy);
        assert_eq!(
            CoreError::invalid_handle("cursor").kind(),
            ErrorKind::InvalidHandle
        );
        assert_eq!(
            CoreError::ChecksumMismatch {
                expected: 1,
                actual: 2
            }
            .kind(),
            ErrorKind::IoFailure
        );
        assert_eq!(
            CoreError::Conflict {
                collection_id: 1,
                key: b"k".to_vec()
            }
            .kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn storage_errors_convert() {
        let err: CoreError = tierkv_storage::StorageError::TruncateBeyondEnd {
            requested: 10,
            size: 2,
        }
        .into();
        assert!(err.is_storage_fault());
        assert!(!CoreError::invalid_argument("x").is_storage_fault());
    }

    #[test]
    fn display_messages() {
        let err = CoreError::not_found("collection \"users\"");
        assert_eq!(err.to_string(), "collection \"users\" not found");
        assert_eq!(ErrorKind::IoFailure.to_string(), "I/O failure");
    }
}
