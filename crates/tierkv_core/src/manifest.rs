//! Database manifest.
//!
//! On disk: `magic (4) | version (2) | length (4) | CBOR body | crc32 (4)`,
//! where the CRC covers the CBOR body.

use crate::error::{CoreError, CoreResult};
use crate::limits::KVS_COUNT_MAX;
use crate::mclass::MediaPolicy;
use crate::types::CollectionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Magic bytes for manifest file.
pub const MANIFEST_MAGIC: [u8; 4] = *b"TKMF";

/// Current manifest version.
pub const MANIFEST_VERSION: u16 = 1;

const HEADER_SIZE: usize = 10;
const CRC_SIZE: usize = 4;

/// Default capacity tier directory, relative to the home.
pub const DEFAULT_CAPACITY_DIR: &str = "capacity";

/// Persistent description of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionEntry {
    /// Stable collection ID.
    pub id: u32,
    /// Required key prefix length.
    pub prefix_len: u32,
    /// Media placement.
    pub policy: MediaPolicy,
}

/// Database manifest containing metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Format version (major, minor).
    pub format_version: (u16, u16),
    /// Capacity tier directory as configured.
    pub capacity_path: String,
    /// Staging tier directory as configured.
    pub staging_path: Option<String>,
    /// Pmem tier directory as configured.
    pub pmem_path: Option<String>,
    /// Collections by name.
    pub collections: BTreeMap<String, CollectionEntry>,
    /// Next collection ID to assign.
    pub next_collection_id: u32,
    /// Highest commit sequence at the last clean checkpoint.
    pub last_sequence: u64,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY_DIR.to_string(), None, None)
    }
}

impl Manifest {
    /// Creates a new empty manifest.
    #[must_use]
    pub fn new(capacity_path: String, staging_path: Option<String>, pmem_path: Option<String>) -> Self {
        Self {
            format_version: (1, 0),
            capacity_path,
            staging_path,
            pmem_path,
            collections: BTreeMap::new(),
            next_collection_id: 1,
            last_sequence: 0,
        }
    }

    /// Registers a new collection and returns its ID.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` for a taken name and `ResourceExhausted` at
    /// [`KVS_COUNT_MAX`] collections.
    pub fn add_collection(
        &mut self,
        name: &str,
        prefix_len: u32,
        policy: MediaPolicy,
    ) -> CoreResult<CollectionId> {
        if self.collections.contains_key(name) {
            return Err(CoreError::already_exists(format!("collection {name:?}")));
        }
        if self.collections.len() >= KVS_COUNT_MAX {
            return Err(CoreError::resource_exhausted(format!(
                "database already holds {KVS_COUNT_MAX} collections"
            )));
        }

        let id = self.next_collection_id;
        self.next_collection_id += 1;
        self.collections.insert(
            name.to_string(),
            CollectionEntry {
                id,
                prefix_len,
                policy,
            },
        );
        Ok(CollectionId::new(id))
    }

    /// Removes a collection, returning its entry.
    pub fn remove_collection(&mut self, name: &str) -> Option<CollectionEntry> {
        self.collections.remove(name)
    }

    /// Gets a collection by name.
    #[must_use]
    pub fn get_collection(&self, name: &str) -> Option<&CollectionEntry> {
        self.collections.get(name)
    }

    /// Encodes the manifest to bytes.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut body = Vec::new();
        ciborium::into_writer(self, &mut body)
            .map_err(|e| CoreError::invalid_manifest(format!("encode failed: {e}")))?;
        let len = u32::try_from(body.len())
            .map_err(|_| CoreError::invalid_manifest("manifest body too large"))?;

        let mut buf = Vec::with_capacity(HEADER_SIZE + body.len() + CRC_SIZE);
        buf.extend_from_slice(&MANIFEST_MAGIC);
        buf.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&body);
        buf.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        Ok(buf)
    }

    /// Decodes a manifest from bytes.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < HEADER_SIZE + CRC_SIZE || data[0..4] != MANIFEST_MAGIC {
            return Err(CoreError::invalid_manifest("invalid manifest magic"));
        }

        let version = u16::from_le_bytes([data[4], data[5]]);
        if version > MANIFEST_VERSION {
            return Err(CoreError::invalid_manifest(format!(
                "unsupported manifest version: {version}"
            )));
        }

        let len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
        if data.len() != HEADER_SIZE + len + CRC_SIZE {
            return Err(CoreError::invalid_manifest(format!(
                "manifest is {} bytes, header says {}",
                data.len(),
                HEADER_SIZE + len + CRC_SIZE
            )));
        }

        let body = &data[HEADER_SIZE..HEADER_SIZE + len];
        let crc_start = HEADER_SIZE + len;
        let expected = u32::from_le_bytes([
            data[crc_start],
            data[crc_start + 1],
            data[crc_start + 2],
            data[crc_start + 3],
        ]);
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        ciborium::from_reader(body)
            .map_err(|e| CoreError::invalid_manifest(format!("decode failed: {e}")))
    }
}
