//! Stored value encoding.

use crate::config::{KvsConfig, ValueCompression};
use crate::error::{CoreError, CoreResult};
use crate::limits::KVS_VALUE_LEN_MAX;

/// zstd level used for value compression.
const ZSTD_LEVEL: i32 = 3;

/// A value as it is written to the WAL and segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StoredValue {
    pub(crate) bytes: Vec<u8>,
    pub(crate) compressed: bool,
}

impl StoredValue {
    pub(crate) fn plain(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            compressed: false,
        }
    }

    /// Encodes `value` under the handle's compression settings.
    ///
    /// The compressed form is kept only when it is actually smaller.
    pub(crate) fn encode(value: &[u8], config: &KvsConfig, vcomp_off: bool) -> CoreResult<Self> {
        let compress = config.compression == ValueCompression::Zstd
            && !vcomp_off
            && value.len() >= config.compression_min_length;

        if compress {
            let packed = zstd::bulk::compress(value, ZSTD_LEVEL)?;
            if packed.len() < value.len() {
                return Ok(Self {
                    bytes: packed,
                    compressed: true,
                });
            }
        }
        Ok(Self::plain(value.to_vec()))
    }

    /// Returns the caller-visible bytes.
    pub(crate) fn decode(&self) -> CoreResult<Vec<u8>> {
        if !self.compressed {
            return Ok(self.bytes.clone());
        }
        zstd::bulk::decompress(&self.bytes, KVS_VALUE_LEN_MAX)
            .map_err(|e| CoreError::segment_corruption(format!("undecodable value: {e}")))
    }
}
