//! Segment record types.

use crate::error::{CoreError, CoreResult};
use crate::types::{CollectionId, SequenceNumber};
use crate::value::StoredValue;

/// Flags for segment records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentRecordFlags(u8);

impl SegmentRecordFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Record is a tombstone (key deleted).
    pub const TOMBSTONE: Self = Self(0x01);
    /// Value is zstd-compressed.
    pub const COMPRESSED: Self = Self(0x02);

    /// Creates new flags from raw byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Self {
        Self(b)
    }

    /// Returns the raw byte value.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Checks if tombstone flag is set.
    #[must_use]
    pub const fn is_tombstone(self) -> bool {
        self.0 & 0x01 != 0
    }

    /// Checks if the compressed flag is set.
    #[must_use]
    pub const fn is_compressed(self) -> bool {
        self.0 & 0x02 != 0
    }
}

/// One committed version of a key.
///
/// ```text
/// | len (4) | collection (4) | flags (1) | sequence (8) | key_len (2) | key | value | crc32 (4) |
/// ```
///
/// `len` covers the whole record including itself and the CRC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRecord {
    /// Collection this key belongs to.
    pub collection_id: CollectionId,
    /// Record flags.
    pub flags: SegmentRecordFlags,
    /// Sequence of the commit that wrote this version.
    pub sequence: SequenceNumber,
    /// Key bytes.
    pub key: Vec<u8>,
    /// Value as stored (possibly compressed), empty for tombstones.
    pub value: Vec<u8>,
}

impl SegmentRecord {
    /// Header size: len (4) + collection (4) + flags (1) + sequence (8) + key_len (2).
    pub(crate) const HEADER_SIZE: usize = 19;
    /// CRC size.
    pub(crate) const CRC_SIZE: usize = 4;

    /// Creates a record from a committed write; `None` is a tombstone.
    #[must_use]
    pub(crate) fn from_write(
        collection_id: CollectionId,
        key: &[u8],
        sequence: SequenceNumber,
        value: Option<&StoredValue>,
    ) -> Self {
        let (flags, value) = match value {
            Some(v) if v.compressed => (SegmentRecordFlags::COMPRESSED, v.bytes.clone()),
            Some(v) => (SegmentRecordFlags::NONE, v.bytes.clone()),
            None => (SegmentRecordFlags::TOMBSTONE, Vec::new()),
        };
        Self {
            collection_id,
            flags,
            sequence,
            key: key.to_vec(),
            value,
        }
    }

    /// Returns whether this is a tombstone.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.flags.is_tombstone()
    }

    /// Returns the stored value, or `None` for a tombstone.
    pub(crate) fn stored_value(&self) -> Option<StoredValue> {
        (!self.is_tombstone()).then(|| StoredValue {
            bytes: self.value.clone(),
            compressed: self.flags.is_compressed(),
        })
    }

    /// Encodes the record to bytes.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let key_len = u16::try_from(self.key.len())
            .map_err(|_| CoreError::invalid_argument("key too long for segment record"))?;
        let record_len = self.encoded_size();
        let record_len_u32 = u32::try_from(record_len)
            .map_err(|_| CoreError::invalid_argument("segment record too large"))?;

        let mut buf = Vec::with_capacity(record_len);
        buf.extend_from_slice(&record_len_u32.to_le_bytes());
        buf.extend_from_slice(&self.collection_id.as_u32().to_le_bytes());
        buf.push(self.flags.as_byte());
        buf.extend_from_slice(&self.sequence.as_u64().to_le_bytes());
        buf.extend_from_slice(&key_len.to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decodes a record from exactly one record's bytes.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < Self::HEADER_SIZE + Self::CRC_SIZE {
            return Err(CoreError::segment_corruption("record too short"));
        }

        let record_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if record_len != data.len() {
            return Err(CoreError::segment_corruption(format!(
                "record length {record_len} does not match {} bytes read",
                data.len()
            )));
        }

        let body_end = record_len - Self::CRC_SIZE;
        let expected = u32::from_le_bytes([
            data[body_end],
            data[body_end + 1],
            data[body_end + 2],
            data[body_end + 3],
        ]);
        let actual = crc32fast::hash(&data[..body_end]);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        let collection_id =
            CollectionId::new(u32::from_le_bytes([data[4], data[5], data[6], data[7]]));
        let flags = SegmentRecordFlags::from_byte(data[8]);
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&data[9..17]);
        let sequence = SequenceNumber::new(u64::from_le_bytes(seq));
        let key_len = u16::from_le_bytes([data[17], data[18]]) as usize;

        let key_end = Self::HEADER_SIZE + key_len;
        if key_end > body_end {
            return Err(CoreError::segment_corruption("key extends past record"));
        }

        Ok(Self {
            collection_id,
            flags,
            sequence,
            key: data[Self::HEADER_SIZE..key_end].to_vec(),
            value: data[key_end..body_end].to_vec(),
        })
    }

    /// Returns the encoded size of this record.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        Self::HEADER_SIZE + self.key.len() + self.value.len() + Self::CRC_SIZE
    }
}
