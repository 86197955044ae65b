//! WAL record types and serialization.

use crate::error::{CoreError, CoreResult};
use crate::types::{CollectionId, SequenceNumber, TransactionId};

/// Magic bytes identifying a WAL record.
pub const WAL_MAGIC: [u8; 4] = *b"TWAL";

/// Current WAL format version.
pub const WAL_VERSION: u16 = 1;

/// Header size: magic (4) + version (2) + type (1) + length (4).
pub(crate) const HEADER_SIZE: usize = 11;

/// CRC size.
pub(crate) const CRC_SIZE: usize = 4;

const PUT_COMPRESSED: u8 = 0x01;

/// Type of WAL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
    /// Start of a committed transaction's records.
    Begin = 1,
    /// Insert or overwrite a key.
    Put = 2,
    /// Tombstone a key.
    Delete = 3,
    /// End of a transaction, with its commit sequence.
    Commit = 4,
    /// Everything up to the sequence is durable in segments.
    Checkpoint = 5,
}

impl WalRecordType {
    /// Converts a byte to a record type.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Begin),
            2 => Some(Self::Put),
            3 => Some(Self::Delete),
            4 => Some(Self::Commit),
            5 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A WAL record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Start of a transaction.
    Begin {
        /// Transaction ID.
        txid: TransactionId,
    },

    /// Insert or overwrite a key.
    Put {
        /// Transaction ID.
        txid: TransactionId,
        /// Target collection.
        collection_id: CollectionId,
        /// Key bytes.
        key: Vec<u8>,
        /// Value bytes as stored.
        value: Vec<u8>,
        /// Whether `value` is zstd-compressed.
        compressed: bool,
    },

    /// Tombstone a key.
    Delete {
        /// Transaction ID.
        txid: TransactionId,
        /// Target collection.
        collection_id: CollectionId,
        /// Key bytes.
        key: Vec<u8>,
    },

    /// Commit a transaction.
    Commit {
        /// Transaction ID.
        txid: TransactionId,
        /// Sequence number assigned to this commit.
        sequence: SequenceNumber,
    },

    /// Checkpoint marker written after the WAL is reset.
    Checkpoint {
        /// Highest committed sequence at the checkpoint.
        sequence: SequenceNumber,
    },
}

impl WalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> WalRecordType {
        match self {
            Self::Begin { .. } => WalRecordType::Begin,
            Self::Put { .. } => WalRecordType::Put,
            Self::Delete { .. } => WalRecordType::Delete,
            Self::Commit { .. } => WalRecordType::Commit,
            Self::Checkpoint { .. } => WalRecordType::Checkpoint,
        }
    }

    /// Returns the transaction ID if this record is associated with one.
    #[must_use]
    pub fn txid(&self) -> Option<TransactionId> {
        match self {
            Self::Begin { txid }
            | Self::Put { txid, .. }
            | Self::Delete { txid, .. }
            | Self::Commit { txid, .. } => Some(*txid),
            Self::Checkpoint { .. } => None,
        }
    }

    /// Serializes the record payload (without envelope).
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();

        match self {
            Self::Begin { txid } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
            }

            Self::Put {
                txid,
                collection_id,
                key,
                value,
                compressed,
            } => {
                let value_len = u32::try_from(value.len())
                    .map_err(|_| CoreError::invalid_argument("value too large for the WAL"))?;
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                buf.extend_from_slice(&collection_id.as_u32().to_le_bytes());
                buf.push(if *compressed { PUT_COMPRESSED } else { 0 });
                put_key(&mut buf, key)?;
                buf.extend_from_slice(&value_len.to_le_bytes());
                buf.extend_from_slice(value);
            }

            Self::Delete {
                txid,
                collection_id,
                key,
            } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                buf.extend_from_slice(&collection_id.as_u32().to_le_bytes());
                put_key(&mut buf, key)?;
            }

            Self::Commit { txid, sequence } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
            }

            Self::Checkpoint { sequence } => {
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
            }
        }

        Ok(buf)
    }

    /// Encodes the full record: header, payload, and CRC.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_argument("WAL record payload too large"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&WAL_MAGIC);
        data.extend_from_slice(&WAL_VERSION.to_le_bytes());
        data.push(self.record_type().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        let crc = crc32fast::hash(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }

    /// Deserializes a record from its type and payload.
    pub fn decode_payload(record_type: WalRecordType, payload: &[u8]) -> CoreResult<Self> {
        let mut reader = PayloadReader::new(payload);

        let record = match record_type {
            WalRecordType::Begin => Self::Begin {
                txid: TransactionId::new(reader.u64()?),
            },
            WalRecordType::Put => {
                let txid = TransactionId::new(reader.u64()?);
                let collection_id = CollectionId::new(reader.u32()?);
                let flags = reader.u8()?;
                let key = reader.key()?;
                let value_len = reader.u32()? as usize;
                let value = reader.bytes(value_len)?.to_vec();
                Self::Put {
                    txid,
                    collection_id,
                    key,
                    value,
                    compressed: flags & PUT_COMPRESSED != 0,
                }
            }
            WalRecordType::Delete => Self::Delete {
                txid: TransactionId::new(reader.u64()?),
                collection_id: CollectionId::new(reader.u32()?),
                key: reader.key()?,
            },
            WalRecordType::Commit => Self::Commit {
                txid: TransactionId::new(reader.u64()?),
                sequence: SequenceNumber::new(reader.u64()?),
            },
            WalRecordType::Checkpoint => Self::Checkpoint {
                sequence: SequenceNumber::new(reader.u64()?),
            },
        };

        if !reader.is_empty() {
            return Err(CoreError::wal_corruption(format!(
                "trailing bytes in {record_type:?} record: {} of {} unread",
                reader.remaining(),
                payload.len()
            )));
        }
        Ok(record)
    }
}

fn put_key(buf: &mut Vec<u8>, key: &[u8]) -> CoreResult<()> {
    let len = u16::try_from(key.len())
        .map_err(|_| CoreError::invalid_argument("key too large for the WAL"))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(key);
    Ok(())
}

struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| CoreError::wal_corruption("unexpected end of payload"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let b = self.bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    fn key(&mut self) -> CoreResult<Vec<u8>> {
        let b = self.bytes(2)?;
        let len = u16::from_le_bytes([b[0], b[1]]) as usize;
        Ok(self.bytes(len)?.to_vec())
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}
