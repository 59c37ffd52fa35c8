//! Segment record types.

use crate::error::{CoreError, CoreResult};
use crate::types::{compute_crc32, Key, SequenceNumber};
use bytes::Bytes;

/// Flags for segment records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentRecordFlags(u8);

impl SegmentRecordFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Record is a tombstone (key deleted).
    pub const TOMBSTONE: Self = Self(0x01);

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
}

/// The value half of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordValue {
    /// A live value.
    Put(Bytes),
    /// A deletion marker.
    Tombstone,
}

impl RecordValue {
    fn flags(&self) -> SegmentRecordFlags {
        match self {
            Self::Put(_) => SegmentRecordFlags::NONE,
            Self::Tombstone => SegmentRecordFlags::TOMBSTONE,
        }
    }

    fn payload(&self) -> &[u8] {
        match self {
            Self::Put(value) => value,
            Self::Tombstone => &[],
        }
    }
}

/// A key/value record stored in a segment.
///
/// ```text
/// | record_len (4) | flags (1) | sequence (8) | key_len (4) | key | value | crc32 (4) |
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRecord {
    /// Record key.
    pub key: Key,
    /// Value or tombstone.
    pub value: RecordValue,
    /// Sequence number the record was written at.
    pub sequence: SequenceNumber,
}

impl SegmentRecord {
    /// Fixed header: record_len (4) + flags (1) + sequence (8) + key_len (4).
    const HEADER_SIZE: usize = 17;
    /// CRC size.
    const CRC_SIZE: usize = 4;

    /// Creates a put record.
    pub fn put(key: impl Into<Key>, value: impl Into<Bytes>, sequence: SequenceNumber) -> Self {
        Self {
            key: key.into(),
            value: RecordValue::Put(value.into()),
            sequence,
        }
    }

    /// Creates a tombstone record.
    pub fn tombstone(key: impl Into<Key>, sequence: SequenceNumber) -> Self {
        Self {
            key: key.into(),
            value: RecordValue::Tombstone,
            sequence,
        }
    }

    /// Returns whether this is a tombstone.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        matches!(self.value, RecordValue::Tombstone)
    }

    /// Returns the live value, or `None` for a tombstone.
    #[must_use]
    pub fn value(&self) -> Option<&Bytes> {
        match &self.value {
            RecordValue::Put(value) => Some(value),
            RecordValue::Tombstone => None,
        }
    }

    /// Returns the encoded size of this record.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        Self::HEADER_SIZE + self.key.len() + self.value.payload().len() + Self::CRC_SIZE
    }

    /// Encodes the record to bytes.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let record_len = u32::try_from(self.encoded_size())
            .map_err(|_| CoreError::invalid_operation("record exceeds 4 GiB"))?;
        let key_len = u32::try_from(self.key.len())
            .map_err(|_| CoreError::invalid_operation("key exceeds 4 GiB"))?;

        let mut buf = Vec::with_capacity(record_len as usize);
        buf.extend_from_slice(&record_len.to_le_bytes());
        buf.push(self.value.flags().as_byte());
        buf.extend_from_slice(&self.sequence.as_u64().to_le_bytes());
        buf.extend_from_slice(&key_len.to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(self.value.payload());

        // CRC32 over everything before it
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        Ok(buf)
    }

    /// Reads the `record_len` prefix of an encoded record.
    pub(crate) fn peek_len(prefix: &[u8]) -> CoreResult<usize> {
        let bytes: [u8; 4] = prefix
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| CoreError::segment_corruption("truncated record length"))?;
        let len = u32::from_le_bytes(bytes) as usize;
        if len < Self::HEADER_SIZE + Self::CRC_SIZE {
            return Err(CoreError::segment_corruption(format!(
                "record length {len} below minimum"
            )));
        }
        Ok(len)
    }

    /// Decodes a record from bytes.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        let record_len = Self::peek_len(data)?;
        if data.len() < record_len {
            return Err(CoreError::segment_corruption("incomplete record"));
        }

        let body = &data[..record_len - Self::CRC_SIZE];
        let stored_crc = u32::from_le_bytes([
            data[record_len - 4],
            data[record_len - 3],
            data[record_len - 2],
            data[record_len - 1],
        ]);
        let computed_crc = compute_crc32(body);
        if stored_crc != computed_crc {
            return Err(CoreError::ChecksumMismatch {
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let flags = SegmentRecordFlags::from_byte(body[4]);
        let sequence = SequenceNumber::new(u64::from_le_bytes([
            body[5], body[6], body[7], body[8], body[9], body[10], body[11], body[12],
        ]));
        let key_len = u32::from_le_bytes([body[13], body[14], body[15], body[16]]) as usize;

        let key_end = Self::HEADER_SIZE
            .checked_add(key_len)
            .filter(|&end| end <= body.len())
            .ok_or_else(|| CoreError::segment_corruption("key extends beyond record"))?;
        let key = Bytes::copy_from_slice(&body[Self::HEADER_SIZE..key_end]);
        let payload = &body[key_end..];

        let value = if flags.is_tombstone() {
            if !payload.is_empty() {
                return Err(CoreError::segment_corruption("tombstone carries a value"));
            }
            RecordValue::Tombstone
        } else {
            RecordValue::Put(Bytes::copy_from_slice(payload))
        };

        Ok(Self {
            key,
            value,
            sequence,
        })
    }
}
