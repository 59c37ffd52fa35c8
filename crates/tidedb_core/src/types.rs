//! Core type definitions for TideDB.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A key as stored in segments and manifest descriptors.
///
/// Keys compare bytewise.
pub type Key = Bytes;

/// Monotonic sequence number.
///
/// Used both for record versions and for naming manifest snapshots and
/// merge outputs, so that no two updates ever write the same file.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// A level of the tree. Level 0 receives flushed segments; deeper levels hold
/// older, more merged data.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct LevelId(pub u32);

impl LevelId {
    /// Creates a level id.
    #[must_use]
    pub const fn new(level: u32) -> Self {
        Self(level)
    }

    /// Returns the raw level number.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the level that receives this level's compactions.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for LevelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Range of keys a segment cursor should cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRange {
    /// Every entry in the segment.
    All,
    /// Entries with `start <= key <= end`.
    Bounded {
        /// Inclusive lower bound.
        start: Key,
        /// Inclusive upper bound.
        end: Key,
    },
}

impl KeyRange {
    /// Creates an inclusive bounded range.
    pub fn bounded(start: impl Into<Key>, end: impl Into<Key>) -> Self {
        Self::Bounded {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Returns true if `key` falls inside the range.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        match self {
            Self::All => true,
            Self::Bounded { start, end } => start.as_ref() <= key && key <= end.as_ref(),
        }
    }
}

/// Computes a CRC32 (IEEE) checksum.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
