//! Level manifest: which segments exist at which level.
//!
//! A [`Manifest`] is an immutable snapshot. Every change (a merge, a move, an
//! ingested flush) produces a new snapshot; readers keep using the `Arc` they
//! already hold until they drop it. Within every level ≥ 1 entries are sorted
//! by `start_key` and never overlap:
//!
//! ```text
//! for adjacent e1, e2 in level L >= 1:  e1.end_key < e2.start_key
//! ```
//!
//! ## Snapshot File Format
//!
//! ```text
//! | magic "TDMF" (4) | version (2) | body_len (4) | CBOR body | crc32 (4) |
//! ```
//!
//! Snapshots are written with exclusive-create semantics, one file per update.

use crate::error::{CoreError, CoreResult};
use crate::segment::{SegmentHandle, SegmentRecord};
use crate::types::{compute_crc32, Key, LevelId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tidedb_storage::{FileBackend, StorageBackend};

/// Magic bytes for manifest snapshot files.
pub const MANIFEST_MAGIC: [u8; 4] = *b"TDMF";

/// Current manifest snapshot format version.
pub const MANIFEST_VERSION: u16 = 1;

const MANIFEST_PREFIX_SIZE: usize = 10;

/// Descriptor of one published segment.
#[derive(Clone)]
pub struct ManifestEntry {
    /// Smallest key in the segment.
    pub start_key: Key,
    /// Largest key in the segment.
    pub end_key: Key,
    /// Live handle to the segment reader.
    pub segment: SegmentHandle,
    /// File backing the segment.
    pub filename: PathBuf,
}

impl ManifestEntry {
    /// Describes a sealed segment using its actual key range and path.
    #[must_use]
    pub fn from_segment(segment: SegmentHandle) -> Self {
        Self {
            start_key: segment.first_key().clone(),
            end_key: segment.last_key().clone(),
            filename: segment.path().to_path_buf(),
            segment,
        }
    }

    /// Returns true if the entry's range intersects `[start, end]`.
    #[must_use]
    pub fn overlaps(&self, start: &[u8], end: &[u8]) -> bool {
        !(self.end_key.as_ref() < start || self.start_key.as_ref() > end)
    }

    /// Returns true if `key` lies within the entry's range.
    #[must_use]
    pub fn covers(&self, key: &[u8]) -> bool {
        self.start_key.as_ref() <= key && key <= self.end_key.as_ref()
    }

    /// Returns true if both descriptors name the same segment file.
    #[must_use]
    pub fn same_segment(&self, other: &Self) -> bool {
        self.filename == other.filename
    }
}

impl PartialEq for ManifestEntry {
    fn eq(&self, other: &Self) -> bool {
        self.filename == other.filename
            && self.start_key == other.start_key
            && self.end_key == other.end_key
    }
}

impl Eq for ManifestEntry {}

impl fmt::Debug for ManifestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManifestEntry")
            .field("start_key", &self.start_key)
            .field("end_key", &self.end_key)
            .field("filename", &self.filename)
            .finish()
    }
}

/// An immutable snapshot of every level's segments.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    version: u64,
    levels: BTreeMap<LevelId, Vec<ManifestEntry>>,
}

impl Manifest {
    /// Creates an empty manifest at version 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the snapshot version. Every accepted change increments it.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the entries of `level`, empty if the level has none.
    #[must_use]
    pub fn level(&self, level: LevelId) -> &[ManifestEntry] {
        self.levels.get(&level).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Iterates over non-empty levels in ascending order.
    pub fn levels(&self) -> impl Iterator<Item = (LevelId, &[ManifestEntry])> {
        self.levels
            .iter()
            .map(|(level, entries)| (*level, entries.as_slice()))
    }

    /// Returns the number of segments in `level`.
    #[must_use]
    pub fn segment_count(&self, level: LevelId) -> usize {
        self.level(level).len()
    }

    /// Returns the number of segments across all levels.
    #[must_use]
    pub fn total_segments(&self) -> usize {
        self.levels.values().map(Vec::len).sum()
    }

    /// Iterates over every entry in every level.
    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.levels.values().flatten()
    }

    /// Returns a copy with `level` replaced by `entries`, sorted by start key.
    #[must_use]
    pub fn with_level(&self, level: LevelId, mut entries: Vec<ManifestEntry>) -> Self {
        entries.sort_by(|a, b| a.start_key.cmp(&b.start_key));
        let mut levels = self.levels.clone();
        if entries.is_empty() {
            levels.remove(&level);
        } else {
            levels.insert(level, entries);
        }
        Self {
            version: self.version,
            levels,
        }
    }

    /// Returns a copy carrying `version`.
    #[must_use]
    pub fn with_version(&self, version: u64) -> Self {
        Self {
            version,
            levels: self.levels.clone(),
        }
    }

    /// Checks the ordering and non-overlap invariant of every level ≥ 1.
    pub fn validate(&self) -> CoreResult<()> {
        for (level, entries) in &self.levels {
            for entry in entries {
                if entry.start_key > entry.end_key {
                    return Err(CoreError::invalid_format(format!(
                        "{level}: {} has start key after end key",
                        entry.filename.display()
                    )));
                }
            }
            if level.as_u32() == 0 {
                continue;
            }
            for pair in entries.windows(2) {
                if pair[0].end_key >= pair[1].start_key {
                    return Err(CoreError::invalid_format(format!(
                        "{level}: {} overlaps {}",
                        pair[0].filename.display(),
                        pair[1].filename.display()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Finds the entry in `level` whose range covers `key`.
    #[must_use]
    pub fn find(&self, level: LevelId, key: &[u8]) -> Option<&ManifestEntry> {
        let entries = self.level(level);
        if level.as_u32() == 0 {
            return entries.iter().rev().find(|entry| entry.covers(key));
        }
        let pos = entries.partition_point(|entry| entry.end_key.as_ref() < key);
        entries.get(pos).filter(|entry| entry.covers(key))
    }

    /// Looks `key` up from the newest level down.
    ///
    /// The first record found wins, tombstones included.
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<SegmentRecord>> {
        for (level, entries) in &self.levels {
            // Level 0 ranges may overlap, newest entry last.
            let candidates: Vec<&ManifestEntry> = if level.as_u32() == 0 {
                entries.iter().rev().filter(|e| e.covers(key)).collect()
            } else {
                self.find(*level, key).into_iter().collect()
            };
            for entry in candidates {
                if let Some(record) = entry.segment.get(key)? {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    /// Builds the serializable form of this snapshot.
    #[must_use]
    pub fn to_record(&self) -> ManifestRecord {
        let levels = self
            .levels
            .iter()
            .map(|(level, entries)| {
                let entries = entries
                    .iter()
                    .map(|entry| EntryRecord {
                        start_key: entry.start_key.to_vec(),
                        end_key: entry.end_key.to_vec(),
                        file: file_name(&entry.filename),
                    })
                    .collect();
                (level.as_u32(), entries)
            })
            .collect();
        ManifestRecord {
            version: self.version,
            levels,
        }
    }

    /// Rebuilds a snapshot from a decoded record, opening each segment with
    /// `open`.
    pub fn from_record<F>(record: &ManifestRecord, mut open: F) -> CoreResult<Self>
    where
        F: FnMut(&str) -> CoreResult<SegmentHandle>,
    {
        let mut levels = BTreeMap::new();
        for (level, entries) in &record.levels {
            let mut opened = Vec::with_capacity(entries.len());
            for entry in entries {
                let segment = open(&entry.file)?;
                if segment.first_key().as_ref() != entry.start_key.as_slice()
                    || segment.last_key().as_ref() != entry.end_key.as_slice()
                {
                    return Err(CoreError::invalid_format(format!(
                        "segment {} does not match its manifest key range",
                        entry.file
                    )));
                }
                opened.push(ManifestEntry::from_segment(segment));
            }
            levels.insert(LevelId::new(*level), opened);
        }
        let manifest = Self {
            version: record.version,
            levels,
        };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Writes this snapshot to `path`. Fails if the file already exists.
    ///
    /// # Errors
    ///
    /// Any failure is reported as [`CoreError::ManifestPersistFailure`]; the
    /// snapshot must then not be treated as durable.
    pub fn persist(&self, path: &Path) -> CoreResult<()> {
        let write = || -> CoreResult<()> {
            let bytes = self.to_record().encode()?;
            let mut backend = FileBackend::create_new(path)?;
            backend.append(&bytes)?;
            backend.sync()?;
            Ok(())
        };
        write().map_err(|e| CoreError::persist_failure(path, e.to_string()))
    }

    /// Reads and decodes the snapshot file at `path`.
    pub fn read_record(path: &Path) -> CoreResult<ManifestRecord> {
        let backend = FileBackend::open_read_only(path)?;
        let size = backend.size()?;
        let bytes = backend.read_at(0, size as usize)?;
        ManifestRecord::decode(&bytes)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}

/// Serializable form of one manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    /// Smallest key.
    pub start_key: Vec<u8>,
    /// Largest key.
    pub end_key: Vec<u8>,
    /// Segment file name, relative to the segment directory.
    pub file: String,
}

/// Serializable form of a manifest snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ManifestRecord {
    /// Snapshot version.
    pub version: u64,
    /// Level number to entries.
    pub levels: BTreeMap<u32, Vec<EntryRecord>>,
}

impl ManifestRecord {
    /// Encodes the record with header and checksum.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut body = Vec::new();
        ciborium::into_writer(self, &mut body)
            .map_err(|e| CoreError::invalid_format(format!("manifest encode: {e}")))?;
        let body_len = u32::try_from(body.len())
            .map_err(|_| CoreError::invalid_format("manifest body exceeds 4 GiB"))?;

        let mut buf = Vec::with_capacity(MANIFEST_PREFIX_SIZE + body.len() + 4);
        buf.extend_from_slice(&MANIFEST_MAGIC);
        buf.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());
        buf.extend_from_slice(&body_len.to_le_bytes());
        buf.extend_from_slice(&body);

        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decodes a record, verifying header and checksum.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < 4 || data[0..4] != MANIFEST_MAGIC {
            return Err(CoreError::invalid_format("invalid manifest magic"));
        }
        if data.len() < MANIFEST_PREFIX_SIZE + 4 {
            return Err(CoreError::invalid_format("manifest too short"));
        }

        let version = u16::from_le_bytes([data[4], data[5]]);
        if version > MANIFEST_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported manifest version: {version}"
            )));
        }

        let body_len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
        let crc_at = MANIFEST_PREFIX_SIZE + body_len;
        if data.len() != crc_at + 4 {
            return Err(CoreError::invalid_format("manifest length mismatch"));
        }

        let stored = u32::from_le_bytes([
            data[crc_at],
            data[crc_at + 1],
            data[crc_at + 2],
            data[crc_at + 3],
        ]);
        let computed = compute_crc32(&data[..crc_at]);
        if stored != computed {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        ciborium::from_reader(&data[MANIFEST_PREFIX_SIZE..crc_at])
            .map_err(|e| CoreError::invalid_format(format!("manifest decode: {e}")))
    }
}

/// Shared, immutable manifest snapshot.
pub type ManifestSnapshot = Arc<Manifest>;
