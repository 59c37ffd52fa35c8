//! Sealed segment reader and cursors.

use crate::error::{CoreError, CoreResult};
use crate::segment::record::SegmentRecord;
use crate::types::{Key, KeyRange};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tidedb_storage::{FileBackend, StorageBackend};

/// Magic bytes opening every segment file.
pub const SEGMENT_MAGIC: [u8; 4] = *b"TSEG";

/// Current segment format version.
pub const SEGMENT_VERSION: u16 = 1;

/// Size of the segment header (magic + version).
pub(crate) const SEGMENT_HEADER_SIZE: usize = 6;

/// Shared handle to a sealed segment.
///
/// Manifest descriptors, cursors and in-flight readers all hold clones. The
/// file disappears once the segment has been marked for deletion and the last
/// clone is dropped.
pub type SegmentHandle = Arc<Segment>;

/// Location of one record inside a segment.
#[derive(Debug, Clone)]
pub(crate) struct IndexEntry {
    pub(crate) key: Key,
    pub(crate) offset: u64,
    pub(crate) len: u32,
}

/// An immutable, sorted run of records.
pub struct Segment {
    path: PathBuf,
    backend: Box<dyn StorageBackend>,
    index: Vec<IndexEntry>,
    on_disk: bool,
    delete_marked: AtomicBool,
}

impl Segment {
    /// Opens a sealed segment file.
    ///
    /// # Errors
    ///
    /// Fails if the file is missing, has a bad header, contains a corrupt
    /// record, or its keys are not strictly ascending.
    pub fn open(path: &Path) -> CoreResult<SegmentHandle> {
        let backend = FileBackend::open_read_only(path)?;
        Self::from_backend(path, Box::new(backend), true).map(Arc::new)
    }

    /// Wraps an already written backend, validating and indexing its records.
    ///
    /// `on_disk` controls whether [`Segment::mark_for_delete`] removes a file
    /// at `path` when the last handle goes away.
    pub fn from_backend(
        path: &Path,
        backend: Box<dyn StorageBackend>,
        on_disk: bool,
    ) -> CoreResult<Self> {
        let size = backend.size()?;
        if size < SEGMENT_HEADER_SIZE as u64 {
            return Err(CoreError::segment_corruption("segment header truncated"));
        }
        let header = backend.read_at(0, SEGMENT_HEADER_SIZE)?;
        if header[0..4] != SEGMENT_MAGIC {
            return Err(CoreError::invalid_format("invalid segment magic"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > SEGMENT_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported segment version: {version}"
            )));
        }

        let mut index: Vec<IndexEntry> = Vec::new();
        let mut offset = SEGMENT_HEADER_SIZE as u64;
        while offset < size {
            if offset + 4 > size {
                return Err(CoreError::segment_corruption("trailing bytes after last record"));
            }
            let record_len = SegmentRecord::peek_len(&backend.read_at(offset, 4)?)?;
            if offset + record_len as u64 > size {
                return Err(CoreError::segment_corruption("record extends beyond segment"));
            }

            let record = SegmentRecord::decode(&backend.read_at(offset, record_len)?)?;
            if let Some(prev) = index.last() {
                if record.key <= prev.key {
                    return Err(CoreError::segment_corruption(format!(
                        "keys out of order at offset {offset}"
                    )));
                }
            }
            index.push(IndexEntry {
                key: record.key,
                offset,
                len: record_len as u32,
            });
            offset += record_len as u64;
        }

        if index.is_empty() {
            return Err(CoreError::segment_corruption("segment has no records"));
        }

        Ok(Self::sealed(path.to_path_buf(), backend, index, on_disk))
    }

    pub(crate) fn sealed(
        path: PathBuf,
        backend: Box<dyn StorageBackend>,
        index: Vec<IndexEntry>,
        on_disk: bool,
    ) -> Self {
        Self {
            path,
            backend,
            index,
            on_disk,
            delete_marked: AtomicBool::new(false),
        }
    }

    /// Returns the segment's file path (or name, for in-memory segments).
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if the segment holds no records. Sealed segments never do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Smallest key in the segment.
    #[must_use]
    pub fn first_key(&self) -> &Key {
        &self.index[0].key
    }

    /// Largest key in the segment.
    #[must_use]
    pub fn last_key(&self) -> &Key {
        &self.index[self.index.len() - 1].key
    }

    /// Point lookup. Tombstones are returned as records so callers can stop
    /// searching older levels.
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<SegmentRecord>> {
        match self.index.binary_search_by(|entry| entry.key.as_ref().cmp(key)) {
            Ok(pos) => self.read_record(pos).map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Opens a cursor over `range`.
    #[must_use]
    pub fn cursor(self: &Arc<Self>, range: &KeyRange) -> SegmentCursor {
        let (position, end) = match range {
            KeyRange::All => (0, self.index.len()),
            KeyRange::Bounded { start, end } => (
                self.index.partition_point(|entry| entry.key < *start),
                self.index.partition_point(|entry| entry.key <= *end),
            ),
        };
        SegmentCursor {
            segment: Arc::clone(self),
            position,
            end: end.max(position),
        }
    }

    /// Flags the segment for removal once every handle is released.
    pub fn mark_for_delete(&self) {
        self.delete_marked.store(true, Ordering::Release);
    }

    /// Returns true if the segment was marked for deletion.
    #[must_use]
    pub fn is_marked_for_delete(&self) -> bool {
        self.delete_marked.load(Ordering::Acquire)
    }

    fn read_record(&self, pos: usize) -> CoreResult<SegmentRecord> {
        let entry = &self.index[pos];
        let data = self.backend.read_at(entry.offset, entry.len as usize)?;
        SegmentRecord::decode(&data)
    }

    /// Reads records `[from, to)` with a single contiguous read.
    fn read_span(&self, from: usize, to: usize) -> CoreResult<Vec<SegmentRecord>> {
        if from >= to {
            return Ok(Vec::new());
        }
        let base = self.index[from].offset;
        let last = &self.index[to - 1];
        let span = (last.offset + u64::from(last.len) - base) as usize;
        let data = self.backend.read_at(base, span)?;

        self.index[from..to]
            .iter()
            .map(|entry| {
                let start = (entry.offset - base) as usize;
                SegmentRecord::decode(&data[start..start + entry.len as usize])
            })
            .collect()
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("path", &self.path)
            .field("records", &self.index.len())
            .field("delete_marked", &self.is_marked_for_delete())
            .finish()
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if !self.on_disk || !self.is_marked_for_delete() {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "deleted segment file"),
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to delete segment file"
            ),
        }
    }
}

/// A position inside a segment plus the end of the range it covers.
///
/// Reading consumes the cursor and hands back a remainder continuation until
/// the range is exhausted.
#[derive(Debug, Clone)]
pub struct SegmentCursor {
    segment: SegmentHandle,
    position: usize,
    end: usize,
}

impl SegmentCursor {
    /// Reads up to `max` records.
    ///
    /// Returns the records plus `Some(remainder)` if more remain, or `None`
    /// once the range is exhausted.
    pub fn read_next(self, max: usize) -> CoreResult<(Vec<SegmentRecord>, Option<Self>)> {
        let to = self.end.min(self.position + max.max(1));
        let records = self.segment.read_span(self.position, to)?;
        let remainder = (to < self.end).then(|| Self {
            segment: self.segment,
            position: to,
            end: self.end,
        });
        Ok((records, remainder))
    }

    /// Returns the number of records left in the range.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.end - self.position
    }

    /// Returns the segment this cursor reads from.
    #[must_use]
    pub fn segment(&self) -> &SegmentHandle {
        &self.segment
    }
}
