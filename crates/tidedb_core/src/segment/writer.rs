//! Segment writer and segment factories.

use crate::error::{CoreError, CoreResult};
use crate::segment::record::SegmentRecord;
use crate::segment::store::{
    IndexEntry, Segment, SegmentHandle, SEGMENT_HEADER_SIZE, SEGMENT_MAGIC, SEGMENT_VERSION,
};
use crate::types::{Key, LevelId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tidedb_storage::{FileBackend, InMemoryBackend, StorageBackend};

/// Builds a new segment from records supplied in strictly ascending key order.
pub struct SegmentWriter {
    path: PathBuf,
    backend: Box<dyn StorageBackend>,
    index: Vec<IndexEntry>,
    on_disk: bool,
}

impl SegmentWriter {
    /// Creates a segment file at `path`. Fails if the file already exists.
    pub fn create(path: &Path) -> CoreResult<Self> {
        let backend = FileBackend::create_new(path)?;
        Self::with_backend(path, Box::new(backend), true)
    }

    /// Creates a segment that lives only in memory.
    pub fn in_memory(name: &Path) -> CoreResult<Self> {
        Self::with_backend(name, Box::new(InMemoryBackend::new()), false)
    }

    fn with_backend(
        path: &Path,
        mut backend: Box<dyn StorageBackend>,
        on_disk: bool,
    ) -> CoreResult<Self> {
        let mut header = [0u8; SEGMENT_HEADER_SIZE];
        header[..4].copy_from_slice(&SEGMENT_MAGIC);
        header[4..].copy_from_slice(&SEGMENT_VERSION.to_le_bytes());
        backend.append(&header)?;

        Ok(Self {
            path: path.to_path_buf(),
            backend,
            index: Vec::new(),
            on_disk,
        })
    }

    /// Appends a record. Its key must be greater than the previous one.
    pub fn append(&mut self, record: &SegmentRecord) -> CoreResult<()> {
        if let Some(last) = self.last_key() {
            if record.key <= *last {
                return Err(CoreError::invalid_operation(format!(
                    "segment keys must be strictly ascending ({:?} after {:?})",
                    record.key, last
                )));
            }
        }

        let encoded = record.encode()?;
        let offset = self.backend.append(&encoded)?;
        self.index.push(IndexEntry {
            key: record.key.clone(),
            offset,
            len: encoded.len() as u32,
        });
        Ok(())
    }

    /// Returns the number of records written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if nothing was written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn last_key(&self) -> Option<&Key> {
        self.index.last().map(|entry| &entry.key)
    }

    /// Syncs the segment and returns a readable handle.
    ///
    /// # Errors
    ///
    /// Fails if no record was appended, or the sync fails.
    pub fn finish(mut self) -> CoreResult<SegmentHandle> {
        if self.index.is_empty() {
            return Err(CoreError::invalid_operation("cannot seal an empty segment"));
        }
        self.backend.sync()?;
        Ok(Arc::new(Segment::sealed(
            self.path,
            self.backend,
            self.index,
            self.on_disk,
        )))
    }
}

/// Creates output segments for the merge engine.
///
/// Implementations must either return a sealed, readable segment holding
/// exactly `records`, or fail without publishing anything.
pub trait SegmentFactory: Send + Sync {
    /// Writes `records` (ascending, non-empty) to a new segment at `path`.
    fn create_segment(
        &self,
        path: &Path,
        level: LevelId,
        records: &[SegmentRecord],
    ) -> CoreResult<SegmentHandle>;
}

fn write_all(mut writer: SegmentWriter, records: &[SegmentRecord]) -> CoreResult<SegmentHandle> {
    for record in records {
        writer.append(record)?;
    }
    writer.finish()
}

/// Writes segments as files under the ledger's segment directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSegmentFactory;

impl SegmentFactory for FileSegmentFactory {
    fn create_segment(
        &self,
        path: &Path,
        level: LevelId,
        records: &[SegmentRecord],
    ) -> CoreResult<SegmentHandle> {
        tracing::debug!(path = %path.display(), %level, records = records.len(), "writing segment");
        write_all(SegmentWriter::create(path)?, records)
    }
}

/// Keeps segments in memory. Used by tests and benchmarks.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemorySegmentFactory;

impl SegmentFactory for MemorySegmentFactory {
    fn create_segment(
        &self,
        path: &Path,
        _level: LevelId,
        records: &[SegmentRecord],
    ) -> CoreResult<SegmentHandle> {
        write_all(SegmentWriter::in_memory(path)?, records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SequenceNumber;
    use tempfile::tempdir;

    fn records(keys: &[&'static str]) -> Vec<SegmentRecord> {
        keys.iter()
            .map(|k| SegmentRecord::put(k.to_string(), "v", SequenceNumber::new(1)))
            .collect()
    }

    #[test]
    fn writer_rejects_unsorted_keys() {
        let mut writer = SegmentWriter::in_memory(Path::new("w")).unwrap();
        writer.append(&records(&["b"])[0]).unwrap();

        let result = writer.append(&records(&["a"])[0]);
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
        let result = writer.append(&records(&["b"])[0]);
        assert!(result.is_err());
        assert_eq!(writer.len(), 1);
    }

    #[test]
    fn empty_writer_cannot_finish() {
        let writer = SegmentWriter::in_memory(Path::new("w")).unwrap();
        assert!(writer.is_empty());
        assert!(writer.finish().is_err());
    }

    #[test]
    fn file_factory_refuses_existing_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("3_1_0.seg");
        let factory = FileSegmentFactory;

        let segment = factory
            .create_segment(&path, LevelId::new(1), &records(&["a", "b"]))
            .unwrap();
        assert_eq!(segment.len(), 2);

        let again = factory.create_segment(&path, LevelId::new(1), &records(&["c"]));
        assert!(matches!(again, Err(CoreError::Storage(_))));
    }

    #[test]
    fn memory_factory_round_trips() {
        let segment = MemorySegmentFactory
            .create_segment(Path::new("m.seg"), LevelId::new(2), &records(&["x", "y", "z"]))
            .unwrap();
        assert_eq!(segment.first_key().as_ref(), b"x");
        assert_eq!(segment.last_key().as_ref(), b"z");
        assert_eq!(segment.path(), Path::new("m.seg"));
    }
}
