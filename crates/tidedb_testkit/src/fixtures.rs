//! Test fixtures and ledger helpers.
//!
//! Provides temporary ledgers, key/value conventions and builders for
//! segments and manifests.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tidedb_core::{
    FileSegmentFactory, LedgerDir, LevelId, Manifest, ManifestEntry, MemorySegmentFactory,
    SegmentFactory, SegmentRecord, SequenceNumber, WorkItem,
};

/// Fixed-width key for `k`, so byte order matches numeric order.
pub fn key(k: u32) -> Bytes {
    Bytes::from(format!("key{k:08}"))
}

/// Value stored for `k` by a writer tagged `tag`.
pub fn value(tag: &str, k: u32) -> Bytes {
    Bytes::from(format!("{tag}:{k}"))
}

/// Put records for `keys` (must be ascending) carrying `tag` values.
pub fn records(keys: impl IntoIterator<Item = u32>, tag: &str, seq: u64) -> Vec<SegmentRecord> {
    keys.into_iter()
        .map(|k| SegmentRecord::put(key(k), value(tag, k), SequenceNumber::new(seq)))
        .collect()
}

/// An in-memory segment named `name`.
pub fn memory_entry(name: &str, keys: impl IntoIterator<Item = u32>, tag: &str) -> ManifestEntry {
    let segment = MemorySegmentFactory
        .create_segment(Path::new(name), LevelId::new(0), &records(keys, tag, 1))
        .expect("Failed to build in-memory segment");
    ManifestEntry::from_segment(segment)
}

/// A temporary ledger directory with automatic cleanup.
pub struct TestLedger {
    /// The locked ledger.
    pub ledger: Arc<LedgerDir>,
    counter: u32,
    _temp_dir: TempDir,
}

impl TestLedger {
    /// Creates an empty ledger in a fresh temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ledger = LedgerDir::open(temp_dir.path(), true).expect("Failed to open ledger");
        Self {
            ledger: Arc::new(ledger),
            counter: 0,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the ledger root.
    pub fn path(&self) -> &Path {
        self.ledger.path()
    }

    /// Writes a segment file at `level` and returns its descriptor.
    ///
    /// Fixture files use sequence numbers from 1_000_000 up so they never
    /// collide with names a work item reserves.
    pub fn file_entry(
        &mut self,
        level: LevelId,
        keys: impl IntoIterator<Item = u32>,
        tag: &str,
    ) -> ManifestEntry {
        let seq = SequenceNumber::new(1_000_000 + u64::from(self.counter));
        self.counter += 1;
        let path = self.ledger.segment_path(seq, level, 0);
        let segment = FileSegmentFactory
            .create_segment(&path, level, &records(keys, tag, 1))
            .expect("Failed to write segment");
        ManifestEntry::from_segment(segment)
    }

    /// Builds a work item pushing `src_level` of `manifest` down.
    pub fn work_item(&self, src_level: LevelId, manifest: Manifest, seq: u64) -> WorkItem {
        WorkItem {
            src_level,
            manifest: Arc::new(manifest),
            ledger: Arc::clone(&self.ledger),
            next_sequence: SequenceNumber::new(seq),
        }
    }

    /// Segment files currently on disk.
    pub fn segment_files(&self) -> Vec<PathBuf> {
        self.ledger
            .list_segment_files()
            .expect("Failed to list segments")
    }
}

impl Default for TestLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a manifest from `(level, entries)` pairs.
pub fn manifest_of(levels: impl IntoIterator<Item = (u32, Vec<ManifestEntry>)>) -> Manifest {
    levels
        .into_iter()
        .fold(Manifest::new(), |manifest, (level, entries)| {
            manifest.with_level(LevelId::new(level), entries)
        })
}

/// Asserts that `entries` are sorted by start key and pairwise disjoint.
pub fn assert_sorted_disjoint(entries: &[ManifestEntry]) {
    for pair in entries.windows(2) {
        assert!(
            pair[0].end_key < pair[1].start_key,
            "{} [{:?}..{:?}] overlaps {} [{:?}..{:?}]",
            pair[0].filename.display(),
            pair[0].start_key,
            pair[0].end_key,
            pair[1].filename.display(),
            pair[1].start_key,
            pair[1].end_key,
        );
    }
}
