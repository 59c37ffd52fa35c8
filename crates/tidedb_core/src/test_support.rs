//! Builders shared by unit tests.

use crate::manifest::ManifestEntry;
use crate::segment::{MemorySegmentFactory, SegmentFactory, SegmentRecord};
use crate::types::{LevelId, SequenceNumber};
use std::path::Path;

pub(crate) fn key(k: u32) -> Vec<u8> {
    format!("{k:06}").into_bytes()
}

/// In-memory segment holding `keys`, each valued `"<tag>:<key>"`.
pub(crate) fn entry(name: &str, keys: impl IntoIterator<Item = u32>, tag: &str) -> ManifestEntry {
    let records: Vec<SegmentRecord> = keys
        .into_iter()
        .map(|k| SegmentRecord::put(key(k), format!("{tag}:{k}"), SequenceNumber::new(1)))
        .collect();
    let segment = MemorySegmentFactory
        .create_segment(Path::new(name), LevelId::new(0), &records)
        .unwrap();
    ManifestEntry::from_segment(segment)
}

/// In-memory segment covering `[start, end]` with every key in between.
pub(crate) fn span(name: &str, start: u32, end: u32, tag: &str) -> ManifestEntry {
    entry(name, start..=end, tag)
}
