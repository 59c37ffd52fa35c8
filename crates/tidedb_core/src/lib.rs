//! # TideDB Core
//!
//! Leveled compaction engine for TideDB.
//!
//! This crate provides:
//! - Immutable sorted segments with point lookup and batched cursors
//! - Copy-on-write manifest snapshots describing every level
//! - The compaction clerk, candidate selector and k-way merge engine
//! - The manifest swap and deferred deletion handshake
//! - A reference level manager that owns a ledger directory
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tidedb_core::{CompactionConfig, LevelManager, SegmentRecord, SequenceNumber};
//!
//! let manager = Arc::new(LevelManager::open(path, CompactionConfig::default())?);
//! let clerks = manager.spawn_clerks()?;
//!
//! manager.flush(&[SegmentRecord::put("k", "v", SequenceNumber::new(1))])?;
//! assert_eq!(manager.get(b"k")?.as_deref(), Some(&b"v"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod compaction;
mod config;
mod error;
mod ledger;
mod levels;
mod manifest;
pub mod segment;
mod stats;
#[cfg(test)]
mod test_support;
mod types;

pub use compaction::{
    next_poll_interval, perform_merge, split_overlapping, CandidateSelector, Clerk, ClerkHandle,
    ClerkPrompter, ClerkState, CompactionOwner, ManifestChange, MergeEngine, MergeIterator,
    MergeOutput, MergeResult, MergeSource, RandomSelector, RoundOutcome, SegmentIter, WorkItem,
    WorkResponse,
};
pub use config::CompactionConfig;
pub use error::{CoreError, CoreResult};
pub use ledger::{segment_file_name, LedgerDir};
pub use levels::LevelManager;
pub use manifest::{
    EntryRecord, Manifest, ManifestEntry, ManifestRecord, ManifestSnapshot, MANIFEST_MAGIC,
    MANIFEST_VERSION,
};
pub use segment::{
    FileSegmentFactory, MemorySegmentFactory, RecordValue, Segment, SegmentCursor,
    SegmentFactory, SegmentHandle, SegmentRecord, SegmentWriter,
};
pub use stats::{CompactionStats, StatsSnapshot};
pub use types::{compute_crc32, Key, KeyRange, LevelId, SequenceNumber};
