//! Segment storage.
//!
//! Segments are immutable, sorted runs of key/value records. A writer
//! produces one from records in ascending key order and seals it; after that
//! the segment only serves point lookups and cursors.
//!
//! ## Segment File Format
//!
//! ```text
//! | magic "TSEG" (4) | version (2) | record | record | ... |
//! ```
//!
//! See [`SegmentRecord`] for the record framing.

mod record;
mod store;
mod writer;

pub use record::{RecordValue, SegmentRecord, SegmentRecordFlags};
pub use store::{Segment, SegmentCursor, SegmentHandle, SEGMENT_MAGIC, SEGMENT_VERSION};
pub use writer::{FileSegmentFactory, MemorySegmentFactory, SegmentFactory, SegmentWriter};
