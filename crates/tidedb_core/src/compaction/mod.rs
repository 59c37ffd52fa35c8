//! Leveled compaction.
//!
//! Compaction pushes one segment of level `L` into level `L + 1`, merging it
//! with the run of `L + 1` segments whose key ranges it overlaps:
//!
//! 1. A [`Clerk`] asks its [`CompactionOwner`] for work.
//! 2. The [`CandidateSelector`] picks the upper segment and
//!    [`split_overlapping`] finds its sinks.
//! 3. The [`MergeEngine`] streams both sides through a [`MergeIterator`] into
//!    new, bounded segments. The upper segment wins duplicate keys.
//! 4. The clerk persists the resulting snapshot and hands it to the owner.
//!    Only once the owner accepts are the replaced segments marked for
//!    deletion.
//!
//! Tombstones are carried into the output unchanged.

mod clerk;
mod iterator;
mod merge;
mod selector;
mod work;

pub use clerk::{next_poll_interval, Clerk, ClerkHandle, ClerkPrompter, ClerkState, RoundOutcome};
pub use iterator::{MergeIterator, MergeSource, SegmentIter};
pub use merge::{perform_merge, MergeEngine, MergeOutput};
pub use selector::{split_overlapping, CandidateSelector, RandomSelector};
pub use work::{CompactionOwner, ManifestChange, MergeResult, WorkItem, WorkResponse};
