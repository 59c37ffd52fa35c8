//! Units of compaction work and the owner interface clerks talk to.

use crate::error::CoreResult;
use crate::ledger::LedgerDir;
use crate::manifest::{Manifest, ManifestEntry, ManifestSnapshot};
use crate::types::{LevelId, SequenceNumber};
use std::sync::Arc;

/// One compaction assignment, handed out by the owner and consumed once.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Level whose segment is pushed down.
    pub src_level: LevelId,
    /// Snapshot the selection is made against.
    pub manifest: ManifestSnapshot,
    /// Ledger that receives output segments and the new snapshot.
    pub ledger: Arc<LedgerDir>,
    /// Sequence number reserved for this round's file names.
    pub next_sequence: SequenceNumber,
}

impl WorkItem {
    /// Level the merge writes into.
    #[must_use]
    pub fn target_level(&self) -> LevelId {
        self.src_level.next()
    }
}

/// Reply to [`CompactionOwner::pull_work`].
#[derive(Debug)]
pub enum WorkResponse {
    /// Nothing to do for this level.
    Idle {
        /// True if some level is over its limit and work is likely soon.
        backlog: bool,
    },
    /// A round to run.
    Work(WorkItem),
}

/// What a merge round produced.
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// Snapshot to publish, one version past the work item's.
    pub manifest: Manifest,
    /// Descriptors the new snapshot no longer references.
    pub unreferenced: Vec<ManifestEntry>,
    /// Output segments written by this round. Empty for a pure move.
    pub created: Vec<ManifestEntry>,
    /// Records written to `created`.
    pub entries_written: u64,
    /// Superseded duplicates left out of `created`.
    pub duplicates_dropped: u64,
}

impl MergeResult {
    /// Returns true if the round moved a segment without rewriting it.
    #[must_use]
    pub fn is_move(&self) -> bool {
        self.created.is_empty()
    }
}

/// A request to replace the owner's manifest.
#[derive(Debug, Clone)]
pub struct ManifestChange {
    /// Level the merged segment came from.
    pub src_level: LevelId,
    /// Snapshot the change was computed against.
    pub base: ManifestSnapshot,
    /// Sequence number the new snapshot was persisted under.
    pub sequence: SequenceNumber,
    /// The new snapshot.
    pub manifest: ManifestSnapshot,
    /// Descriptors the new snapshot drops.
    pub removed: Vec<ManifestEntry>,
}

impl ManifestChange {
    /// Level the merge wrote into.
    #[must_use]
    pub fn target_level(&self) -> LevelId {
        self.src_level.next()
    }

    /// Version of the snapshot the change was computed against.
    #[must_use]
    pub fn base_version(&self) -> u64 {
        self.base.version()
    }
}

/// The authority a clerk works for.
///
/// The owner holds the authoritative manifest and serializes changes to it.
/// Every call is a blocking round-trip from the clerk's side.
pub trait CompactionOwner: Send + Sync {
    /// Asks for work on `level`.
    fn pull_work(&self, level: LevelId) -> WorkResponse;

    /// Installs `change` or refuses it.
    ///
    /// Returns only once the decision is final. `Ok` means the new snapshot
    /// is the authoritative one and the removed descriptors may be marked.
    fn request_manifest_change(&self, change: ManifestChange) -> CoreResult<()>;

    /// Schedules an unreferenced segment for deletion once no reader holds it.
    fn mark_for_delete(&self, entry: &ManifestEntry);

    /// Signals that the work item handed out for `level` is done, whatever
    /// its outcome.
    fn work_finished(&self, _level: LevelId) {}
}
