//! The level manager: authoritative owner of the manifest.
//!
//! `LevelManager` decides when a level needs compaction, hands out work,
//! serializes manifest changes and tracks segments waiting to be deleted. It
//! is the [`CompactionOwner`] the clerks of one ledger work for.
//!
//! At most one work item is in flight at a time, and level 0 admits a new
//! flushed segment only while it is empty, so every level obeys the
//! non-overlap rule.

use crate::compaction::{
    Clerk, ClerkHandle, ClerkPrompter, CompactionOwner, ManifestChange, WorkItem, WorkResponse,
};
use crate::config::CompactionConfig;
use crate::error::{CoreError, CoreResult};
use crate::ledger::LedgerDir;
use crate::manifest::{Manifest, ManifestEntry, ManifestSnapshot};
use crate::segment::{FileSegmentFactory, Segment, SegmentFactory, SegmentHandle, SegmentRecord};
use crate::types::{LevelId, SequenceNumber};
use bytes::Bytes;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

struct LevelState {
    current: ManifestSnapshot,
    next_sequence: SequenceNumber,
    in_flight: Option<LevelId>,
}

impl LevelState {
    fn allocate_sequence(&mut self) -> SequenceNumber {
        let seq = self.next_sequence;
        self.next_sequence = seq.next();
        seq
    }
}

struct PendingDeletion {
    filename: PathBuf,
    segment: Weak<Segment>,
}

/// Owner of a ledger's manifest.
pub struct LevelManager {
    ledger: Arc<LedgerDir>,
    config: CompactionConfig,
    state: Mutex<LevelState>,
    prompters: Mutex<Vec<ClerkPrompter>>,
    pending: Mutex<Vec<PendingDeletion>>,
    orphans: Vec<PathBuf>,
}

impl LevelManager {
    /// Opens the ledger at `path`, creating it if needed.
    ///
    /// Loads the newest snapshot that decodes and whose segments all open.
    /// Segment files no snapshot references are reported through
    /// [`LevelManager::orphans`] and left on disk.
    pub fn open(path: &Path, config: CompactionConfig) -> CoreResult<Self> {
        let ledger = LedgerDir::open(path, true)?;
        let manifest = load_latest(&ledger)?;
        let next_sequence = ledger.highest_sequence()?.next();

        let orphans = ledger.find_orphans(&manifest)?;
        for orphan in &orphans {
            tracing::warn!(file = %orphan.display(), "unreferenced segment file");
        }
        tracing::info!(
            path = %path.display(),
            version = manifest.version(),
            segments = manifest.total_segments(),
            "opened ledger"
        );

        Ok(Self {
            ledger: Arc::new(ledger),
            config,
            state: Mutex::new(LevelState {
                current: Arc::new(manifest),
                next_sequence,
                in_flight: None,
            }),
            prompters: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            orphans,
        })
    }

    /// Returns the ledger directory.
    #[must_use]
    pub fn ledger(&self) -> &Arc<LedgerDir> {
        &self.ledger
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Segment files found unreferenced when the ledger was opened.
    #[must_use]
    pub fn orphans(&self) -> &[PathBuf] {
        &self.orphans
    }

    /// Returns the current manifest.
    #[must_use]
    pub fn snapshot(&self) -> ManifestSnapshot {
        Arc::clone(&self.state.lock().current)
    }

    /// Looks up the live value of `key`, newest level first.
    ///
    /// A tombstone hides older values and reads as `None`.
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<Bytes>> {
        let snapshot = self.snapshot();
        Ok(snapshot.get(key)?.and_then(|record| record.value().cloned()))
    }

    /// Files marked for deletion whose segments are still held by a reader.
    #[must_use]
    pub fn pending_deletions(&self) -> Vec<PathBuf> {
        let mut pending = self.pending.lock();
        pending.retain(|p| p.segment.strong_count() > 0);
        pending.iter().map(|p| p.filename.clone()).collect()
    }

    /// Registers a clerk to be prompted whenever new work may exist.
    pub fn register_clerk(&self, prompter: ClerkPrompter) {
        self.prompters.lock().push(prompter);
    }

    /// Starts and registers one clerk per compacting level.
    pub fn spawn_clerks(self: &Arc<Self>) -> CoreResult<Vec<ClerkHandle>> {
        let mut handles = Vec::new();
        for level in 0..self.config.max_level {
            let owner: Arc<dyn CompactionOwner> = Arc::clone(self) as Arc<dyn CompactionOwner>;
            let handle = Clerk::new(LevelId::new(level), owner, self.config.clone()).spawn()?;
            self.register_clerk(handle.prompter());
            handles.push(handle);
        }
        Ok(handles)
    }

    fn prompt_clerks(&self) {
        self.prompters.lock().retain(ClerkPrompter::prompt);
    }

    /// Writes `records` as a new level-0 segment and publishes it.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidOperation` while level 0 still holds a segment.
    pub fn flush(&self, records: &[SegmentRecord]) -> CoreResult<()> {
        let path = {
            let mut state = self.state.lock();
            ensure_level_zero_free(&state.current)?;
            let seq = state.allocate_sequence();
            self.ledger.segment_path(seq, LevelId::new(0), 0)
        };
        let segment = FileSegmentFactory.create_segment(&path, LevelId::new(0), records)?;
        if let Err(e) = self.add_segment(Arc::clone(&segment)) {
            // Never published, so nothing else can hold it.
            segment.mark_for_delete();
            return Err(e);
        }
        Ok(())
    }

    /// Publishes a sealed segment at level 0 and prompts the clerks.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidOperation` while level 0 still holds a segment,
    /// or if the new snapshot cannot be persisted.
    pub fn add_segment(&self, segment: SegmentHandle) -> CoreResult<()> {
        {
            let mut state = self.state.lock();
            ensure_level_zero_free(&state.current)?;

            let level = LevelId::new(0);
            let entry = ManifestEntry::from_segment(segment);
            let next = Arc::new(
                state
                    .current
                    .with_level(level, vec![entry])
                    .with_version(state.current.version() + 1),
            );

            let seq = state.allocate_sequence();
            self.install(&mut state, next, seq, true)?;
        }
        self.prompt_clerks();
        Ok(())
    }

    fn over_limit(&self, manifest: &Manifest, level: LevelId) -> bool {
        level.as_u32() < self.config.max_level
            && manifest.segment_count(level) > self.config.segment_limit(level)
    }

    fn has_backlog(&self, manifest: &Manifest) -> bool {
        (0..self.config.max_level).any(|l| self.over_limit(manifest, LevelId::new(l)))
    }

    /// Makes `manifest` current. `persist` is false when the snapshot is
    /// already durable under `seq`.
    fn install(
        &self,
        state: &mut LevelState,
        manifest: ManifestSnapshot,
        seq: SequenceNumber,
        persist: bool,
    ) -> CoreResult<()> {
        if persist {
            manifest.persist(&self.ledger.manifest_path(seq))?;
            self.ledger.sync_manifest_dir()?;
        }
        state.current = manifest;

        match self.ledger.remove_manifests_before(seq) {
            Ok(0) => {}
            Ok(n) => tracing::debug!(removed = n, "pruned old manifest snapshots"),
            Err(e) => tracing::warn!(error = %e, "could not prune manifest snapshots"),
        }
        Ok(())
    }
}

fn ensure_level_zero_free(manifest: &Manifest) -> CoreResult<()> {
    if manifest.segment_count(LevelId::new(0)) > 0 {
        return Err(CoreError::invalid_operation(
            "level 0 still holds a segment awaiting compaction",
        ));
    }
    Ok(())
}

fn load_latest(ledger: &LedgerDir) -> CoreResult<Manifest> {
    let segments_dir = ledger.segments_dir();
    for (seq, path) in ledger.list_manifests()?.into_iter().rev() {
        let loaded = Manifest::read_record(&path).and_then(|record| {
            Manifest::from_record(&record, |name| Segment::open(&segments_dir.join(name)))
        });
        match loaded {
            Ok(manifest) => {
                tracing::debug!(%seq, version = manifest.version(), "loaded manifest snapshot");
                return Ok(manifest);
            }
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "skipping unusable manifest snapshot"
            ),
        }
    }
    Ok(Manifest::new())
}

impl CompactionOwner for LevelManager {
    fn pull_work(&self, level: LevelId) -> WorkResponse {
        let mut state = self.state.lock();
        let backlog = self.has_backlog(&state.current);
        if state.in_flight.is_some() || !self.over_limit(&state.current, level) {
            return WorkResponse::Idle { backlog };
        }

        state.in_flight = Some(level);
        let next_sequence = state.allocate_sequence();
        tracing::debug!(%level, %next_sequence, "handing out work");
        WorkResponse::Work(WorkItem {
            src_level: level,
            manifest: Arc::clone(&state.current),
            ledger: Arc::clone(&self.ledger),
            next_sequence,
        })
    }

    fn request_manifest_change(&self, change: ManifestChange) -> CoreResult<()> {
        change
            .manifest
            .validate()
            .map_err(|e| CoreError::swap_rejected(e.to_string()))?;

        let mut state = self.state.lock();
        let current = Arc::clone(&state.current);
        let (src, target) = (change.src_level, change.target_level());

        if current.version() == change.base_version() {
            self.install(&mut state, change.manifest, change.sequence, false)?;
        } else {
            if current.level(src) != change.base.level(src)
                || current.level(target) != change.base.level(target)
            {
                return Err(CoreError::swap_rejected(format!(
                    "{src} or {target} changed since version {}",
                    change.base_version()
                )));
            }
            // Only unrelated levels moved: carry the change over.
            let rebased = Arc::new(
                current
                    .with_level(src, change.manifest.level(src).to_vec())
                    .with_level(target, change.manifest.level(target).to_vec())
                    .with_version(current.version() + 1),
            );
            let seq = state.allocate_sequence();
            self.install(&mut state, rebased, seq, true)?;
        }

        tracing::info!(
            from = %src,
            to = %target,
            version = state.current.version(),
            "installed manifest"
        );
        Ok(())
    }

    fn mark_for_delete(&self, entry: &ManifestEntry) {
        entry.segment.mark_for_delete();
        tracing::debug!(file = %entry.filename.display(), "segment marked for deletion");
        let mut pending = self.pending.lock();
        pending.retain(|p| p.segment.strong_count() > 0);
        pending.push(PendingDeletion {
            filename: entry.filename.clone(),
            segment: Arc::downgrade(&entry.segment),
        });
    }

    fn work_finished(&self, level: LevelId) {
        {
            let mut state = self.state.lock();
            if state.in_flight == Some(level) {
                state.in_flight = None;
            }
        }
        self.prompt_clerks();
    }
}

impl std::fmt::Debug for LevelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LevelManager")
            .field("path", &self.ledger.path())
            .field("version", &state.current.version())
            .field("next_sequence", &state.next_sequence)
            .field("in_flight", &state.in_flight)
            .finish_non_exhaustive()
    }
}
