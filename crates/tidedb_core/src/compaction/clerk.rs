//! The compaction clerk: one worker thread per level.
//!
//! A clerk sleeps on its channel until prompted or until its countdown runs
//! out, then runs one round:
//!
//! ```text
//! pull_work ──Idle──────────────────────────────────────────► re-arm
//!     │
//!     └─Work─► select + merge ─► persist snapshot ─► request_manifest_change
//!                                                      │ accepted: mark_for_delete each
//!                                                      │ rejected: log orphans
//!                                                      └──────────────────► re-arm
//! ```
//!
//! The countdown is re-armed after every round from its outcome; see
//! [`next_poll_interval`]. A round in progress always completes before a
//! stop request is observed.

use crate::compaction::merge::{perform_merge, MergeEngine};
use crate::compaction::selector::{CandidateSelector, RandomSelector};
use crate::compaction::work::{CompactionOwner, ManifestChange, WorkItem, WorkResponse};
use crate::config::CompactionConfig;
use crate::error::CoreResult;
use crate::manifest::ManifestEntry;
use crate::segment::{FileSegmentFactory, SegmentFactory};
use crate::stats::CompactionStats;
use crate::types::LevelId;
use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Lifecycle state of a clerk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClerkState {
    /// Waiting for a prompt or the countdown.
    Idle,
    /// Running a round.
    Working,
    /// Terminated.
    Stopped,
}

/// How a round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// The owner had nothing to do.
    NoWork {
        /// Whether the owner reported a backlog.
        backlog: bool,
    },
    /// The owner installed the new snapshot.
    Accepted,
    /// The owner refused the new snapshot.
    Rejected,
    /// Selection, merge or persist failed before reaching the owner.
    Failed,
}

/// Delay before the next unprompted round.
///
/// Only a healthy level (no work, no backlog) backs off. Everything else,
/// including failures, polls again after the base interval.
#[must_use]
pub fn next_poll_interval(config: &CompactionConfig, outcome: &RoundOutcome) -> Duration {
    match outcome {
        RoundOutcome::NoWork { backlog: false } => config.backoff_interval(),
        _ => config.base_interval,
    }
}

#[derive(Debug)]
enum ClerkMessage {
    Prompt,
    Stop,
}

/// Wakes a clerk. Cheap to clone; owners keep one per registered clerk.
#[derive(Debug, Clone)]
pub struct ClerkPrompter {
    level: LevelId,
    sender: Sender<ClerkMessage>,
}

impl ClerkPrompter {
    /// Asks the clerk to run a round now.
    ///
    /// Returns false if the clerk has stopped.
    pub fn prompt(&self) -> bool {
        self.sender.send(ClerkMessage::Prompt).is_ok()
    }

    /// Level the clerk serves.
    #[must_use]
    pub fn level(&self) -> LevelId {
        self.level
    }
}

/// Compaction worker for one level.
pub struct Clerk {
    level: LevelId,
    owner: Arc<dyn CompactionOwner>,
    selector: Box<dyn CandidateSelector>,
    engine: MergeEngine,
    config: CompactionConfig,
    stats: Arc<CompactionStats>,
    state: Arc<Mutex<ClerkState>>,
}

impl Clerk {
    /// Creates a clerk for `level` writing segment files and choosing at
    /// random.
    pub fn new(level: LevelId, owner: Arc<dyn CompactionOwner>, config: CompactionConfig) -> Self {
        Self {
            level,
            owner,
            selector: Box::new(RandomSelector::from_entropy()),
            engine: MergeEngine::new(config.clone(), Arc::new(FileSegmentFactory)),
            config,
            stats: Arc::new(CompactionStats::new()),
            state: Arc::new(Mutex::new(ClerkState::Idle)),
        }
    }

    /// Replaces the candidate selector.
    #[must_use]
    pub fn with_selector(mut self, selector: impl CandidateSelector + 'static) -> Self {
        self.selector = Box::new(selector);
        self
    }

    /// Replaces the factory output segments are written through.
    #[must_use]
    pub fn with_factory(mut self, factory: Arc<dyn SegmentFactory>) -> Self {
        self.engine = MergeEngine::new(self.config.clone(), factory);
        self
    }

    /// Level this clerk compacts from.
    #[must_use]
    pub fn level(&self) -> LevelId {
        self.level
    }

    /// Returns the clerk's counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<CompactionStats> {
        &self.stats
    }

    /// Starts the clerk on its own thread, idle with the countdown armed at
    /// the base interval.
    pub fn spawn(self) -> CoreResult<ClerkHandle> {
        let (sender, receiver) = mpsc::channel();
        let level = self.level;
        let stats = Arc::clone(&self.stats);
        let state = Arc::clone(&self.state);

        let thread = thread::Builder::new()
            .name(format!("tidedb-clerk-{level}"))
            .spawn(move || self.run(receiver))?;

        tracing::info!(%level, "clerk started");
        Ok(ClerkHandle {
            prompter: ClerkPrompter { level, sender },
            stats,
            state,
            thread: Some(thread),
        })
    }

    fn set_state(&self, state: ClerkState) {
        *self.state.lock() = state;
    }

    fn run(mut self, receiver: Receiver<ClerkMessage>) {
        let mut wait = self.config.base_interval;
        loop {
            match receiver.recv_timeout(wait) {
                Ok(ClerkMessage::Prompt) | Err(RecvTimeoutError::Timeout) => {}
                Ok(ClerkMessage::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            }
            // Prompts that piled up during the wait collapse into this round.
            let mut stop = false;
            while let Ok(message) = receiver.try_recv() {
                if matches!(message, ClerkMessage::Stop) {
                    stop = true;
                }
            }
            if stop {
                break;
            }

            self.set_state(ClerkState::Working);
            let outcome = self.run_round();
            wait = next_poll_interval(&self.config, &outcome);
            tracing::trace!(level = %self.level, ?outcome, ?wait, "round finished");
            self.set_state(ClerkState::Idle);
        }
        self.set_state(ClerkState::Stopped);
        tracing::info!(level = %self.level, "clerk stopped");
    }

    /// Runs one round synchronously.
    ///
    /// Never fails: every error is logged, counted and folded into the
    /// outcome.
    pub fn run_round(&mut self) -> RoundOutcome {
        self.stats.record_round();
        let item = match self.owner.pull_work(self.level) {
            WorkResponse::Idle { backlog } => {
                self.stats.record_idle();
                return RoundOutcome::NoWork { backlog };
            }
            WorkResponse::Work(item) => item,
        };

        let outcome = self.compact(&item);
        self.owner.work_finished(self.level);
        outcome
    }

    fn compact(&mut self, item: &WorkItem) -> RoundOutcome {
        let level = self.level;
        let result = match perform_merge(item, self.selector.as_mut(), &self.engine) {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(%level, error = %e, "compaction round failed");
                self.stats.record_failure();
                return RoundOutcome::Failed;
            }
        };

        if result.is_move() {
            self.stats.record_move();
        } else {
            self.stats.record_merge(
                result.created.len() as u64,
                result.entries_written,
                result.duplicates_dropped,
            );
        }

        let snapshot_path = item.ledger.manifest_path(item.next_sequence);
        let persisted = result
            .manifest
            .persist(&snapshot_path)
            .and_then(|()| item.ledger.sync_manifest_dir());
        if let Err(e) = persisted {
            tracing::error!(%level, error = %e, "could not persist manifest snapshot");
            log_orphans(level, &result.created);
            self.stats.record_failure();
            return RoundOutcome::Failed;
        }

        let change = ManifestChange {
            src_level: item.src_level,
            base: Arc::clone(&item.manifest),
            sequence: item.next_sequence,
            manifest: Arc::new(result.manifest),
            removed: result.unreferenced.clone(),
        };
        let version = change.manifest.version();

        match self.owner.request_manifest_change(change) {
            Ok(()) => {
                for entry in &result.unreferenced {
                    self.owner.mark_for_delete(entry);
                }
                self.stats
                    .record_swap_accepted(result.unreferenced.len() as u64);
                tracing::info!(
                    %level,
                    version,
                    written = result.created.len(),
                    released = result.unreferenced.len(),
                    "manifest change accepted"
                );
                RoundOutcome::Accepted
            }
            Err(e) => {
                tracing::warn!(%level, version, reason = %e, "manifest change rejected");
                log_orphans(level, &result.created);
                if let Err(e) = std::fs::remove_file(&snapshot_path) {
                    tracing::warn!(
                        path = %snapshot_path.display(),
                        error = %e,
                        "could not remove rejected snapshot"
                    );
                }
                self.stats.record_swap_rejected();
                RoundOutcome::Rejected
            }
        }
    }
}

fn log_orphans(level: LevelId, created: &[ManifestEntry]) {
    for entry in created {
        tracing::warn!(
            %level,
            file = %entry.filename.display(),
            "segment file orphaned, reconcile at startup"
        );
    }
}

impl std::fmt::Debug for Clerk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clerk")
            .field("level", &self.level)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

/// Controls a running clerk. Dropping the handle stops the clerk.
#[derive(Debug)]
pub struct ClerkHandle {
    prompter: ClerkPrompter,
    stats: Arc<CompactionStats>,
    state: Arc<Mutex<ClerkState>>,
    thread: Option<JoinHandle<()>>,
}

impl ClerkHandle {
    /// Level the clerk serves.
    #[must_use]
    pub fn level(&self) -> LevelId {
        self.prompter.level
    }

    /// Asks the clerk to run a round now.
    pub fn prompt(&self) -> bool {
        self.prompter.prompt()
    }

    /// Returns a prompter an owner can keep.
    #[must_use]
    pub fn prompter(&self) -> ClerkPrompter {
        self.prompter.clone()
    }

    /// Returns the clerk's current state.
    #[must_use]
    pub fn state(&self) -> ClerkState {
        *self.state.lock()
    }

    /// Returns the clerk's counters.
    #[must_use]
    pub fn stats(&self) -> &CompactionStats {
        &self.stats
    }

    /// Stops the clerk, waiting for a round in progress to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        // Fails only if the thread already exited.
        let _ = self.prompter.sender.send(ClerkMessage::Stop);
        if thread.join().is_err() {
            tracing::error!(level = %self.prompter.level, "clerk thread panicked");
            *self.state.lock() = ClerkState::Stopped;
        }
    }
}

impl Drop for ClerkHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::ledger::LedgerDir;
    use crate::manifest::Manifest;
    use crate::segment::MemorySegmentFactory;
    use crate::test_support::span;
    use crate::types::SequenceNumber;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;
    use tempfile::{tempdir, TempDir};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Pull,
        Change { version: u64, persisted: bool },
        Mark(PathBuf),
        Finished,
    }

    struct ScriptedOwner {
        responses: Mutex<VecDeque<WorkResponse>>,
        accept: bool,
        manifest_dir: Option<PathBuf>,
        events: Mutex<Vec<Event>>,
    }

    impl ScriptedOwner {
        fn new(responses: Vec<WorkResponse>, accept: bool) -> Arc<Self> {
            let manifest_dir = responses.iter().find_map(|r| match r {
                WorkResponse::Work(item) => Some(item.ledger.manifest_dir()),
                WorkResponse::Idle { .. } => None,
            });
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                accept,
                manifest_dir,
                events: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<Event> {
            self.events.lock().clone()
        }
    }

    impl CompactionOwner for ScriptedOwner {
        fn pull_work(&self, _level: LevelId) -> WorkResponse {
            self.events.lock().push(Event::Pull);
            self.responses
                .lock()
                .pop_front()
                .unwrap_or(WorkResponse::Idle { backlog: false })
        }

        fn request_manifest_change(&self, change: ManifestChange) -> CoreResult<()> {
            let persisted = self.manifest_dir.as_ref().is_some_and(|dir| {
                dir.join(format!("{:020}.man", change.sequence.as_u64()))
                    .exists()
            });
            self.events.lock().push(Event::Change {
                version: change.manifest.version(),
                persisted,
            });
            if self.accept {
                Ok(())
            } else {
                Err(CoreError::swap_rejected("level changed"))
            }
        }

        fn mark_for_delete(&self, entry: &ManifestEntry) {
            self.events.lock().push(Event::Mark(entry.filename.clone()));
        }

        fn work_finished(&self, _level: LevelId) {
            self.events.lock().push(Event::Finished);
        }
    }

    fn work_item(temp: &TempDir) -> WorkItem {
        let manifest = Manifest::new()
            .with_level(LevelId::new(0), vec![span("u.seg", 100, 200, "new")])
            .with_level(
                LevelId::new(1),
                vec![span("a.seg", 50, 150, "old"), span("c.seg", 260, 300, "old")],
            )
            .with_version(2);
        WorkItem {
            src_level: LevelId::new(0),
            manifest: Arc::new(manifest),
            ledger: Arc::new(LedgerDir::open(temp.path(), true).unwrap()),
            next_sequence: SequenceNumber::new(5),
        }
    }

    fn test_clerk(owner: Arc<ScriptedOwner>, config: CompactionConfig) -> Clerk {
        Clerk::new(LevelId::new(0), owner, config)
            .with_selector(RandomSelector::seeded(3))
            .with_factory(Arc::new(MemorySegmentFactory))
    }

    #[test]
    fn poll_interval_backs_off_only_when_healthy() {
        let config = CompactionConfig::default()
            .base_interval(Duration::from_millis(20))
            .backoff_multiplier(5);

        let healthy = next_poll_interval(&config, &RoundOutcome::NoWork { backlog: false });
        assert_eq!(healthy, Duration::from_millis(100));
        for outcome in [
            RoundOutcome::NoWork { backlog: true },
            RoundOutcome::Accepted,
            RoundOutcome::Rejected,
            RoundOutcome::Failed,
        ] {
            assert_eq!(next_poll_interval(&config, &outcome), Duration::from_millis(20));
        }
    }

    #[test]
    fn consecutive_idle_rounds_never_shrink_interval() {
        let config = CompactionConfig::default();
        let first = next_poll_interval(&config, &RoundOutcome::NoWork { backlog: false });
        let second = next_poll_interval(&config, &RoundOutcome::NoWork { backlog: false });
        assert!(second >= first);
        assert!(first >= config.base_interval);
    }

    #[test]
    fn accepted_round_marks_after_change() {
        let temp = tempdir().unwrap();
        let item = work_item(&temp);
        let snapshot = item.ledger.manifest_path(item.next_sequence);
        let owner = ScriptedOwner::new(vec![WorkResponse::Work(item)], true);
        let mut clerk = test_clerk(Arc::clone(&owner), CompactionConfig::default());

        assert_eq!(clerk.run_round(), RoundOutcome::Accepted);

        let events = owner.events();
        assert_eq!(events[0], Event::Pull);
        assert_eq!(
            events[1],
            Event::Change {
                version: 3,
                persisted: true
            }
        );
        assert_eq!(
            events[2..],
            [
                Event::Mark(PathBuf::from("a.seg")),
                Event::Mark(PathBuf::from("u.seg")),
                Event::Finished,
            ]
        );
        assert!(snapshot.exists());

        let stats = clerk.stats().snapshot();
        assert_eq!(stats.merges, 1);
        assert_eq!(stats.swaps_accepted, 1);
        assert_eq!(stats.segments_marked, 2);
    }

    #[test]
    fn rejected_round_marks_nothing() {
        let temp = tempdir().unwrap();
        let item = work_item(&temp);
        let snapshot = item.ledger.manifest_path(item.next_sequence);
        let owner = ScriptedOwner::new(vec![WorkResponse::Work(item)], false);
        let mut clerk = test_clerk(Arc::clone(&owner), CompactionConfig::default());

        assert_eq!(clerk.run_round(), RoundOutcome::Rejected);

        let events = owner.events();
        assert!(!events.iter().any(|e| matches!(e, Event::Mark(_))));
        assert_eq!(events.last(), Some(&Event::Finished));
        assert!(!snapshot.exists());
        assert_eq!(clerk.stats().swaps_rejected(), 1);
    }

    #[test]
    fn persist_failure_skips_the_owner() {
        let temp = tempdir().unwrap();
        let item = work_item(&temp);
        // Occupy the snapshot name so the exclusive create fails.
        std::fs::write(item.ledger.manifest_path(item.next_sequence), b"taken").unwrap();
        let owner = ScriptedOwner::new(vec![WorkResponse::Work(item)], true);
        let mut clerk = test_clerk(Arc::clone(&owner), CompactionConfig::default());

        assert_eq!(clerk.run_round(), RoundOutcome::Failed);
        assert_eq!(owner.events(), vec![Event::Pull, Event::Finished]);
        assert_eq!(clerk.stats().failures(), 1);
    }

    #[test]
    fn empty_source_level_fails_round() {
        let temp = tempdir().unwrap();
        let mut item = work_item(&temp);
        item.manifest = Arc::new(Manifest::new());
        let owner = ScriptedOwner::new(vec![WorkResponse::Work(item)], true);
        let mut clerk = test_clerk(Arc::clone(&owner), CompactionConfig::default());

        assert_eq!(clerk.run_round(), RoundOutcome::Failed);
        assert_eq!(owner.events(), vec![Event::Pull, Event::Finished]);
    }

    #[test]
    fn idle_rounds_report_backlog() {
        let owner = ScriptedOwner::new(
            vec![
                WorkResponse::Idle { backlog: true },
                WorkResponse::Idle { backlog: false },
            ],
            true,
        );
        let mut clerk = test_clerk(Arc::clone(&owner), CompactionConfig::default());

        assert_eq!(clerk.run_round(), RoundOutcome::NoWork { backlog: true });
        assert_eq!(clerk.run_round(), RoundOutcome::NoWork { backlog: false });
        assert_eq!(clerk.stats().idle_polls(), 2);
    }

    #[test]
    fn spawned_clerk_answers_prompts_and_stops() {
        let owner = ScriptedOwner::new(Vec::new(), true);
        let config = CompactionConfig::default().base_interval(Duration::from_secs(60));
        let handle = test_clerk(Arc::clone(&owner), config).spawn().unwrap();

        assert!(handle.prompt());
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.stats().rounds() == 0 {
            assert!(Instant::now() < deadline, "clerk never ran");
            thread::sleep(Duration::from_millis(5));
        }

        let prompter = handle.prompter();
        let stats = Arc::clone(&handle.stats);
        let state = Arc::clone(&handle.state);
        handle.stop();

        assert_eq!(*state.lock(), ClerkState::Stopped);
        assert!(stats.rounds() >= 1);
        assert!(!prompter.prompt());
    }

    #[test]
    fn countdown_triggers_rounds_without_prompts() {
        let owner = ScriptedOwner::new(Vec::new(), true);
        let config = CompactionConfig::default()
            .base_interval(Duration::from_millis(5))
            .backoff_multiplier(1);
        let handle = test_clerk(Arc::clone(&owner), config).spawn().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.stats().rounds() < 3 {
            assert!(Instant::now() < deadline, "countdown never fired");
            thread::sleep(Duration::from_millis(5));
        }
        drop(handle);
        assert!(owner.events().len() >= 3);
    }

    /// Owner whose `pull_work` holds the clerk mid-round for a while.
    #[derive(Default)]
    struct SlowOwner {
        entered: AtomicBool,
        finished: AtomicBool,
    }

    impl CompactionOwner for SlowOwner {
        fn pull_work(&self, _level: LevelId) -> WorkResponse {
            self.entered.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(300));
            self.finished.store(true, Ordering::SeqCst);
            WorkResponse::Idle { backlog: false }
        }

        fn request_manifest_change(&self, _change: ManifestChange) -> CoreResult<()> {
            Err(CoreError::swap_rejected("unused"))
        }

        fn mark_for_delete(&self, _entry: &ManifestEntry) {}
    }

    #[test]
    fn stop_waits_for_round_in_progress() {
        let owner = Arc::new(SlowOwner::default());
        let config = CompactionConfig::default().base_interval(Duration::from_secs(60));
        let dyn_owner: Arc<dyn CompactionOwner> = Arc::clone(&owner) as Arc<dyn CompactionOwner>;
        let handle = Clerk::new(LevelId::new(0), dyn_owner, config).spawn().unwrap();

        assert!(handle.prompt());
        let deadline = Instant::now() + Duration::from_secs(5);
        while !owner.entered.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "round never started");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(handle.state(), ClerkState::Working);

        let stats = Arc::clone(&handle.stats);
        let state = Arc::clone(&handle.state);
        handle.stop();

        assert!(owner.finished.load(Ordering::SeqCst));
        assert_eq!(*state.lock(), ClerkState::Stopped);
        assert_eq!(stats.rounds(), 1);
        assert_eq!(stats.idle_polls(), 1);
    }
}
