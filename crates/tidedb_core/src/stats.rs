//! Compaction statistics.
//!
//! Every clerk owns a [`CompactionStats`] and feeds it the outcome of each
//! round. Handles expose it so operators and tests can watch compaction
//! progress without stopping the clerk.
//!
//! ```rust,ignore
//! let handle = Clerk::spawn(LevelId::new(0), owner, config)?;
//! // ...
//! let snap = handle.stats().snapshot();
//! println!("merges: {}, rejected swaps: {}", snap.merges, snap.swaps_rejected);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing the rounds a clerk has run.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct CompactionStats {
    // Round counters
    /// Rounds started, whatever their outcome.
    rounds: AtomicU64,
    /// Rounds where the owner had no work.
    idle_polls: AtomicU64,
    /// Rounds that rewrote segments.
    merges: AtomicU64,
    /// Rounds that moved a segment down without rewriting it.
    moves: AtomicU64,

    // Handshake counters
    /// Manifest changes the owner accepted.
    swaps_accepted: AtomicU64,
    /// Manifest changes the owner rejected.
    swaps_rejected: AtomicU64,
    /// Rounds that failed before reaching the owner.
    failures: AtomicU64,

    // Output counters
    /// Segment files written by merges.
    segments_written: AtomicU64,
    /// Records written by merges.
    entries_written: AtomicU64,
    /// Superseded duplicates dropped by merges.
    duplicates_dropped: AtomicU64,
    /// Segments handed to the owner for deferred deletion.
    segments_marked: AtomicU64,
}

impl CompactionStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_round(&self) {
        self.rounds.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_idle(&self) {
        self.idle_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_merge(&self, segments: u64, entries: u64, dropped: u64) {
        self.merges.fetch_add(1, Ordering::Relaxed);
        self.segments_written.fetch_add(segments, Ordering::Relaxed);
        self.entries_written.fetch_add(entries, Ordering::Relaxed);
        self.duplicates_dropped.fetch_add(dropped, Ordering::Relaxed);
    }

    pub(crate) fn record_move(&self) {
        self.moves.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_swap_accepted(&self, marked: u64) {
        self.swaps_accepted.fetch_add(1, Ordering::Relaxed);
        self.segments_marked.fetch_add(marked, Ordering::Relaxed);
    }

    pub(crate) fn record_swap_rejected(&self) {
        self.swaps_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of rounds started.
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    /// Returns the number of rounds that found no work.
    pub fn idle_polls(&self) -> u64 {
        self.idle_polls.load(Ordering::Relaxed)
    }

    /// Returns the number of rewriting merges.
    pub fn merges(&self) -> u64 {
        self.merges.load(Ordering::Relaxed)
    }

    /// Returns the number of pure moves.
    pub fn moves(&self) -> u64 {
        self.moves.load(Ordering::Relaxed)
    }

    /// Returns the number of accepted manifest changes.
    pub fn swaps_accepted(&self) -> u64 {
        self.swaps_accepted.load(Ordering::Relaxed)
    }

    /// Returns the number of rejected manifest changes.
    pub fn swaps_rejected(&self) -> u64 {
        self.swaps_rejected.load(Ordering::Relaxed)
    }

    /// Returns the number of failed rounds.
    ///
    /// Persist failures count here, not as rejections.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Returns the number of segment files written.
    pub fn segments_written(&self) -> u64 {
        self.segments_written.load(Ordering::Relaxed)
    }

    /// Returns the number of records written.
    pub fn entries_written(&self) -> u64 {
        self.entries_written.load(Ordering::Relaxed)
    }

    /// Returns the number of duplicates dropped.
    pub fn duplicates_dropped(&self) -> u64 {
        self.duplicates_dropped.load(Ordering::Relaxed)
    }

    /// Returns the number of segments marked for deletion.
    pub fn segments_marked(&self) -> u64 {
        self.segments_marked.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rounds: self.rounds(),
            idle_polls: self.idle_polls(),
            merges: self.merges(),
            moves: self.moves(),
            swaps_accepted: self.swaps_accepted(),
            swaps_rejected: self.swaps_rejected(),
            failures: self.failures(),
            segments_written: self.segments_written(),
            entries_written: self.entries_written(),
            duplicates_dropped: self.duplicates_dropped(),
            segments_marked: self.segments_marked(),
        }
    }
}

/// A point-in-time copy of [`CompactionStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Rounds started.
    pub rounds: u64,
    /// Rounds without work.
    pub idle_polls: u64,
    /// Rewriting merges.
    pub merges: u64,
    /// Pure moves.
    pub moves: u64,
    /// Accepted manifest changes.
    pub swaps_accepted: u64,
    /// Rejected manifest changes.
    pub swaps_rejected: u64,
    /// Failed rounds.
    pub failures: u64,
    /// Segment files written.
    pub segments_written: u64,
    /// Records written.
    pub entries_written: u64,
    /// Duplicates dropped.
    pub duplicates_dropped: u64,
    /// Segments marked for deletion.
    pub segments_marked: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = CompactionStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn merge_and_handshake_counters() {
        let stats = CompactionStats::new();

        stats.record_round();
        stats.record_merge(3, 1200, 40);
        stats.record_swap_accepted(4);

        stats.record_round();
        stats.record_move();
        stats.record_swap_rejected();

        let snap = stats.snapshot();
        assert_eq!(snap.rounds, 2);
        assert_eq!(snap.merges, 1);
        assert_eq!(snap.moves, 1);
        assert_eq!(snap.segments_written, 3);
        assert_eq!(snap.entries_written, 1200);
        assert_eq!(snap.duplicates_dropped, 40);
        assert_eq!(snap.swaps_accepted, 1);
        assert_eq!(snap.swaps_rejected, 1);
        assert_eq!(snap.segments_marked, 4);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(CompactionStats::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let s = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    s.record_round();
                    s.record_idle();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(stats.rounds(), 800);
        assert_eq!(stats.idle_polls(), 800);
        assert_eq!(stats.failures(), 0);
    }
}
