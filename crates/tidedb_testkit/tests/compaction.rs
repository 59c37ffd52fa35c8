//! End-to-end compaction tests: merge properties, the clerk handshake and the
//! level manager driving real clerk threads.

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tidedb_core::{
    next_poll_interval, perform_merge, split_overlapping, CandidateSelector, Clerk,
    CompactionConfig, CompactionOwner, CoreError, FileSegmentFactory, KeyRange, LevelId,
    LevelManager, Manifest, ManifestEntry, MemorySegmentFactory, MergeEngine, RandomSelector,
    RoundOutcome, SegmentRecord,
};
use tidedb_testkit::prelude::*;

const L0: LevelId = LevelId::new(0);
const L1: LevelId = LevelId::new(1);

fn read_all(entry: &ManifestEntry) -> Vec<SegmentRecord> {
    let mut out = Vec::new();
    let mut cursor = Some(entry.segment.cursor(&KeyRange::All));
    while let Some(current) = cursor.take() {
        let (records, rest) = current.read_next(256).unwrap();
        out.extend(records);
        cursor = rest;
    }
    out
}

fn lookup(manifest: &Manifest, k: u32) -> Option<String> {
    manifest
        .get(&key(k))
        .unwrap()
        .and_then(|record| record.value().cloned())
        .map(|v| String::from_utf8(v.to_vec()).unwrap())
}

fn memory_engine(config: CompactionConfig) -> MergeEngine {
    MergeEngine::new(config, Arc::new(MemorySegmentFactory))
}

fn file_engine(config: CompactionConfig) -> MergeEngine {
    MergeEngine::new(config, Arc::new(FileSegmentFactory))
}

fn names(entries: &[ManifestEntry]) -> BTreeSet<PathBuf> {
    entries.iter().map(|e| e.filename.clone()).collect()
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

// ============================================================================
// Merge properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn merged_level_stays_sorted_and_complete(case in merge_case_strategy()) {
        let ledger = TestLedger::new();
        let upper = memory_entry("upper", case.upper.iter().copied(), "new");
        let level: Vec<ManifestEntry> = case
            .level
            .iter()
            .enumerate()
            .map(|(i, keys)| memory_entry(&format!("l1-{i}"), keys.iter().copied(), "old"))
            .collect();
        let item = ledger.work_item(L0, manifest_of([(0, vec![upper]), (1, level)]), 1);

        let engine = memory_engine(CompactionConfig::default().max_entries_per_segment(64));
        let mut selector = RandomSelector::seeded(0);
        let result = perform_merge(&item, &mut selector, &engine).unwrap();

        let output = result.manifest.level(L1);
        assert_sorted_disjoint(output);
        prop_assert!(result.manifest.level(L0).is_empty());

        let upper_keys: BTreeSet<u32> = case.upper.iter().copied().collect();
        let all_keys: BTreeSet<u32> = case
            .level
            .iter()
            .flatten()
            .copied()
            .chain(upper_keys.iter().copied())
            .collect();
        for &k in &all_keys {
            let covering = output.iter().filter(|e| e.covers(&key(k))).count();
            prop_assert_eq!(covering, 1, "key {} covered {} times", k, covering);

            let tag = if upper_keys.contains(&k) { "new" } else { "old" };
            prop_assert_eq!(lookup(&result.manifest, k), Some(format!("{tag}:{k}")));
        }
    }

    #[test]
    fn selection_removes_exactly_one(level in level_strategy(1_000, 200, 8), seed in any::<u64>()) {
        let entries: Vec<ManifestEntry> = level
            .iter()
            .enumerate()
            .map(|(i, keys)| memory_entry(&format!("s{i}"), keys.iter().copied(), "v"))
            .collect();
        let manifest = manifest_of([(1, entries.clone())]);

        let (selected, rest) = RandomSelector::seeded(seed).select(L1, &manifest).unwrap();
        prop_assert_eq!(rest.len(), entries.len() - 1);
        prop_assert!(!rest.iter().any(|e| e.same_segment(&selected)));

        let mut union = names(&rest);
        union.insert(selected.filename.clone());
        prop_assert_eq!(union, names(&entries));
    }
}

#[test]
fn upper_value_wins_on_shared_keys() {
    let upper = memory_entry("upper", 0..100, "new");
    let sink = memory_entry("sink", 50..150, "old");

    let output = memory_engine(CompactionConfig::default())
        .merge(&upper, &[sink], L1, Path::new("out"), SequenceNumber::new(3))
        .unwrap();

    assert!(!output.moved);
    assert_eq!(output.entries_written, 150);
    assert_eq!(output.duplicates_dropped, 50);

    let records: Vec<SegmentRecord> = output.segments.iter().flat_map(read_all).collect();
    let shared: Vec<&SegmentRecord> = records
        .iter()
        .filter(|r| (key(50)..key(100)).contains(&r.key))
        .collect();
    assert_eq!(shared.len(), 50);
    for record in shared {
        assert!(record.value().unwrap().starts_with(b"new:"));
    }
}

#[test]
fn move_writes_nothing() {
    let mut ledger = TestLedger::new();
    let upper = ledger.file_entry(L0, 500..600, "new");
    let left = ledger.file_entry(L1, 0..100, "old");
    let right = ledger.file_entry(L1, 700..800, "old");
    let before = ledger.segment_files();

    let item = ledger.work_item(
        L0,
        manifest_of([(0, vec![upper.clone()]), (1, vec![left, right])]),
        7,
    );
    let mut selector = RandomSelector::seeded(1);
    let result = perform_merge(&item, &mut selector, &file_engine(CompactionConfig::default()))
        .unwrap();

    assert!(result.is_move());
    assert!(result.unreferenced.is_empty());
    assert_eq!(result.entries_written, 0);
    assert_eq!(ledger.segment_files(), before);

    let moved: Vec<&ManifestEntry> = result
        .manifest
        .level(L1)
        .iter()
        .filter(|e| e.same_segment(&upper))
        .collect();
    assert_eq!(moved.len(), 1);
    assert_eq!(result.manifest.level(L1).len(), 3);
}

#[test]
fn overlapping_run_merged_and_neighbour_untouched() {
    let upper = memory_entry("upper", 100..=200, "new");
    let a = memory_entry("a", 50..=150, "old");
    let b = memory_entry("b", 160..=250, "old");
    let c = memory_entry("c", 260..=300, "old");

    let (sinks, others) = split_overlapping(&upper, &[a.clone(), b.clone(), c.clone()]);
    assert_eq!(names(&sinks), names(&[a, b]));
    assert_eq!(others.len(), 1);
    assert!(others[0].same_segment(&c));

    let output = memory_engine(CompactionConfig::default().max_entries_per_segment(64))
        .merge(&upper, &sinks, L1, Path::new("out"), SequenceNumber::new(9))
        .unwrap();
    let first = output.segments.first().unwrap();
    let last = output.segments.last().unwrap();
    assert_eq!(first.start_key, key(50));
    assert_eq!(last.end_key, key(250));
    assert!(last.end_key < c.start_key);

    let mut level = output.segments.clone();
    level.extend(others);
    assert_sorted_disjoint(&level);
}

#[test]
fn sixteen_thousand_keys_across_four_sinks() {
    let mut ledger = TestLedger::new();
    let sink_sets: Vec<Vec<u32>> = (0..4u32)
        .map(|i| (i * 8_000..(i + 1) * 8_000).step_by(2).collect())
        .collect();
    let upper_set: Vec<u32> = (1..32_000).step_by(16).collect();
    assert_eq!(sink_sets.iter().map(Vec::len).sum::<usize>(), 16_000);

    let upper = ledger.file_entry(L0, upper_set.iter().copied(), "new");
    let sinks: Vec<ManifestEntry> = sink_sets
        .iter()
        .map(|keys| ledger.file_entry(L1, keys.iter().copied(), "old"))
        .collect();
    let item = ledger.work_item(L0, manifest_of([(0, vec![upper]), (1, sinks)]), 11);

    let engine = file_engine(
        CompactionConfig::default()
            .max_entries_per_segment(1_000)
            .read_batch_size(128),
    );
    let mut selector = RandomSelector::seeded(2);
    let result = perform_merge(&item, &mut selector, &engine).unwrap();

    assert_eq!(result.entries_written, 18_000);
    assert_eq!(result.duplicates_dropped, 0);
    assert_eq!(result.created.len(), 18);
    assert_eq!(result.unreferenced.len(), 5);

    let output = result.manifest.level(L1);
    assert_sorted_disjoint(output);
    assert_eq!(output.first().unwrap().start_key, key(0));
    assert_eq!(output.last().unwrap().end_key, key(31_998));

    // Every input key falls in exactly one output range.
    let all: BTreeSet<u32> = sink_sets
        .iter()
        .flatten()
        .chain(upper_set.iter())
        .copied()
        .collect();
    for &k in &all {
        assert_eq!(output.iter().filter(|e| e.covers(&key(k))).count(), 1);
    }

    let mut rng = StdRng::seed_from_u64(16_000);
    for (set, tag) in sink_sets
        .iter()
        .map(|s| (s, "old"))
        .chain(std::iter::once((&upper_set, "new")))
    {
        for &k in set.choose_multiple(&mut rng, 50) {
            let entry = result.manifest.find(L1, &key(k)).unwrap();
            let record = entry.segment.get(&key(k)).unwrap().unwrap();
            assert_eq!(record.value().unwrap(), &value(tag, k));
        }
    }
}

// ============================================================================
// Clerk handshake
// ============================================================================

fn merge_fixture(ledger: &mut TestLedger) -> (Manifest, Vec<PathBuf>) {
    let upper = ledger.file_entry(L0, 0..200, "new");
    let a = ledger.file_entry(L1, 0..120, "old");
    let b = ledger.file_entry(L1, 150..300, "old");
    let inputs = vec![
        upper.filename.clone(),
        a.filename.clone(),
        b.filename.clone(),
    ];
    (manifest_of([(0, vec![upper]), (1, vec![a, b])]), inputs)
}

fn test_clerk(owner: &Arc<RecordingOwner>) -> Clerk {
    let owner: Arc<dyn CompactionOwner> = Arc::clone(owner) as Arc<dyn CompactionOwner>;
    Clerk::new(
        L0,
        owner,
        CompactionConfig::default().max_entries_per_segment(100),
    )
    .with_selector(RandomSelector::seeded(3))
}

#[test]
fn inputs_marked_only_after_acceptance() {
    init_tracing();
    let mut ledger = TestLedger::new();
    let (manifest, inputs) = merge_fixture(&mut ledger);

    let owner = Arc::new(RecordingOwner::new(ChangePolicy::Accept));
    owner.push_work(ledger.work_item(L0, manifest, 20));
    let mut clerk = test_clerk(&owner);

    assert_eq!(clerk.run_round(), RoundOutcome::Accepted);

    let events = owner.events();
    let requested = events
        .iter()
        .position(|e| matches!(e, OwnerEvent::ChangeRequested { .. }))
        .unwrap();
    assert_eq!(
        events[requested],
        OwnerEvent::ChangeRequested {
            version: 1,
            persisted: true
        }
    );
    let first_mark = events
        .iter()
        .position(|e| matches!(e, OwnerEvent::Marked(_)))
        .unwrap();
    assert!(requested < first_mark);
    assert_eq!(events.last(), Some(&OwnerEvent::Finished(L0)));
    let marked: BTreeSet<PathBuf> = owner.marked().into_iter().collect();
    assert_eq!(marked, inputs.iter().cloned().collect());

    let installed = owner.installed().unwrap();
    assert!(installed.level(L0).is_empty());
    for k in 0..300 {
        let tag = if k < 200 { "new" } else { "old" };
        assert_eq!(lookup(&installed, k), Some(format!("{tag}:{k}")));
    }

    // Nothing else references the inputs, so their files are gone.
    for input in &inputs {
        assert!(!input.exists(), "{} still on disk", input.display());
    }
    assert_eq!(ledger.segment_files().len(), installed.total_segments());
}

#[test]
fn rejected_change_marks_nothing() {
    init_tracing();
    let mut ledger = TestLedger::new();
    let (manifest, inputs) = merge_fixture(&mut ledger);
    let base = manifest.clone();

    let owner = Arc::new(RecordingOwner::new(ChangePolicy::Reject));
    owner.push_work(ledger.work_item(L0, manifest, 21));
    let mut clerk = test_clerk(&owner);

    assert_eq!(clerk.run_round(), RoundOutcome::Rejected);
    assert!(owner.marked().is_empty());
    assert!(owner.installed().is_none());
    assert_eq!(clerk.stats().swaps_rejected(), 1);
    assert_eq!(clerk.stats().segments_marked(), 0);

    // Inputs survive, outputs are orphans and the snapshot is withdrawn.
    for input in &inputs {
        assert!(input.exists());
    }
    let orphans = ledger.ledger.find_orphans(&base).unwrap();
    assert!(!orphans.is_empty());
    assert!(!ledger.ledger.manifest_path(SequenceNumber::new(21)).exists());
}

#[test]
fn idle_polls_never_speed_up() {
    let owner = Arc::new(RecordingOwner::new(ChangePolicy::Accept).with_backlog(false));
    let mut clerk = test_clerk(&owner);
    let config = CompactionConfig::default();

    let first = clerk.run_round();
    let second = clerk.run_round();
    assert_eq!(first, RoundOutcome::NoWork { backlog: false });
    assert_eq!(second, first);

    let a = next_poll_interval(&config, &first);
    let b = next_poll_interval(&config, &second);
    assert!(b >= a);
    assert!(a >= config.base_interval);
    assert_eq!(clerk.stats().idle_polls(), 2);
}

#[test]
fn empty_source_level_fails_round() {
    let ledger = TestLedger::new();
    let owner = Arc::new(RecordingOwner::new(ChangePolicy::Accept));
    owner.push_work(ledger.work_item(L0, Manifest::new(), 5));
    let mut clerk = test_clerk(&owner);

    assert_eq!(clerk.run_round(), RoundOutcome::Failed);
    assert_eq!(clerk.stats().failures(), 1);
    assert_eq!(owner.events().last(), Some(&OwnerEvent::Finished(L0)));
    assert!(!owner
        .events()
        .iter()
        .any(|e| matches!(e, OwnerEvent::ChangeRequested { .. })));
}

// ============================================================================
// Level manager
// ============================================================================

fn manager_config() -> CompactionConfig {
    CompactionConfig::default()
        .base_interval(Duration::from_millis(5))
        .backoff_multiplier(2)
        .max_entries_per_segment(50)
        .level_limits(2, 4)
        .max_level(3)
}

fn flush_when_free(manager: &LevelManager, records: &[SegmentRecord]) {
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        match manager.flush(records) {
            Ok(()) => return,
            Err(CoreError::InvalidOperation { .. }) if Instant::now() < deadline => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(e) => panic!("flush failed: {e}"),
        }
    }
}

#[test]
fn background_clerks_compact_flushes() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut expected = BTreeMap::new();

    {
        let manager = Arc::new(LevelManager::open(dir.path(), manager_config()).unwrap());
        let clerks = manager.spawn_clerks().unwrap();
        assert_eq!(clerks.len(), 3);

        for batch in 0..12u32 {
            let keys: Vec<u32> = (batch * 40..batch * 40 + 150).collect();
            let tag = format!("b{batch}");
            for &k in &keys {
                expected.insert(k, value(&tag, k));
            }
            flush_when_free(&manager, &records(keys, &tag, u64::from(batch) + 1));
        }

        assert!(wait_until(Duration::from_secs(20), || {
            manager.snapshot().level(L0).is_empty()
        }));
        for (&k, v) in &expected {
            assert_eq!(manager.get(&key(k)).unwrap().as_ref(), Some(v), "key {k}");
        }

        let snapshot = manager.snapshot();
        for (_, entries) in snapshot.levels() {
            assert_sorted_disjoint(entries);
        }
        let merged: u64 = clerks.iter().map(|c| c.stats().swaps_accepted()).sum();
        assert!(merged >= 12);

        for clerk in clerks {
            clerk.stop();
        }
    }

    // Everything survives a reopen, with no leftover files.
    let manager = LevelManager::open(dir.path(), manager_config()).unwrap();
    assert!(manager.orphans().is_empty());
    for (&k, v) in &expected {
        assert_eq!(manager.get(&key(k)).unwrap().as_ref(), Some(v), "key {k}");
    }
    assert!(manager.pending_deletions().is_empty());
}
