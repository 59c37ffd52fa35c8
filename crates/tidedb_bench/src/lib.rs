//! Benchmark utilities for TideDB.

#![warn(missing_docs)]

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::Path;
use tidedb_core::{
    LevelId, ManifestEntry, MemorySegmentFactory, SegmentFactory, SegmentRecord, SequenceNumber,
};

/// Fixed-width key for `k`.
pub fn bench_key(k: u64) -> Vec<u8> {
    format!("bench{k:012}").into_bytes()
}

/// Random payload of `size` bytes.
pub fn random_value(rng: &mut impl Rng, size: usize) -> Vec<u8> {
    (0..size).map(|_| rng.gen()).collect()
}

/// Sorted records for `keys` with `value_size`-byte payloads.
pub fn generate_records(keys: &[u64], value_size: usize, seed: u64) -> Vec<SegmentRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    keys.iter()
        .map(|&k| {
            SegmentRecord::put(
                bench_key(k),
                random_value(&mut rng, value_size),
                SequenceNumber::new(seed),
            )
        })
        .collect()
}

/// In-memory segment descriptor holding `keys`.
pub fn memory_segment(name: &str, keys: &[u64], value_size: usize, seed: u64) -> ManifestEntry {
    let records = generate_records(keys, value_size, seed);
    let segment = MemorySegmentFactory
        .create_segment(Path::new(name), LevelId::new(0), &records)
        .expect("in-memory segment");
    ManifestEntry::from_segment(segment)
}

/// An upper segment over `total` keys and `sinks` disjoint sink segments.
///
/// Every `stride`-th key of the space goes to the upper segment, so it
/// overlaps every sink.
pub fn merge_inputs(
    total: u64,
    sinks: u64,
    stride: u64,
    value_size: usize,
) -> (ManifestEntry, Vec<ManifestEntry>) {
    let upper_keys: Vec<u64> = (0..total).step_by(stride.max(1) as usize).collect();
    let upper = memory_segment("upper", &upper_keys, value_size, 2);

    let per_sink = total / sinks.max(1);
    let sink_entries = (0..sinks)
        .map(|i| {
            let keys: Vec<u64> = (i * per_sink..(i + 1) * per_sink).collect();
            memory_segment(&format!("sink-{i}"), &keys, value_size, 1)
        })
        .collect();
    (upper, sink_entries)
}

/// `count` distinct keys below `total`, shuffled.
pub fn probe_keys(total: u64, count: usize, seed: u64) -> Vec<Vec<u8>> {
    let mut keys: Vec<u64> = (0..total).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(seed));
    keys.truncate(count);
    keys.into_iter().map(bench_key).collect()
}
