//! Pull iterators used by the merge engine.
//!
//! [`SegmentIter`] turns the continuation-style [`SegmentCursor`] into a
//! record-at-a-time iterator that refills in batches. [`MergeIterator`] merges
//! several of them with a binary heap.

use crate::error::CoreResult;
use crate::segment::{SegmentCursor, SegmentRecord};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};

/// Record-at-a-time iterator over one segment cursor.
#[derive(Debug)]
pub struct SegmentIter {
    cursor: Option<SegmentCursor>,
    buffer: VecDeque<SegmentRecord>,
    batch_size: usize,
}

impl SegmentIter {
    /// Wraps `cursor`, reading `batch_size` records per refill.
    #[must_use]
    pub fn new(cursor: SegmentCursor, batch_size: usize) -> Self {
        Self {
            cursor: Some(cursor),
            buffer: VecDeque::new(),
            batch_size: batch_size.max(1),
        }
    }

    /// Returns the next record, or `None` once the cursor is exhausted.
    pub fn next_record(&mut self) -> CoreResult<Option<SegmentRecord>> {
        while self.buffer.is_empty() {
            let Some(cursor) = self.cursor.take() else {
                return Ok(None);
            };
            let (records, remainder) = cursor.read_next(self.batch_size)?;
            self.buffer.extend(records);
            self.cursor = remainder;
        }
        Ok(self.buffer.pop_front())
    }

    /// Returns true once every record has been handed out.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.buffer.is_empty() && self.cursor.is_none()
    }
}

/// Where a merged record came from.
///
/// The derived order is the tie-break rank: the upper segment outranks every
/// sink, and sinks rank by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MergeSource {
    /// The segment being pushed down. Newer than any sink.
    Upper,
    /// The `n`-th overlapping segment of the target level.
    Sink(usize),
}

struct HeapEntry {
    record: SegmentRecord,
    source: MergeSource,
    slot: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Ascending key, then ascending rank. Wrapped in Reverse for the heap.
        self.record
            .key
            .cmp(&other.record.key)
            .then(self.source.cmp(&other.source))
    }
}

/// K-way merge of an upper segment over its sinks.
///
/// Records come out in strictly ascending key order. When several sources
/// hold the same key, the highest-ranked one wins and the others are dropped.
pub struct MergeIterator {
    sources: Vec<(MergeSource, SegmentIter)>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    dropped: u64,
}

impl MergeIterator {
    /// Primes the heap with the first record of every source.
    pub fn new(upper: SegmentIter, sinks: Vec<SegmentIter>) -> CoreResult<Self> {
        let mut sources = Vec::with_capacity(sinks.len() + 1);
        sources.push((MergeSource::Upper, upper));
        sources.extend(
            sinks
                .into_iter()
                .enumerate()
                .map(|(i, iter)| (MergeSource::Sink(i), iter)),
        );

        let mut merge = Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            dropped: 0,
        };
        for slot in 0..merge.sources.len() {
            merge.refill(slot)?;
        }
        Ok(merge)
    }

    fn refill(&mut self, slot: usize) -> CoreResult<()> {
        let (source, iter) = &mut self.sources[slot];
        if let Some(record) = iter.next_record()? {
            self.heap.push(Reverse(HeapEntry {
                record,
                source: *source,
                slot,
            }));
        }
        Ok(())
    }

    /// Returns the next surviving record and its source.
    pub fn next_entry(&mut self) -> CoreResult<Option<(SegmentRecord, MergeSource)>> {
        let Some(Reverse(winner)) = self.heap.pop() else {
            return Ok(None);
        };
        self.refill(winner.slot)?;

        while let Some(Reverse(next)) = self.heap.peek() {
            if next.record.key != winner.record.key {
                break;
            }
            let slot = next.slot;
            self.heap.pop();
            self.dropped += 1;
            self.refill(slot)?;
        }

        Ok(Some((winner.record, winner.source)))
    }

    /// Takes up to `max` records.
    pub fn take_batch(&mut self, max: usize) -> CoreResult<Vec<SegmentRecord>> {
        let mut batch = Vec::with_capacity(max.min(4096));
        while batch.len() < max {
            match self.next_entry()? {
                Some((record, _)) => batch.push(record),
                None => break,
            }
        }
        Ok(batch)
    }

    /// Returns true once every source is exhausted.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.heap.is_empty()
    }

    /// Returns true if `source` has nothing left, including its pending record.
    #[must_use]
    pub fn source_exhausted(&self, source: MergeSource) -> bool {
        let Some(slot) = self.sources.iter().position(|(s, _)| *s == source) else {
            return true;
        };
        self.sources[slot].1.is_exhausted()
            && !self.heap.iter().any(|Reverse(entry)| entry.slot == slot)
    }

    /// Returns the number of superseded duplicates dropped so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
