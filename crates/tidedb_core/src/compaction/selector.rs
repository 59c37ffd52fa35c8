//! Choosing what to compact.
//!
//! A round pushes one segment of the source level into the next level. The
//! selector picks that segment; [`split_overlapping`] then finds the run of
//! next-level segments it must be merged with.

use crate::error::{CoreError, CoreResult};
use crate::manifest::{Manifest, ManifestEntry};
use crate::types::LevelId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Picks the segment a round compacts.
pub trait CandidateSelector: Send {
    /// Removes one entry from `level` of `manifest`.
    ///
    /// Returns the chosen entry and the level's remaining entries, in order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SelectionEmpty`] if the level has no segments.
    fn select(
        &mut self,
        level: LevelId,
        manifest: &Manifest,
    ) -> CoreResult<(ManifestEntry, Vec<ManifestEntry>)>;
}

/// Uniform random choice.
///
/// Every segment gets compacted eventually, whatever the order, so no
/// heuristic is applied. The generator is injected so tests can replay a
/// selection sequence.
#[derive(Debug, Clone)]
pub struct RandomSelector<R = StdRng> {
    rng: R,
}

impl RandomSelector<StdRng> {
    /// Creates a selector with a reproducible sequence.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    /// Creates a selector seeded from OS entropy.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }
}

impl<R: Rng> RandomSelector<R> {
    /// Wraps an existing generator.
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng + Send> CandidateSelector for RandomSelector<R> {
    fn select(
        &mut self,
        level: LevelId,
        manifest: &Manifest,
    ) -> CoreResult<(ManifestEntry, Vec<ManifestEntry>)> {
        let entries = manifest.level(level);
        if entries.is_empty() {
            return Err(CoreError::SelectionEmpty { level });
        }
        let mut rest = entries.to_vec();
        let selected = rest.remove(self.rng.gen_range(0..entries.len()));
        Ok((selected, rest))
    }
}

/// Splits `sink_level` into the entries overlapping `selected` and the rest.
///
/// `sink_level` is sorted and non-overlapping, so the overlapping entries
/// form one contiguous run. Both halves keep their order.
#[must_use]
pub fn split_overlapping(
    selected: &ManifestEntry,
    sink_level: &[ManifestEntry],
) -> (Vec<ManifestEntry>, Vec<ManifestEntry>) {
    let first = sink_level.partition_point(|e| e.end_key < selected.start_key);
    let last = sink_level.partition_point(|e| e.start_key <= selected.end_key);
    let last = last.max(first);

    let sinks = sink_level[first..last].to_vec();
    let mut others = sink_level[..first].to_vec();
    others.extend_from_slice(&sink_level[last..]);
    (sinks, others)
}
