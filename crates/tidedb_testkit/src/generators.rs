//! Property-based test generators using proptest.
//!
//! Provides strategies for segment layouts that respect the level
//! invariants: keys ascend inside a segment, and segments of one level never
//! overlap.

use proptest::prelude::*;
use std::collections::BTreeSet;

/// Inputs for one merge: the upper segment's keys and the sink level.
#[derive(Debug, Clone)]
pub struct MergeCase {
    /// Keys of the upper segment, ascending.
    pub upper: Vec<u32>,
    /// Keys of each sink segment. Segments ascend and never overlap.
    pub level: Vec<Vec<u32>>,
}

/// Strategy for a sorted, non-empty set of keys below `max_key`.
pub fn key_set_strategy(max_key: u32, max_len: usize) -> impl Strategy<Value = Vec<u32>> {
    prop::collection::btree_set(0..max_key, 1..=max_len).prop_map(|set| set.into_iter().collect())
}

/// Strategy for a level: a key set cut into `1..=max_segments` disjoint runs.
pub fn level_strategy(
    max_key: u32,
    max_len: usize,
    max_segments: usize,
) -> impl Strategy<Value = Vec<Vec<u32>>> {
    key_set_strategy(max_key, max_len)
        .prop_flat_map(move |keys| {
            // At most len - 1 distinct cut points exist.
            let max_cuts = max_segments.min(keys.len()).max(1);
            let cuts = prop::collection::btree_set(1..keys.len().max(2), 0..max_cuts);
            (Just(keys), cuts)
        })
        .prop_map(|(keys, cuts)| split_at_cuts(&keys, &cuts))
}

fn split_at_cuts(keys: &[u32], cuts: &BTreeSet<usize>) -> Vec<Vec<u32>> {
    let mut runs = Vec::new();
    let mut start = 0;
    for &cut in cuts.iter().filter(|&&c| c < keys.len()) {
        runs.push(keys[start..cut].to_vec());
        start = cut;
    }
    runs.push(keys[start..].to_vec());
    runs
}

/// Strategy for a full merge input.
pub fn merge_case_strategy() -> impl Strategy<Value = MergeCase> {
    (key_set_strategy(2_000, 200), level_strategy(2_000, 400, 8))
        .prop_map(|(upper, level)| MergeCase { upper, level })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn levels_are_sorted_and_disjoint(level in level_strategy(500, 100, 6)) {
            prop_assert!(!level.is_empty());
            for run in &level {
                prop_assert!(!run.is_empty());
                prop_assert!(run.windows(2).all(|w| w[0] < w[1]));
            }
            for pair in level.windows(2) {
                prop_assert!(pair[0].last() < pair[1].first());
            }
        }
    }

    #[test]
    fn split_ignores_out_of_range_cuts() {
        let cuts: BTreeSet<usize> = [2, 9].into_iter().collect();
        assert_eq!(split_at_cuts(&[1, 2, 3, 4], &cuts), vec![vec![1, 2], vec![3, 4]]);
    }
}
