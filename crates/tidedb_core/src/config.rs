//! Compaction configuration.

use crate::types::LevelId;
use std::time::Duration;

/// Configuration shared by clerks, the merge engine and the level manager.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Base re-poll interval for an idle clerk.
    pub base_interval: Duration,

    /// Factor applied to `base_interval` when a level reports no work and no
    /// backlog.
    pub backoff_multiplier: u32,

    /// Maximum number of records written to one output segment.
    pub max_entries_per_segment: usize,

    /// Number of records fetched per cursor read during a merge.
    pub read_batch_size: usize,

    /// Level 0 is compacted once it holds more than this many segments.
    pub level_zero_limit: usize,

    /// Segment limit for level 1.
    pub level_base_limit: usize,

    /// Growth factor of the segment limit per level below level 1.
    pub level_fanout: usize,

    /// Deepest level. It is never a compaction source.
    pub max_level: u32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            backoff_multiplier: 10,
            max_entries_per_segment: 4096,
            read_batch_size: 256,
            level_zero_limit: 0,
            level_base_limit: 4,
            level_fanout: 8,
            max_level: 7,
        }
    }
}

impl CompactionConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base re-poll interval.
    #[must_use]
    pub const fn base_interval(mut self, interval: Duration) -> Self {
        self.base_interval = interval;
        self
    }

    /// Sets the idle backoff multiplier.
    #[must_use]
    pub const fn backoff_multiplier(mut self, multiplier: u32) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the maximum records per output segment.
    #[must_use]
    pub const fn max_entries_per_segment(mut self, entries: usize) -> Self {
        self.max_entries_per_segment = entries;
        self
    }

    /// Sets the cursor batch size.
    #[must_use]
    pub const fn read_batch_size(mut self, size: usize) -> Self {
        self.read_batch_size = size;
        self
    }

    /// Sets the level-0 segment limit.
    #[must_use]
    pub const fn level_zero_limit(mut self, limit: usize) -> Self {
        self.level_zero_limit = limit;
        self
    }

    /// Sets the level-1 segment limit and the per-level fanout.
    #[must_use]
    pub const fn level_limits(mut self, base: usize, fanout: usize) -> Self {
        self.level_base_limit = base;
        self.level_fanout = fanout;
        self
    }

    /// Sets the deepest level.
    #[must_use]
    pub const fn max_level(mut self, level: u32) -> Self {
        self.max_level = level;
        self
    }

    /// Interval used after a level reported no work and no backlog.
    #[must_use]
    pub fn backoff_interval(&self) -> Duration {
        self.base_interval.saturating_mul(self.backoff_multiplier.max(1))
    }

    /// Maximum number of segments `level` may hold before it needs compaction.
    ///
    /// The deepest level is unbounded.
    #[must_use]
    pub fn segment_limit(&self, level: LevelId) -> usize {
        match level.as_u32() {
            0 => self.level_zero_limit,
            l if l >= self.max_level => usize::MAX,
            l => {
                let growth = self.level_fanout.saturating_pow(l - 1);
                self.level_base_limit.saturating_mul(growth)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = CompactionConfig::default();
        assert_eq!(config.base_interval, Duration::from_millis(100));
        assert_eq!(config.backoff_interval(), Duration::from_secs(1));
        assert_eq!(config.level_zero_limit, 0);
    }

    #[test]
    fn builder_pattern() {
        let config = CompactionConfig::new()
            .base_interval(Duration::from_millis(5))
            .backoff_multiplier(4)
            .max_entries_per_segment(16)
            .read_batch_size(8);

        assert_eq!(config.backoff_interval(), Duration::from_millis(20));
        assert_eq!(config.max_entries_per_segment, 16);
        assert_eq!(config.read_batch_size, 8);
    }

    #[test]
    fn zero_multiplier_never_shrinks_interval() {
        let config = CompactionConfig::new().backoff_multiplier(0);
        assert_eq!(config.backoff_interval(), config.base_interval);
    }

    #[test]
    fn segment_limits_grow_by_fanout() {
        let config = CompactionConfig::new().level_limits(2, 10).max_level(4);
        assert_eq!(config.segment_limit(LevelId::new(0)), 0);
        assert_eq!(config.segment_limit(LevelId::new(1)), 2);
        assert_eq!(config.segment_limit(LevelId::new(2)), 20);
        assert_eq!(config.segment_limit(LevelId::new(3)), 200);
        assert_eq!(config.segment_limit(LevelId::new(4)), usize::MAX);
    }
}
