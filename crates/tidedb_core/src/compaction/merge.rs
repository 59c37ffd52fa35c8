//! The merge engine and the manifest rewrite around it.

use crate::compaction::iterator::{MergeIterator, SegmentIter};
use crate::compaction::selector::{split_overlapping, CandidateSelector};
use crate::compaction::work::{MergeResult, WorkItem};
use crate::config::CompactionConfig;
use crate::error::{CoreError, CoreResult};
use crate::ledger::segment_file_name;
use crate::manifest::ManifestEntry;
use crate::segment::SegmentFactory;
use crate::types::{KeyRange, LevelId, SequenceNumber};
use std::path::Path;
use std::sync::Arc;

/// Segments produced by [`MergeEngine::merge`].
#[derive(Debug, Clone)]
pub struct MergeOutput {
    /// Target-level descriptors, ascending and non-overlapping.
    pub segments: Vec<ManifestEntry>,
    /// True if the upper segment was moved without rewriting.
    pub moved: bool,
    /// Records written.
    pub entries_written: u64,
    /// Superseded duplicates dropped.
    pub duplicates_dropped: u64,
}

/// Streams an upper segment and its sinks into new target-level segments.
#[derive(Clone)]
pub struct MergeEngine {
    config: CompactionConfig,
    factory: Arc<dyn SegmentFactory>,
}

impl MergeEngine {
    /// Creates an engine writing through `factory`.
    pub fn new(config: CompactionConfig, factory: Arc<dyn SegmentFactory>) -> Self {
        Self { config, factory }
    }

    /// Returns the engine's configuration.
    #[must_use]
    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Merges `upper` over `sinks` into `target_level`.
    ///
    /// With no sinks the upper segment is returned as is and nothing is
    /// written. Otherwise outputs are cut every `max_entries_per_segment`
    /// records and named `<prefix>/<sequence>_<level>_<counter>.seg`.
    ///
    /// # Errors
    ///
    /// A failing write aborts the whole merge with
    /// [`CoreError::WriterFailure`]. Files already written by this call stay
    /// on disk unreferenced.
    pub fn merge(
        &self,
        upper: &ManifestEntry,
        sinks: &[ManifestEntry],
        target_level: LevelId,
        prefix: &Path,
        sequence: SequenceNumber,
    ) -> CoreResult<MergeOutput> {
        if sinks.is_empty() {
            tracing::debug!(
                file = %upper.filename.display(),
                level = %target_level,
                "no overlap, moving segment"
            );
            return Ok(MergeOutput {
                segments: vec![upper.clone()],
                moved: true,
                entries_written: 0,
                duplicates_dropped: 0,
            });
        }

        let batch = self.config.read_batch_size;
        let open = |entry: &ManifestEntry| {
            SegmentIter::new(entry.segment.cursor(&KeyRange::All), batch)
        };
        let mut merge = MergeIterator::new(open(upper), sinks.iter().map(open).collect())?;

        let mut segments = Vec::new();
        let mut entries_written = 0u64;
        let mut counter = 0u32;
        loop {
            let records = merge.take_batch(self.config.max_entries_per_segment.max(1))?;
            if records.is_empty() {
                break;
            }

            let path = prefix.join(segment_file_name(sequence, target_level, counter));
            match self.factory.create_segment(&path, target_level, &records) {
                Ok(segment) => {
                    tracing::debug!(
                        file = %path.display(),
                        level = %target_level,
                        records = records.len(),
                        "wrote merge output"
                    );
                    entries_written += records.len() as u64;
                    segments.push(ManifestEntry::from_segment(segment));
                }
                Err(e) => {
                    for orphan in &segments {
                        tracing::warn!(
                            file = %orphan.filename.display(),
                            "merge aborted, output file orphaned"
                        );
                    }
                    return Err(CoreError::writer_failure(&path, e.to_string()));
                }
            }
            counter += 1;
        }

        Ok(MergeOutput {
            segments,
            moved: false,
            entries_written,
            duplicates_dropped: merge.dropped(),
        })
    }
}

impl std::fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Runs one compaction round against `item` and builds the next snapshot.
///
/// The source level loses the selected entry. The target level becomes the
/// merge outputs plus every entry the selected one did not overlap. The
/// snapshot version is one past the work item's.
pub fn perform_merge(
    item: &WorkItem,
    selector: &mut dyn CandidateSelector,
    engine: &MergeEngine,
) -> CoreResult<MergeResult> {
    let src = item.src_level;
    let target = item.target_level();
    let base = &item.manifest;

    let (selected, remaining) = selector.select(src, base)?;
    let (sinks, others) = split_overlapping(&selected, base.level(target));
    tracing::debug!(
        file = %selected.filename.display(),
        from = %src,
        to = %target,
        sinks = sinks.len(),
        "selected segment"
    );

    let output = engine.merge(
        &selected,
        &sinks,
        target,
        &item.ledger.segments_dir(),
        item.next_sequence,
    )?;

    let mut target_entries = output.segments.clone();
    target_entries.extend(others);
    let manifest = base
        .with_level(src, remaining)
        .with_level(target, target_entries)
        .with_version(base.version() + 1);
    manifest.validate()?;

    let mut unreferenced = sinks;
    let created = if output.moved {
        Vec::new()
    } else {
        unreferenced.push(selected);
        output.segments
    };

    Ok(MergeResult {
        manifest,
        unreferenced,
        created,
        entries_written: output.entries_written,
        duplicates_dropped: output.duplicates_dropped,
    })
}
