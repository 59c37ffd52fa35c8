//! Ledger directory management.
//!
//! This module handles the file system layout of one TideDB ledger:
//!
//! ```text
//! <ledger>/
//! ├─ LOCK                              # Advisory lock for a single owner
//! ├─ manifest/
//! │  └─ 00000000000000000042.man       # One snapshot per manifest update
//! └─ segments/
//!    └─ 42_1_0.seg                     # <sequence>_<level>_<counter>.seg
//! ```
//!
//! Snapshot and segment names embed a monotonically increasing sequence
//! number, so every update writes files that did not exist before.

use crate::error::{CoreError, CoreResult};
use crate::manifest::Manifest;
use crate::types::{LevelId, SequenceNumber};
use fs2::FileExt;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const MANIFEST_DIR: &str = "manifest";
const SEGMENTS_DIR: &str = "segments";
const MANIFEST_EXT: &str = "man";
const SEGMENT_EXT: &str = "seg";

/// Owns the ledger directory and its advisory lock.
///
/// Only one `LedgerDir` can exist per directory at a time.
#[derive(Debug)]
pub struct LedgerDir {
    path: PathBuf,
    _lock_file: File,
}

impl LedgerDir {
    /// Opens or creates a ledger directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `LedgerLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "ledger directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::LedgerLocked);
        }

        fs::create_dir_all(path.join(MANIFEST_DIR))?;
        fs::create_dir_all(path.join(SEGMENTS_DIR))?;

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the ledger root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the directory holding manifest snapshots.
    #[must_use]
    pub fn manifest_dir(&self) -> PathBuf {
        self.path.join(MANIFEST_DIR)
    }

    /// Returns the directory holding segment files.
    #[must_use]
    pub fn segments_dir(&self) -> PathBuf {
        self.path.join(SEGMENTS_DIR)
    }

    /// Path of the manifest snapshot written for `sequence`.
    #[must_use]
    pub fn manifest_path(&self, sequence: SequenceNumber) -> PathBuf {
        self.manifest_dir()
            .join(format!("{:020}.{MANIFEST_EXT}", sequence.as_u64()))
    }

    /// Path of the `counter`-th output file of the merge numbered `sequence`.
    #[must_use]
    pub fn segment_path(&self, sequence: SequenceNumber, level: LevelId, counter: u32) -> PathBuf {
        self.segments_dir()
            .join(segment_file_name(sequence, level, counter))
    }

    /// Lists manifest snapshots, oldest first.
    pub fn list_manifests(&self) -> CoreResult<Vec<(SequenceNumber, PathBuf)>> {
        let mut found = Vec::new();
        for dirent in fs::read_dir(self.manifest_dir())? {
            let path = dirent?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(MANIFEST_EXT) {
                continue;
            }
            let Some(seq) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            else {
                continue;
            };
            found.push((SequenceNumber::new(seq), path));
        }
        found.sort_by_key(|(seq, _)| *seq);
        Ok(found)
    }

    /// Removes snapshots older than `sequence`. Returns how many were removed.
    ///
    /// Older snapshots may reference segments that were already deleted, so
    /// they are useless once a newer one is durable.
    pub fn remove_manifests_before(&self, sequence: SequenceNumber) -> CoreResult<usize> {
        let mut removed = 0;
        for (seq, path) in self.list_manifests()? {
            if seq >= sequence {
                break;
            }
            fs::remove_file(&path)?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Lists every segment file in the ledger.
    pub fn list_segment_files(&self) -> CoreResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for dirent in fs::read_dir(self.segments_dir())? {
            let path = dirent?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(SEGMENT_EXT) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Returns the highest sequence number used by any file in the ledger.
    pub fn highest_sequence(&self) -> CoreResult<SequenceNumber> {
        let manifests = self
            .list_manifests()?
            .last()
            .map_or(0, |(seq, _)| seq.as_u64());
        let segments = self
            .list_segment_files()?
            .iter()
            .filter_map(|path| segment_sequence(path))
            .max()
            .unwrap_or(0);
        Ok(SequenceNumber::new(manifests.max(segments)))
    }

    /// Segment files not referenced by `manifest`.
    ///
    /// These are left behind by rejected swaps, failed merges, or crashes
    /// between writing outputs and publishing them.
    pub fn find_orphans(&self, manifest: &Manifest) -> CoreResult<Vec<PathBuf>> {
        let live: HashSet<&Path> = manifest
            .entries()
            .map(|entry| entry.filename.as_path())
            .collect();
        Ok(self
            .list_segment_files()?
            .into_iter()
            .filter(|path| !live.contains(path.as_path()))
            .collect())
    }

    /// Syncs the manifest directory so new snapshot names are durable.
    #[cfg(unix)]
    pub fn sync_manifest_dir(&self) -> CoreResult<()> {
        File::open(self.manifest_dir())?.sync_all()?;
        Ok(())
    }

    /// Syncs the manifest directory so new snapshot names are durable.
    #[cfg(not(unix))]
    pub fn sync_manifest_dir(&self) -> CoreResult<()> {
        // NTFS journals metadata; directory handles cannot be fsynced.
        Ok(())
    }
}

/// File name of the `counter`-th segment written at `level` by update `sequence`.
#[must_use]
pub fn segment_file_name(sequence: SequenceNumber, level: LevelId, counter: u32) -> String {
    format!(
        "{}_{}_{counter}.{SEGMENT_EXT}",
        sequence.as_u64(),
        level.as_u32()
    )
}

fn segment_sequence(path: &Path) -> Option<u64> {
    path.file_stem()?
        .to_str()?
        .split('_')
        .next()?
        .parse()
        .ok()
}
