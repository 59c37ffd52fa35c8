//! Error types for TideDB core.

use crate::types::LevelId;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in TideDB core operations.
///
/// An idle level is not an error: the owner reports it as
/// [`crate::compaction::WorkResponse::Idle`].
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tidedb_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Segment is corrupted or invalid.
    #[error("segment corruption: {message}")]
    SegmentCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Invalid file format or version.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// The source level of a compaction had no segments to pick from.
    #[error("no segments to select at level {level}")]
    SelectionEmpty {
        /// The level that was empty.
        level: LevelId,
    },

    /// Writing an output segment failed mid-merge.
    #[error("segment writer failed for {}: {message}", path.display())]
    WriterFailure {
        /// Output file that could not be written.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// The owner declined the manifest change.
    #[error("manifest swap rejected: {reason}")]
    ManifestSwapRejected {
        /// Why the owner declined.
        reason: String,
    },

    /// A manifest snapshot could not be made durable.
    #[error("failed to persist manifest {}: {message}", path.display())]
    ManifestPersistFailure {
        /// Snapshot path.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// Another process holds the ledger lock.
    #[error("ledger locked: another process has exclusive access")]
    LedgerLocked,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a segment corruption error.
    pub fn segment_corruption(message: impl Into<String>) -> Self {
        Self::SegmentCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a writer failure error.
    pub fn writer_failure(path: &Path, message: impl Into<String>) -> Self {
        Self::WriterFailure {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    /// Creates a manifest swap rejection.
    pub fn swap_rejected(reason: impl Into<String>) -> Self {
        Self::ManifestSwapRejected {
            reason: reason.into(),
        }
    }

    /// Creates a manifest persist failure.
    pub fn persist_failure(path: &Path, message: impl Into<String>) -> Self {
        Self::ManifestPersistFailure {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
