//! # TideDB Testkit
//!
//! Test utilities for TideDB.
//!
//! This crate provides:
//! - Temporary ledgers and segment builders
//! - Property-based generators for merge inputs
//! - A recording compaction owner for handshake tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tidedb_testkit::prelude::*;
//!
//! #[test]
//! fn merge_into_level_one() {
//!     let mut ledger = TestLedger::new();
//!     let upper = ledger.file_entry(LevelId::new(0), 0..100, "new");
//!     // ...
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod owner;

use tracing_subscriber::EnvFilter;

/// Installs a test log subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use crate::owner::*;
    pub use tidedb_core::{
        CompactionConfig, LevelId, Manifest, ManifestEntry, SegmentRecord, SequenceNumber,
    };
}

pub use fixtures::*;
pub use generators::*;
pub use owner::*;
