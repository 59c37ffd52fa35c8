//! # TideDB Storage
//!
//! Storage backend trait and implementations for TideDB.
//!
//! This crate provides the lowest-level storage abstraction for TideDB.
//! Storage backends are **opaque byte stores** - they do not interpret
//! the data they store. Segment files and manifest snapshots are both
//! written through a backend.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral segments
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use tidedb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
