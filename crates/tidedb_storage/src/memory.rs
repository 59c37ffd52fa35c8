//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// An in-memory storage backend.
///
/// Used for segments that never touch disk: unit tests, merge benchmarks and
/// the in-memory segment factory. A backend built with
/// [`InMemoryBackend::sealed`] rejects appends the same way a read-only
/// [`super::FileBackend`] does.
///
/// # Example
///
/// ```rust
/// use tidedb_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let offset = backend.append(b"test data").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 9);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
    sealed: bool,
}

impl InMemoryBackend {
    /// Creates a new empty, writable backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a read-only backend over existing bytes.
    ///
    /// Useful for feeding hand-crafted or corrupted segment images to a reader.
    #[must_use]
    pub fn sealed(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
            sealed: true,
        }
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        if self.sealed {
            return Err(StorageError::ReadOnly);
        }
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_returns_running_offsets() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"TSEG").unwrap(), 0);
        assert_eq!(backend.append(b"record").unwrap(), 4);
        assert_eq!(backend.size().unwrap(), 10);
        assert_eq!(backend.read_at(4, 6).unwrap(), b"record");
    }

    #[test]
    fn read_past_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello").unwrap();

        assert!(matches!(
            backend.read_at(10, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(matches!(
            backend.read_at(3, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(backend.read_at(5, 0).unwrap().is_empty());
    }

    #[test]
    fn sealed_backend_is_read_only() {
        let mut backend = InMemoryBackend::sealed(b"frozen".to_vec());
        assert_eq!(backend.read_at(0, 6).unwrap(), b"frozen");
        assert!(matches!(backend.append(b"x"), Err(StorageError::ReadOnly)));
        assert_eq!(backend.size().unwrap(), 6);
    }
}
