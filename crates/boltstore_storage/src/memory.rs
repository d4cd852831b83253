//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// An in-memory storage backend.
///
/// This backend stores all data in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral databases that don't need persistence
///
/// # Example
///
/// ```rust
/// use boltstore_storage::{StorageBackend, InMemoryBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.grow(9).unwrap();
/// backend.write_at(0, b"test data").unwrap();
/// assert_eq!(backend.size().unwrap(), 9);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing data.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        let end = offset.saturating_add(bytes.len() as u64);

        if end > size {
            return Err(StorageError::WritePastEnd {
                offset,
                len: bytes.len(),
                size,
            });
        }

        data[offset as usize..end as usize].copy_from_slice(bytes);
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn grow(&self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        if new_size as usize > data.len() {
            data.resize(new_size as usize, 0);
        }
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        // Nothing to make durable
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.data().is_empty());
    }

    #[test]
    fn memory_grow_zero_fills() {
        let backend = InMemoryBackend::new();
        backend.grow(32).unwrap();
        assert_eq!(backend.size().unwrap(), 32);
        assert!(backend.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn memory_grow_never_shrinks() {
        let backend = InMemoryBackend::with_data(vec![1; 64]);
        backend.grow(8).unwrap();
        assert_eq!(backend.size().unwrap(), 64);
    }

    #[test]
    fn memory_write_then_read() {
        let backend = InMemoryBackend::new();
        backend.grow(16).unwrap();
        backend.write_at(5, b"hello").unwrap();

        assert_eq!(backend.read_at(5, 5).unwrap(), b"hello");
        assert_eq!(backend.read_at(0, 5).unwrap(), vec![0; 5]);
    }

    #[test]
    fn memory_write_past_end_fails() {
        let backend = InMemoryBackend::new();
        backend.grow(4).unwrap();

        let result = backend.write_at(2, b"abc");
        assert!(matches!(result, Err(StorageError::WritePastEnd { .. })));
    }

    #[test]
    fn memory_read_past_end_fails() {
        let backend = InMemoryBackend::with_data(b"hello".to_vec());

        assert!(matches!(
            backend.read_at(10, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(matches!(
            backend.read_at(3, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn memory_empty_read() {
        let backend = InMemoryBackend::with_data(b"hello".to_vec());
        assert!(backend.read_at(2, 0).unwrap().is_empty());
    }

    #[test]
    fn memory_sync_succeeds() {
        let backend = InMemoryBackend::new();
        assert!(backend.sync().is_ok());
    }

    proptest! {
        #[test]
        fn prop_write_read_at_any_offset(
            offset in 0u64..512,
            bytes in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            let backend = InMemoryBackend::new();
            backend.grow(offset + bytes.len() as u64).unwrap();
            backend.write_at(offset, &bytes).unwrap();
            prop_assert_eq!(backend.read_at(offset, bytes.len()).unwrap(), bytes);
        }
    }
}
