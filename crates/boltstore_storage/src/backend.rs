//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level storage backend for the page file.
///
/// Storage backends are **opaque byte stores**. The core crate lays pages out
/// at `pgid * page_size` and drives the backend with positioned reads and
/// writes; backends do not understand pages, meta records or freelists.
///
/// All methods take `&self`. Implementations use interior locking so that a
/// single backend can serve concurrent readers and the single writer.
///
/// # Invariants
///
/// - `read_at` returns exactly the bytes last written at that offset
/// - `write_at` never extends the store; `grow` must be called first
/// - `grow` never shrinks the store
/// - `sync` makes every completed `write_at` durable
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends beyond the current size or an
    /// I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Writes `data` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends beyond the current size, the
    /// backend is read-only, or an I/O error occurs.
    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Grows the storage to `new_size` bytes, zero-filling the new region.
    ///
    /// A `new_size` at or below the current size is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is read-only or the resize fails.
    fn grow(&self, new_size: u64) -> StorageResult<()>;

    /// Flushes all completed writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&self) -> StorageResult<()>;
}
