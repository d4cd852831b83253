//! Error types for boltstore core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in boltstore core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] boltstore_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The database handle has been closed.
    #[error("database not open")]
    DatabaseNotOpen,

    /// A write was attempted through a read-only handle.
    #[error("readonly")]
    DatabaseReadOnly,

    /// The file lock could not be acquired within the configured timeout.
    #[error("timeout")]
    Timeout,

    /// Invalid database format.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// The file was written by an incompatible format version.
    #[error("version mismatch: file has version {found}, expected {expected}")]
    VersionMismatch {
        /// Version this build understands.
        expected: u32,
        /// Version found in the meta page.
        found: u32,
    },

    /// Meta page checksum mismatch.
    #[error("checksum mismatch: expected {expected:016x}, got {actual:016x}")]
    ChecksumMismatch {
        /// Checksum stored in the page.
        expected: u64,
        /// Checksum computed over the page.
        actual: u64,
    },

    /// An explicit page size does not match the existing file.
    #[error("page size mismatch: requested {requested}, file uses {actual}")]
    PageSizeMismatch {
        /// Page size from the options.
        requested: usize,
        /// Page size recorded in the meta page.
        actual: usize,
    },

    /// Page size is not a power of two within the supported range.
    #[error("invalid page size: {size}")]
    InvalidPageSize {
        /// The rejected size.
        size: usize,
    },

    /// The transaction has already been committed or rolled back.
    #[error("tx closed")]
    TxClosed,

    /// The bucket does not exist.
    #[error("bucket not found")]
    BucketNotFound,

    /// The bucket already exists.
    #[error("bucket already exists")]
    BucketExists,

    /// A bucket name must not be empty.
    #[error("bucket name required")]
    BucketNameRequired,

    /// A key must not be empty.
    #[error("key required")]
    KeyRequired,

    /// Key exceeds the maximum key size.
    #[error("key too large: {size} bytes (max {max})")]
    KeyTooLarge {
        /// Size of the rejected key.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Value exceeds the maximum value size.
    #[error("value too large: {size} bytes (max {max})")]
    ValueTooLarge {
        /// Size of the rejected value.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// A key refers to a bucket where a plain value was expected, or the
    /// other way around.
    #[error("incompatible value")]
    IncompatibleValue,

    /// A cursor was read without being positioned on an entry.
    #[error("invalid seek")]
    InvalidSeek,

    /// The caller canceled the operation.
    #[error("operation was canceled")]
    Canceled,

    /// The bucket sequence cannot be incremented further.
    #[error("sequence overflow")]
    SequenceOverflow,

    /// On-disk structures are inconsistent.
    #[error("database corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a key too large error.
    pub fn key_too_large(size: usize, max: usize) -> Self {
        Self::KeyTooLarge { size, max }
    }

    /// Creates a value too large error.
    pub fn value_too_large(size: usize, max: usize) -> Self {
        Self::ValueTooLarge { size, max }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canceled_and_seek_messages() {
        assert_eq!(CoreError::Canceled.to_string(), "operation was canceled");
        assert_eq!(CoreError::InvalidSeek.to_string(), "invalid seek");
        assert_eq!(CoreError::DatabaseReadOnly.to_string(), "readonly");
    }

    #[test]
    fn helper_constructors() {
        let err = CoreError::corrupted("page 7 out of bounds");
        assert!(err.to_string().contains("page 7 out of bounds"));

        let err = CoreError::key_too_large(40_000, 32_768);
        assert!(matches!(err, CoreError::KeyTooLarge { size: 40_000, .. }));
    }

    #[test]
    fn io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err: CoreError = io_err.into();
        assert!(matches!(err, CoreError::Io(_)));
    }
}
