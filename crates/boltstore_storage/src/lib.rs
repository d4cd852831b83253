//! # boltstore Storage
//!
//! Storage backends for the boltstore page file.
//!
//! Backends are **opaque byte stores** addressed by offset. They know nothing
//! about pages, meta records or B+trees; the core crate owns all format
//! interpretation.
//!
//! ## Design Principles
//!
//! - Reads copy bytes out of the backing store, so a concurrent grow/remap
//!   never invalidates data a reader already holds
//! - Writes never extend the store implicitly; callers `grow` first
//! - The store never shrinks
//! - Must be `Send + Sync`: one backend is shared by all transactions
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral databases
//! - [`FileBackend`] - Memory-mapped reads over an OS file
//!
//! ## Example
//!
//! ```rust
//! use boltstore_storage::{StorageBackend, InMemoryBackend};
//!
//! let backend = InMemoryBackend::new();
//! backend.grow(16).unwrap();
//! backend.write_at(4, b"page").unwrap();
//! assert_eq!(backend.read_at(4, 4).unwrap(), b"page");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::{FileBackend, FileBackendConfig, MmapFlags};
pub use memory::InMemoryBackend;
