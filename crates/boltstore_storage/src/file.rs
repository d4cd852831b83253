//! Memory-mapped file storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use memmap2::{Mmap, MmapOptions};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::ops::BitOr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Platform mmap flags passed through to the mapping.
///
/// The raw bits follow the Linux `mmap(2)` values. Only the bits the mapping
/// layer can express are honored; unknown bits are carried but ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MmapFlags(u32);

impl MmapFlags {
    /// No flags.
    pub const NONE: Self = Self(0);

    /// Pre-fault the whole mapping (`MAP_POPULATE`).
    pub const POPULATE: Self = Self(0x8000);

    /// Creates flags from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MmapFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Mapping and growth behavior of a [`FileBackend`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FileBackendConfig {
    /// Reject writes and growth.
    pub read_only: bool,
    /// Skip the fsync after extending the file.
    pub no_grow_sync: bool,
    /// Flags applied to every (re)map.
    pub mmap_flags: MmapFlags,
    /// Lock mapped pages into physical memory (unix only).
    pub mlock: bool,
}

/// A file-based storage backend with memory-mapped reads.
///
/// Reads copy out of a read-only shared mapping of the whole file. Writes go
/// through the file handle, which the shared mapping observes. Growing the
/// file replaces the mapping; the old one is kept alive by any reader that
/// still holds its `Arc` and is unmapped once the last holder drops it.
///
/// # Durability
///
/// - `sync()` calls `File::sync_data()`
/// - `grow()` calls `File::sync_all()` after extending unless
///   `no_grow_sync` is set
///
/// # Example
///
/// ```no_run
/// use boltstore_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("data.db")).unwrap();
/// backend.grow(4096).unwrap();
/// backend.write_at(0, b"persistent data").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    map: RwLock<Option<Arc<Mmap>>>,
    size: RwLock<u64>,
    config: FileBackendConfig,
}

impl FileBackend {
    /// Opens or creates a read-write file backend at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, created or mapped.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::from_file(path, file, FileBackendConfig::default())
    }

    /// Wraps an already opened file.
    ///
    /// The file must be readable, and writable unless `config.read_only`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file metadata cannot be read or the mapping
    /// fails.
    pub fn from_file(path: &Path, file: File, config: FileBackendConfig) -> StorageResult<Self> {
        let size = file.metadata()?.len();
        let map = map_file(&file, size, &config)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            map: RwLock::new(map),
            size: RwLock::new(size),
            config,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the backend configuration.
    #[must_use]
    pub fn config(&self) -> &FileBackendConfig {
        &self.config
    }

    /// Returns the length of the current mapping in bytes.
    #[must_use]
    pub fn mapped_len(&self) -> usize {
        self.map.read().as_ref().map_or(0, |map| map.len())
    }
}

/// Maps `len` bytes of `file`. A zero-length file has no mapping.
#[allow(unsafe_code)]
fn map_file(file: &File, len: u64, config: &FileBackendConfig) -> StorageResult<Option<Arc<Mmap>>> {
    if len == 0 {
        return Ok(None);
    }

    let mut options = MmapOptions::new();
    options.len(len as usize);
    if config.mmap_flags.contains(MmapFlags::POPULATE) {
        options.populate();
    }

    // SAFETY: the mapping is read-only and never outlives the `Arc` that
    // owns it. The file is only written by this process through positioned
    // writes inside the mapped length (guarded by `size`), and the engine
    // holds an OS file lock that excludes other writers. The file never
    // shrinks, so the mapped range stays backed.
    let map = unsafe { options.map(file)? };

    #[cfg(unix)]
    if config.mlock {
        map.lock()?;
    }

    Ok(Some(Arc::new(map)))
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let map = self.map.read();
        match map.as_ref() {
            Some(map) => Ok(map[offset as usize..end as usize].to_vec()),
            None => Err(StorageError::ReadPastEnd { offset, len, size }),
        }
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()> {
        if self.config.read_only {
            return Err(StorageError::ReadOnly);
        }

        let size = *self.size.read();
        let end = offset.saturating_add(data.len() as u64);
        if end > size {
            return Err(StorageError::WritePastEnd {
                offset,
                len: data.len(),
                size,
            });
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn grow(&self, new_size: u64) -> StorageResult<()> {
        if self.config.read_only {
            return Err(StorageError::ReadOnly);
        }

        let file = self.file.write();
        let mut size = self.size.write();
        if new_size <= *size {
            return Ok(());
        }

        file.set_len(new_size)?;
        if !self.config.no_grow_sync {
            file.sync_all()?;
        }

        let remapped = map_file(&file, new_size, &self.config)?;
        *self.map.write() = remapped;
        *size = new_size;

        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        let file = self.file.read();
        file.sync_data()?;
        Ok(())
    }
}
