//! Database configuration.
//!
//! Options can be set two ways: with the [`Options`] builder, or as a list
//! of [`OpenOption`] values handed to [`open`]. A list is applied in order
//! and a later value for the same field silently replaces an earlier one.
//!
//! ```rust,no_run
//! use boltstore_core::{open, OpenOption};
//! use std::time::Duration;
//!
//! let db = open(
//!     "data.db",
//!     0o600,
//!     [
//!         OpenOption::Timeout(Duration::from_secs(1)),
//!         OpenOption::PageSize(4096),
//!         OpenOption::NoSync,
//!     ],
//! )?;
//! # Ok::<(), boltstore_core::CoreError>(())
//! ```

use crate::database::Db;
use crate::error::CoreResult;
use crate::page::DEFAULT_PAGE_SIZE;
use boltstore_storage::MmapFlags;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// How the database file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read only; the file must exist.
    ReadOnly,
    /// Read and write; the file is created if missing.
    ReadWrite,
}

/// Function used to open the database file.
///
/// Receives the path, the access mode and the permission bits for a newly
/// created file.
pub type OpenFileFn = Arc<dyn Fn(&Path, AccessMode, u32) -> io::Result<File> + Send + Sync>;

/// Free page index encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum FreelistType {
    /// Sorted array. Simple, but allocation degrades when the freelist is
    /// large and fragmented.
    #[default]
    Array,
    /// Span maps. Faster in almost all cases, but does not guarantee the
    /// smallest free page id.
    HashMap,
}

/// Configuration for opening a database.
#[derive(Clone)]
pub struct Options {
    /// How long to wait for the file lock. Zero waits indefinitely.
    pub timeout: Duration,

    /// Skip the fsync after growing the file.
    pub no_grow_sync: bool,

    /// Do not persist the freelist. Commits get faster, but the next open
    /// has to rebuild it by scanning the whole database.
    pub no_freelist_sync: bool,

    /// Free page index encoding.
    pub freelist_type: FreelistType,

    /// Open with a shared lock and reject every write.
    pub read_only: bool,

    /// Flags passed through to the memory mapping.
    pub mmap_flags: MmapFlags,

    /// Initial file size in bytes; pre-growing avoids remaps during early
    /// writes. Ignored when smaller than the file.
    pub initial_mmap_size: usize,

    /// Page size for a new file. Zero uses the default; a non-zero value
    /// must match the page size of an existing file.
    pub page_size: usize,

    /// Skip fsync after commit.
    pub no_sync: bool,

    /// Replacement for the file-open primitive.
    pub open_file: Option<OpenFileFn>,

    /// Lock mapped pages into physical memory (unix only).
    pub mlock: bool,

    /// Separator between bucket names in path-style keys.
    pub bucket_separator: u8,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            no_grow_sync: false,
            no_freelist_sync: false,
            freelist_type: FreelistType::Array,
            read_only: false,
            mmap_flags: MmapFlags::NONE,
            initial_mmap_size: 0,
            page_size: 0,
            no_sync: false,
            open_file: None,
            mlock: false,
            bucket_separator: b':',
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("timeout", &self.timeout)
            .field("no_grow_sync", &self.no_grow_sync)
            .field("no_freelist_sync", &self.no_freelist_sync)
            .field("freelist_type", &self.freelist_type)
            .field("read_only", &self.read_only)
            .field("mmap_flags", &self.mmap_flags)
            .field("initial_mmap_size", &self.initial_mmap_size)
            .field("page_size", &self.page_size)
            .field("no_sync", &self.no_sync)
            .field("open_file", &self.open_file.as_ref().map(|_| "<fn>"))
            .field("mlock", &self.mlock)
            .field("bucket_separator", &char::from(self.bucket_separator))
            .finish()
    }
}

impl Options {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the file lock timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets whether to skip the fsync after growing the file.
    #[must_use]
    pub const fn no_grow_sync(mut self, value: bool) -> Self {
        self.no_grow_sync = value;
        self
    }

    /// Sets whether to skip persisting the freelist.
    #[must_use]
    pub const fn no_freelist_sync(mut self, value: bool) -> Self {
        self.no_freelist_sync = value;
        self
    }

    /// Sets the freelist encoding.
    #[must_use]
    pub const fn freelist_type(mut self, kind: FreelistType) -> Self {
        self.freelist_type = kind;
        self
    }

    /// Sets read-only mode.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets the mmap flags.
    #[must_use]
    pub const fn mmap_flags(mut self, flags: MmapFlags) -> Self {
        self.mmap_flags = flags;
        self
    }

    /// Sets the initial file size.
    #[must_use]
    pub const fn initial_mmap_size(mut self, size: usize) -> Self {
        self.initial_mmap_size = size;
        self
    }

    /// Sets the page size for a new file.
    #[must_use]
    pub const fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Sets whether to skip fsync after commit.
    #[must_use]
    pub const fn no_sync(mut self, value: bool) -> Self {
        self.no_sync = value;
        self
    }

    /// Sets the file-open function.
    #[must_use]
    pub fn open_file(mut self, open_file: OpenFileFn) -> Self {
        self.open_file = Some(open_file);
        self
    }

    /// Sets whether to lock mapped pages in memory.
    #[must_use]
    pub const fn mlock(mut self, value: bool) -> Self {
        self.mlock = value;
        self
    }

    /// Sets the bucket path separator.
    #[must_use]
    pub const fn bucket_separator(mut self, separator: u8) -> Self {
        self.bucket_separator = separator;
        self
    }

    /// Page size to use for a new file.
    pub(crate) fn effective_page_size(&self) -> usize {
        if self.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.page_size
        }
    }
}

/// A single named option, applied to [`Options`] in list order.
#[derive(Clone)]
pub enum OpenOption {
    /// Does nothing.
    Nope,
    /// Sets the file lock timeout; zero waits indefinitely.
    Timeout(Duration),
    /// Sets the timeout to zero (wait indefinitely).
    ///
    /// The duration is ignored. The name suggests it should bound the wait,
    /// but the effect has always been an unbounded wait and is kept as is.
    IndefiniteTimeout(Duration),
    /// Skip the fsync after growing the file.
    NoGrowSync,
    /// Do not persist the freelist.
    NoFreelistSync,
    /// Selects the freelist encoding. Also turns freelist persistence back
    /// on, undoing an earlier [`OpenOption::NoFreelistSync`].
    FreelistType(FreelistType),
    /// Open read-only with a shared lock.
    ReadOnly,
    /// Flags for the memory mapping.
    MmapFlags(MmapFlags),
    /// Initial file size in bytes.
    InitialMmapSize(usize),
    /// Page size for a new file.
    PageSize(usize),
    /// Skip fsync after commit.
    NoSync,
    /// Replacement for the file-open primitive.
    OpenFile(OpenFileFn),
    /// Lock mapped pages in memory.
    Mlock,
    /// Separator for path-style bucket keys.
    BucketSeparator(u8),
}

impl fmt::Debug for OpenOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nope => f.write_str("Nope"),
            Self::Timeout(d) => f.debug_tuple("Timeout").field(d).finish(),
            Self::IndefiniteTimeout(d) => f.debug_tuple("IndefiniteTimeout").field(d).finish(),
            Self::NoGrowSync => f.write_str("NoGrowSync"),
            Self::NoFreelistSync => f.write_str("NoFreelistSync"),
            Self::FreelistType(t) => f.debug_tuple("FreelistType").field(t).finish(),
            Self::ReadOnly => f.write_str("ReadOnly"),
            Self::MmapFlags(m) => f.debug_tuple("MmapFlags").field(m).finish(),
            Self::InitialMmapSize(n) => f.debug_tuple("InitialMmapSize").field(n).finish(),
            Self::PageSize(n) => f.debug_tuple("PageSize").field(n).finish(),
            Self::NoSync => f.write_str("NoSync"),
            Self::OpenFile(_) => f.write_str("OpenFile(<fn>)"),
            Self::Mlock => f.write_str("Mlock"),
            Self::BucketSeparator(b) => f.debug_tuple("BucketSeparator").field(b).finish(),
        }
    }
}

impl OpenOption {
    /// Applies this option to `options`.
    pub fn apply(self, options: &mut Options) {
        match self {
            Self::Nope => {}
            Self::Timeout(timeout) => options.timeout = timeout,
            Self::IndefiniteTimeout(_) => options.timeout = Duration::ZERO,
            Self::NoGrowSync => options.no_grow_sync = true,
            Self::NoFreelistSync => options.no_freelist_sync = true,
            Self::FreelistType(kind) => {
                options.no_freelist_sync = false;
                options.freelist_type = kind;
            }
            Self::ReadOnly => options.read_only = true,
            Self::MmapFlags(flags) => options.mmap_flags = flags,
            Self::InitialMmapSize(size) => options.initial_mmap_size = size,
            Self::PageSize(size) => options.page_size = size,
            Self::NoSync => options.no_sync = true,
            Self::OpenFile(open_file) => options.open_file = Some(open_file),
            Self::Mlock => options.mlock = true,
            Self::BucketSeparator(separator) => options.bucket_separator = separator,
        }
    }
}

impl FromIterator<OpenOption> for Options {
    fn from_iter<I: IntoIterator<Item = OpenOption>>(iter: I) -> Self {
        let mut options = Options::default();
        for option in iter {
            option.apply(&mut options);
        }
        options
    }
}

/// Opens the database at `path`, applying `options` in order.
///
/// `mode` holds the permission bits used when the file is created.
///
/// # Errors
///
/// Fails without retrying on I/O errors, lock timeout, a corrupt or
/// incompatible file, or a page size that conflicts with the file.
pub fn open(
    path: impl AsRef<Path>,
    mode: u32,
    options: impl IntoIterator<Item = OpenOption>,
) -> CoreResult<Db> {
    Db::open(path, mode, options.into_iter().collect())
}

/// Opens a file the way the engine does when no [`OpenFileFn`] is set.
///
/// # Errors
///
/// Returns the underlying I/O error.
pub fn default_open_file(path: &Path, access: AccessMode, mode: u32) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true);
    if access == AccessMode::ReadWrite {
        options.write(true).create(true).truncate(false);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    options.open(path)
}
