//! Database handle and page file management.

use crate::check::{self, IntegrityIssue};
use crate::config::{default_open_file, AccessMode, FreelistType, Options};
use crate::error::{CoreError, CoreResult};
use crate::freelist::Freelist;
use crate::lock::FileLock;
use crate::node::Node;
use crate::page::{
    is_valid_page_size, BucketHeader, Meta, PageHeader, FREELIST_NONE, MAX_PAGE_SIZE, META_SIZE,
    MIN_PAGE_SIZE, PAGE_HEADER_SIZE,
};
use crate::stats::{DatabaseStats, StatsSnapshot};
use crate::transaction::{ReadTx, WriteTx};
use crate::types::{PageId, TransactionId};
use boltstore_storage::{FileBackend, FileBackendConfig, InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Largest step the file grows by once it is past 1 GiB.
const MAX_MMAP_STEP: u64 = 1 << 30;

/// Largest supported file size.
const MAX_MAP_SIZE: u64 = 0xFFFF_FFFF_FFFF;

/// An open database.
///
/// `Db` owns the page file and coordinates transactions: one
/// [`WriteTx`] at a time alongside any number of [`ReadTx`]. It is
/// `Send + Sync` and is usually shared behind an `Arc`.
///
/// # Opening
///
/// ```rust,no_run
/// use boltstore_core::{Db, Options};
/// use std::time::Duration;
///
/// let db = Db::open("data.db", 0o600, Options::default().timeout(Duration::from_secs(1)))?;
///
/// db.update(|tx| tx.put_path(b"users:1", b"alice"))?;
/// let name = db.view(|tx| tx.get_path(b"users:1"))?;
/// assert_eq!(name.as_deref(), Some(&b"alice"[..]));
///
/// db.close()?;
/// # Ok::<(), boltstore_core::CoreError>(())
/// ```
///
/// # In-Memory Databases
///
/// ```rust
/// let db = boltstore_core::Db::open_in_memory(Default::default())?;
/// # Ok::<(), boltstore_core::CoreError>(())
/// ```
pub struct Db {
    /// File path. None for in-memory databases.
    path: Option<PathBuf>,
    options: Options,
    /// Page size of the file, fixed at creation.
    page_size: usize,
    backend: Box<dyn StorageBackend>,
    /// OS lock on the file, released on close.
    file_lock: Mutex<Option<FileLock>>,
    /// Meta of the last commit.
    meta: RwLock<Meta>,
    freelist: Mutex<Freelist>,
    /// False when the freelist was neither persisted nor rebuilt.
    freelist_loaded: bool,
    /// Snapshot txids of open read transactions.
    readers: Mutex<Vec<TransactionId>>,
    /// Held by the write transaction.
    writer: Mutex<()>,
    stats: DatabaseStats,
    no_sync: AtomicBool,
    is_open: RwLock<bool>,
}

/// Summary of an open database.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DbInfo {
    /// File path, None when in memory.
    pub path: Option<PathBuf>,
    /// Page size in bytes.
    pub page_size: usize,
    /// Id of the last commit.
    pub txid: u64,
    /// First page id never allocated.
    pub high_water: PageId,
    /// Size of the page file in bytes.
    pub file_size: u64,
    /// Freelist encoding in use.
    pub freelist_type: FreelistType,
    /// Whether the handle rejects writes.
    pub read_only: bool,
}

impl Db {
    /// Opens or creates the database file at `path`.
    ///
    /// `mode` holds the permission bits for a newly created file. The file
    /// is locked for the lifetime of the handle: shared when
    /// `options.read_only`, exclusive otherwise.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Timeout`] if the lock is not granted within
    ///   `options.timeout`
    /// - [`CoreError::DatabaseReadOnly`] when opening an empty file read-only
    /// - [`CoreError::InvalidPageSize`] / [`CoreError::PageSizeMismatch`]
    ///   for a bad or conflicting `options.page_size`
    /// - format errors for a file that is not a database or is corrupt
    /// - I/O errors
    pub fn open(path: impl AsRef<Path>, mode: u32, options: Options) -> CoreResult<Self> {
        let path = path.as_ref();
        let access = if options.read_only {
            AccessMode::ReadOnly
        } else {
            AccessMode::ReadWrite
        };

        let file = match &options.open_file {
            Some(open_file) => open_file(path, access, mode)?,
            None => default_open_file(path, access, mode)?,
        };
        let lock = FileLock::acquire(file, !options.read_only, options.timeout)?;

        let config = FileBackendConfig {
            read_only: options.read_only,
            no_grow_sync: options.no_grow_sync,
            mmap_flags: options.mmap_flags,
            mlock: options.mlock,
        };
        let backend = FileBackend::from_file(path, lock.file().try_clone()?, config)?;

        let db = Self::from_backend(
            Box::new(backend),
            Some(path.to_path_buf()),
            options,
            Some(lock),
        )?;
        debug!(
            path = %path.display(),
            page_size = db.page_size,
            txid = %db.meta.read().txid,
            read_only = db.options.read_only,
            "Opened database"
        );
        Ok(db)
    }

    /// Creates a database held entirely in memory.
    pub fn open_in_memory(options: Options) -> CoreResult<Self> {
        Self::from_backend(Box::new(InMemoryBackend::new()), None, options, None)
    }

    fn from_backend(
        backend: Box<dyn StorageBackend>,
        path: Option<PathBuf>,
        options: Options,
        file_lock: Option<FileLock>,
    ) -> CoreResult<Self> {
        if options.page_size != 0 && !is_valid_page_size(options.page_size) {
            return Err(CoreError::InvalidPageSize {
                size: options.page_size,
            });
        }

        if backend.size()? == 0 {
            if options.read_only {
                return Err(CoreError::DatabaseReadOnly);
            }
            init(backend.as_ref(), options.effective_page_size())?;
        }

        let meta = load_meta(backend.as_ref())?;
        let page_size = meta.page_size as usize;
        if options.page_size != 0 && options.page_size != page_size {
            return Err(CoreError::PageSizeMismatch {
                requested: options.page_size,
                actual: page_size,
            });
        }

        if !options.read_only && options.initial_mmap_size > 0 {
            let target = mmap_size(options.initial_mmap_size as u64, page_size)?;
            if target > backend.size()? {
                backend.grow(target)?;
            }
        }

        let size = backend.size()?;
        if size < meta.pgid * page_size as u64 {
            return Err(CoreError::corrupted(format!(
                "file is {size} bytes but the high-water mark is page {}",
                meta.pgid
            )));
        }

        let pages = PageReader {
            backend: backend.as_ref(),
            page_size,
        };
        let mut freelist = Freelist::new(options.freelist_type);
        let mut freelist_loaded = true;
        if meta.freelist != FREELIST_NONE {
            let (page, _) = pages.page(meta.freelist)?;
            freelist.read(&page)?;
        } else if !options.read_only {
            warn!("Freelist not persisted, rebuilding from the page tree");
            let free = check::unreachable_pages(&pages, &meta)
                .map_err(|issue| CoreError::corrupted(format!("freelist rebuild: {issue}")))?;
            freelist.reload(&free);
        } else {
            freelist_loaded = false;
        }

        let no_sync = AtomicBool::new(options.no_sync);
        Ok(Self {
            path,
            options,
            page_size,
            backend,
            file_lock: Mutex::new(file_lock),
            meta: RwLock::new(meta),
            freelist: Mutex::new(freelist),
            freelist_loaded,
            readers: Mutex::new(Vec::new()),
            writer: Mutex::new(()),
            stats: DatabaseStats::new(),
            no_sync,
            is_open: RwLock::new(true),
        })
    }

    /// Closes the database and releases the file lock.
    ///
    /// Closing twice is a no-op. Later transactions fail with
    /// [`CoreError::DatabaseNotOpen`]; a write transaction still running
    /// fails to commit with [`CoreError::TxClosed`].
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        *is_open = false;

        if !self.options.read_only {
            self.backend.sync()?;
        }
        if let Some(lock) = self.file_lock.lock().take() {
            debug!(exclusive = lock.is_exclusive(), "Released database file lock");
        }
        debug!(path = ?self.path, "Closed database");
        Ok(())
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::DatabaseNotOpen)
        }
    }

    /// Starts a read transaction on the latest commit.
    pub fn begin_read(&self) -> CoreResult<ReadTx<'_>> {
        self.ensure_open()?;

        // The reader must be registered before a writer can observe the
        // meta it pins.
        let mut readers = self.readers.lock();
        let meta = *self.meta.read();
        readers.push(meta.txid);
        drop(readers);

        self.stats.record_read_tx_start();
        Ok(ReadTx::new(self, meta))
    }

    /// Starts the write transaction, waiting for the current one to finish.
    ///
    /// # Errors
    ///
    /// [`CoreError::DatabaseReadOnly`] on a read-only handle.
    pub fn begin_write(&self) -> CoreResult<WriteTx<'_>> {
        self.ensure_open()?;
        if self.options.read_only {
            return Err(CoreError::DatabaseReadOnly);
        }

        let writer = self.writer.lock();
        self.ensure_open()?;
        let meta = *self.meta.read();
        self.release_pending();

        self.stats.record_write_tx_start();
        debug!(txid = %meta.txid.next(), "Began write transaction");
        Ok(WriteTx::new(self, writer, meta))
    }

    /// Runs `f` in a read transaction.
    pub fn view<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&ReadTx<'_>) -> CoreResult<T>,
    {
        let tx = self.begin_read()?;
        f(&tx)
    }

    /// Runs `f` in a write transaction, committing if it returns `Ok` and
    /// rolling back otherwise.
    ///
    /// Returning [`CoreError::Canceled`] from `f` is the way to abandon the
    /// transaction on purpose.
    pub fn update<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut WriteTx<'_>) -> CoreResult<T>,
    {
        let mut tx = self.begin_write()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }

    /// Returns a snapshot of the statistics.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        let mut snapshot = self.stats.snapshot();
        let freelist = self.freelist.lock();
        snapshot.free_pages = freelist.free_count();
        snapshot.pending_pages = freelist.pending_count();
        snapshot
    }

    /// Returns a summary of the database.
    pub fn info(&self) -> CoreResult<DbInfo> {
        let meta = *self.meta.read();
        Ok(DbInfo {
            path: self.path.clone(),
            page_size: self.page_size,
            txid: meta.txid.as_u64(),
            high_water: meta.pgid,
            file_size: self.backend.size()?,
            freelist_type: self.freelist.lock().kind(),
            read_only: self.options.read_only,
        })
    }

    /// Checks the consistency of the latest commit.
    ///
    /// Waits for the write transaction, so it must not be called from a
    /// thread holding one. Free-page checks are skipped on a read-only
    /// handle whose freelist was not persisted.
    pub fn check(&self) -> CoreResult<Vec<IntegrityIssue>> {
        self.ensure_open()?;
        let _writer = self.writer.lock();
        let meta = *self.meta.read();
        let free = self
            .freelist_loaded
            .then(|| self.freelist.lock().all_ids());
        Ok(check::check(&self.pages(), &meta, free))
    }

    /// Returns true if the handle was opened read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.options.read_only
    }

    /// Turns fsync after commit off or on.
    pub fn set_no_sync(&self, no_sync: bool) {
        self.no_sync.store(no_sync, Ordering::Relaxed);
    }

    /// File path, None when in memory.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Page size of the file.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub(crate) fn options(&self) -> &Options {
        &self.options
    }

    pub(crate) fn stats_counters(&self) -> &DatabaseStats {
        &self.stats
    }

    pub(crate) fn freelist(&self) -> &Mutex<Freelist> {
        &self.freelist
    }

    pub(crate) fn open_guard(&self) -> RwLockReadGuard<'_, bool> {
        self.is_open.read()
    }

    pub(crate) fn pages(&self) -> PageReader<'_> {
        PageReader {
            backend: self.backend.as_ref(),
            page_size: self.page_size,
        }
    }

    pub(crate) fn unregister_reader(&self, txid: TransactionId) {
        let mut readers = self.readers.lock();
        if let Some(pos) = readers.iter().position(|&t| t == txid) {
            readers.swap_remove(pos);
        }
        drop(readers);
        self.stats.record_read_tx_end();
    }

    /// Moves pending pages that no open reader can see to the free index.
    ///
    /// A page freed by commit `t` is still visible to readers of snapshots
    /// before `t`, so only the gaps between open readers are released.
    fn release_pending(&self) {
        let mut readers = self.readers.lock().clone();
        readers.sort_unstable();
        readers.dedup();

        let mut freelist = self.freelist.lock();
        let mut min = readers
            .first()
            .copied()
            .unwrap_or(TransactionId::new(u64::MAX));
        if min.as_u64() > 0 {
            freelist.release(TransactionId::new(min.as_u64() - 1));
        }
        for &reader in &readers {
            if reader.as_u64() > 0 {
                freelist.release_range(min, TransactionId::new(reader.as_u64() - 1));
            }
            min = TransactionId::new(reader.as_u64().saturating_add(1));
        }
        freelist.release_range(min, TransactionId::new(u64::MAX));
    }

    /// Writes committed pages, growing the file to cover `high_water`.
    pub(crate) fn write_pages(
        &self,
        pages: &BTreeMap<PageId, Vec<u8>>,
        high_water: PageId,
    ) -> CoreResult<()> {
        let required = high_water * self.page_size as u64;
        let size = self.backend.size()?;
        if required > size {
            let new_size = mmap_size(required, self.page_size)?;
            self.backend.grow(new_size)?;
            self.stats.record_remap();
            debug!(old_size = size, new_size, "Grew database file");
        }

        for (&pgid, page) in pages {
            self.backend.write_at(pgid * self.page_size as u64, page)?;
        }
        if !self.no_sync.load(Ordering::Relaxed) {
            self.backend.sync()?;
        }
        Ok(())
    }

    /// Writes `meta` to its slot.
    pub(crate) fn write_meta(&self, meta: &Meta) -> CoreResult<()> {
        let slot = meta.slot();
        let page = meta.to_page(slot, self.page_size);
        self.backend.write_at(slot * self.page_size as u64, &page)?;
        if !self.no_sync.load(Ordering::Relaxed) {
            self.backend.sync()?;
        }
        Ok(())
    }

    /// Makes `meta` the latest commit.
    pub(crate) fn publish(&self, meta: Meta) {
        *self.meta.write() = meta;
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("path", &self.path)
            .field("page_size", &self.page_size)
            .field("is_open", &self.is_open())
            .field("txid", &self.meta.read().txid)
            .finish_non_exhaustive()
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Failed to close database");
        }
    }
}

/// Page-level reads over a backend.
pub(crate) struct PageReader<'a> {
    backend: &'a dyn StorageBackend,
    page_size: usize,
}

impl PageReader<'_> {
    fn offset(&self, pgid: PageId) -> u64 {
        pgid * self.page_size as u64
    }

    pub fn header(&self, pgid: PageId) -> CoreResult<PageHeader> {
        let buf = self.backend.read_at(self.offset(pgid), PAGE_HEADER_SIZE)?;
        PageHeader::from_bytes(&buf)
    }

    /// Reads a page together with its overflow pages.
    pub fn page(&self, pgid: PageId) -> CoreResult<(Vec<u8>, PageHeader)> {
        let header = self.header(pgid)?;
        if header.id != pgid {
            return Err(CoreError::corrupted(format!(
                "page {pgid} carries id {}",
                header.id
            )));
        }
        let len = (header.overflow as usize + 1) * self.page_size;
        let buf = self.backend.read_at(self.offset(pgid), len)?;
        Ok((buf, header))
    }

    pub fn node(&self, pgid: PageId) -> CoreResult<(Node, PageHeader)> {
        let (buf, _) = self.page(pgid)?;
        Node::decode(&buf)
    }

    /// Reads `count` consecutive pages as raw bytes.
    pub fn read_raw(&self, pgid: PageId, count: u64) -> CoreResult<Vec<u8>> {
        let len = count as usize * self.page_size;
        Ok(self.backend.read_at(self.offset(pgid), len)?)
    }
}

/// Writes the initial layout of a new file: two meta pages, an empty
/// freelist on page 2 and an empty root leaf on page 3.
fn init(backend: &dyn StorageBackend, page_size: usize) -> CoreResult<()> {
    let mut buf = vec![0u8; 4 * page_size];
    for slot in 0..2u64 {
        let meta = Meta {
            page_size: page_size as u32,
            flags: 0,
            root: BucketHeader {
                root: 3,
                sequence: 0,
            },
            freelist: 2,
            pgid: 4,
            txid: TransactionId::new(slot),
        };
        let start = slot as usize * page_size;
        buf[start..start + page_size].copy_from_slice(&meta.to_page(slot, page_size));
    }

    let freelist = Freelist::new(FreelistType::Array).encode(2, page_size)?;
    buf[2 * page_size..3 * page_size].copy_from_slice(&freelist);
    let root = Node::default().encode(3, page_size)?;
    buf[3 * page_size..4 * page_size].copy_from_slice(&root);

    backend.grow(buf.len() as u64)?;
    backend.write_at(0, &buf)?;
    backend.sync()?;
    debug!(page_size, "Initialized new database file");
    Ok(())
}

/// Reads both meta pages and returns the valid one with the highest txid.
///
/// The page size comes from meta 0. If meta 0 is unreadable every supported
/// page size is probed for a valid meta 1.
fn load_meta(backend: &dyn StorageBackend) -> CoreResult<Meta> {
    if backend.size()? < (PAGE_HEADER_SIZE + META_SIZE) as u64 {
        return Err(CoreError::invalid_format("file too small to hold a meta page"));
    }

    let read_meta = |offset: u64| -> CoreResult<Meta> {
        let buf = backend.read_at(offset, PAGE_HEADER_SIZE + META_SIZE)?;
        Meta::from_page(&buf)
    };

    let page_size = match read_meta(0) {
        Ok(meta) => meta.page_size as usize,
        Err(e) => {
            let probed = (MIN_PAGE_SIZE.trailing_zeros()..=MAX_PAGE_SIZE.trailing_zeros())
                .map(|shift| 1usize << shift)
                .find(|&size| {
                    matches!(read_meta(size as u64), Ok(m) if m.page_size as usize == size)
                });
            probed.ok_or(e)?
        }
    };
    if !is_valid_page_size(page_size) {
        return Err(CoreError::invalid_format(format!(
            "invalid page size {page_size} in meta page"
        )));
    }

    let first = read_meta(0);
    let second = read_meta(page_size as u64).and_then(|m| {
        if m.page_size as usize == page_size {
            Ok(m)
        } else {
            Err(CoreError::invalid_format("meta pages disagree on page size"))
        }
    });

    match (first, second) {
        (Ok(a), Ok(b)) => Ok(if b.txid > a.txid { b } else { a }),
        (Ok(meta), Err(e)) | (Err(e), Ok(meta)) => {
            warn!(error = %e, txid = %meta.txid, "Meta page invalid, using the other copy");
            Ok(meta)
        }
        (Err(e), Err(_)) => Err(e),
    }
}

/// File size to grow to so that `size` bytes fit.
///
/// Doubles from 32 KiB up to 1 GiB, then grows in 1 GiB steps, always
/// aligned to the page size.
pub(crate) fn mmap_size(size: u64, page_size: usize) -> CoreResult<u64> {
    for shift in 15..=30 {
        if size <= 1 << shift {
            return Ok(1 << shift);
        }
    }
    if size > MAX_MAP_SIZE {
        return Err(CoreError::invalid_format(format!(
            "database size {size} exceeds the maximum"
        )));
    }

    let mut target = size.div_ceil(MAX_MMAP_STEP) * MAX_MMAP_STEP;
    let page_size = page_size as u64;
    target = target.div_ceil(page_size) * page_size;
    Ok(target.min(MAX_MAP_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::DEFAULT_PAGE_SIZE;

    fn create_db() -> Db {
        Db::open_in_memory(Options::default()).unwrap()
    }

    #[test]
    fn open_in_memory() {
        let db = create_db();
        assert!(db.is_open());
        assert_eq!(db.page_size(), DEFAULT_PAGE_SIZE);

        let info = db.info().unwrap();
        assert_eq!(info.txid, 1);
        assert_eq!(info.high_water, 4);
        assert!(info.path.is_none());
    }

    #[test]
    fn fresh_database_is_consistent() {
        let db = create_db();
        assert!(db.check().unwrap().is_empty());
    }

    #[test]
    fn update_then_view() {
        let db = create_db();
        db.update(|tx| tx.put_path(b"users:1", b"alice")).unwrap();
        let value = db.view(|tx| tx.get_path(b"users:1")).unwrap();
        assert_eq!(value, Some(b"alice".to_vec()));
        assert!(db.check().unwrap().is_empty());
    }

    #[test]
    fn canceled_update_rolls_back() {
        let db = create_db();
        let result: CoreResult<()> = db.update(|tx| {
            tx.create_bucket(b"b")?;
            Err(CoreError::Canceled)
        });
        assert!(matches!(result, Err(CoreError::Canceled)));
        assert!(db.view(|tx| tx.bucket(b"b").map(|b| b.is_none())).unwrap());

        let stats = db.stats();
        assert_eq!(stats.tx_committed, 0);
        assert_eq!(stats.tx_rolled_back, 1);
    }

    #[test]
    fn close_is_idempotent() {
        let db = create_db();
        db.close().unwrap();
        db.close().unwrap();
        assert!(!db.is_open());
        assert!(matches!(db.begin_read(), Err(CoreError::DatabaseNotOpen)));
        assert!(matches!(db.begin_write(), Err(CoreError::DatabaseNotOpen)));
    }

    #[test]
    fn commit_after_close_fails() {
        let db = create_db();
        let mut tx = db.begin_write().unwrap();
        tx.create_bucket(b"b").unwrap();
        db.close().unwrap();
        assert!(matches!(tx.commit(), Err(CoreError::TxClosed)));
    }

    #[test]
    fn in_memory_read_only_cannot_initialize() {
        let result = Db::open_in_memory(Options::default().read_only(true));
        assert!(matches!(result, Err(CoreError::DatabaseReadOnly)));
    }

    #[test]
    fn invalid_page_size_rejected() {
        let result = Db::open_in_memory(Options::default().page_size(3000));
        assert!(matches!(
            result,
            Err(CoreError::InvalidPageSize { size: 3000 })
        ));
    }

    #[test]
    fn freed_pages_wait_for_readers() {
        let db = create_db();
        db.update(|tx| tx.put_path(b"b:k", b"v1")).unwrap();

        let reader = db.begin_read().unwrap();
        db.update(|tx| tx.put_path(b"b:k", b"v2")).unwrap();
        db.update(|tx| tx.put_path(b"b:k", b"v3")).unwrap();
        assert!(db.stats().pending_pages > 0);
        assert_eq!(
            reader.get_path(b"b:k").unwrap(),
            Some(b"v1".to_vec())
        );

        drop(reader);
        db.update(|_| Ok(())).unwrap();
        let stats = db.stats();
        assert!(stats.free_pages > 0);
        assert!(db.check().unwrap().is_empty());
    }

    #[test]
    fn pages_are_reused() {
        let db = create_db();
        for i in 0..20u32 {
            db.update(|tx| tx.put_path(b"b:k", &i.to_le_bytes())).unwrap();
        }
        // Without readers every commit reuses what the one before freed.
        assert!(db.info().unwrap().high_water < 20);
    }

    #[test]
    fn mmap_size_policy() {
        assert_eq!(mmap_size(0, 4096).unwrap(), 1 << 15);
        assert_eq!(mmap_size(1 << 15, 4096).unwrap(), 1 << 15);
        assert_eq!(mmap_size((1 << 15) + 1, 4096).unwrap(), 1 << 16);
        assert_eq!(mmap_size(1 << 30, 4096).unwrap(), 1 << 30);
        assert_eq!(mmap_size((1 << 30) + 1, 4096).unwrap(), 2 << 30);
        assert!(mmap_size(MAX_MAP_SIZE + 1, 4096).is_err());
    }

    #[test]
    fn release_between_readers() {
        let db = create_db();
        let mut freelist = db.freelist.lock();
        // Freed by txids 2 and 4, both allocated before any reader.
        freelist.free(TransactionId::new(2), 10, 0).unwrap();
        freelist.free(TransactionId::new(4), 11, 0).unwrap();
        drop(freelist);

        // A reader at snapshot 3 still sees page 11 but not page 10.
        db.readers.lock().push(TransactionId::new(3));
        db.release_pending();
        let freelist = db.freelist.lock();
        assert_eq!(freelist.free_count(), 1);
        assert_eq!(freelist.pending_count(), 1);
    }
}

#[cfg(test)]
mod persistence_tests {
    use super::*;
    use crate::page::DEFAULT_PAGE_SIZE;
    use tempfile::tempdir;

    #[test]
    fn data_survives_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("test.db");

        {
            let db = Db::open(&path, 0o600, Options::default().page_size(4096)).unwrap();
            db.update(|tx| tx.put_path(b"users:1", b"alice")).unwrap();
            db.close().unwrap();
        }

        let db = Db::open(&path, 0o600, Options::default()).unwrap();
        assert_eq!(db.page_size(), 4096);
        let value = db.view(|tx| tx.get_path(b"users:1")).unwrap();
        assert_eq!(value, Some(b"alice".to_vec()));
        assert!(db.check().unwrap().is_empty());
    }

    #[test]
    fn torn_meta_falls_back_to_other_copy() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("test.db");

        {
            let db = Db::open(&path, 0o600, Options::default()).unwrap();
            db.update(|tx| tx.put_path(b"b:k", b"first")).unwrap();
            db.update(|tx| tx.put_path(b"b:k", b"second")).unwrap();
        }

        // The last commit (txid 3) went to slot 1; corrupt it.
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(DEFAULT_PAGE_SIZE as u64 + 40)).unwrap();
            file.write_all(&[0xAB; 8]).unwrap();
        }

        let db = Db::open(&path, 0o600, Options::default()).unwrap();
        assert_eq!(db.info().unwrap().txid, 2);
        let value = db.view(|tx| tx.get_path(b"b:k")).unwrap();
        assert_eq!(value, Some(b"first".to_vec()));
    }

    #[test]
    fn not_a_database() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("junk.db");
        std::fs::write(&path, vec![0x5Au8; 8192]).unwrap();

        let result = Db::open(&path, 0o600, Options::default());
        assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));
    }
}
