//! Database statistics.
//!
//! Counters are updated by transactions as they run and can be read at any
//! time through [`Db::stats`](crate::Db::stats).
//!
//! # Usage
//!
//! ```rust
//! use boltstore_core::{Db, Options};
//!
//! let db = Db::open_in_memory(Options::default())?;
//! db.update(|tx| {
//!     tx.create_bucket(b"users")?.put(b"1", b"alice")?;
//!     Ok(())
//! })?;
//!
//! let stats = db.stats();
//! assert_eq!(stats.tx_committed, 1);
//! assert!(stats.pages_written > 0);
//! # Ok::<(), boltstore_core::CoreError>(())
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Database-wide counters.
///
/// All counters are atomic and monotonically increasing, except the
/// `open_read_tx` gauge.
#[derive(Debug, Default)]
pub struct DatabaseStats {
    // Transaction counters
    read_tx_started: AtomicU64,
    open_read_tx: AtomicU64,
    write_tx_started: AtomicU64,
    tx_committed: AtomicU64,
    tx_rolled_back: AtomicU64,

    // Page counters
    pages_allocated: AtomicU64,
    pages_written: AtomicU64,
    bytes_written: AtomicU64,

    // Tree maintenance
    nodes_materialized: AtomicU64,
    splits: AtomicU64,
    spills: AtomicU64,
    merges: AtomicU64,

    // File growth
    remaps: AtomicU64,

    commit_time_us: AtomicU64,
}

impl DatabaseStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read_tx_start(&self) {
        self.read_tx_started.fetch_add(1, Ordering::Relaxed);
        self.open_read_tx.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read_tx_end(&self) {
        self.open_read_tx.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_tx_start(&self) {
        self.write_tx_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a commit and folds in the transaction's own counters.
    pub(crate) fn record_commit(&self, tx: &TxStats) {
        self.tx_committed.fetch_add(1, Ordering::Relaxed);
        self.pages_allocated
            .fetch_add(tx.pages_allocated, Ordering::Relaxed);
        self.pages_written.fetch_add(tx.pages_written, Ordering::Relaxed);
        self.bytes_written.fetch_add(tx.bytes_written, Ordering::Relaxed);
        self.nodes_materialized
            .fetch_add(tx.nodes_materialized, Ordering::Relaxed);
        self.splits.fetch_add(tx.splits, Ordering::Relaxed);
        self.spills.fetch_add(tx.spills, Ordering::Relaxed);
        self.merges.fetch_add(tx.merges, Ordering::Relaxed);
        self.commit_time_us
            .fetch_add(tx.commit_time.as_micros() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.tx_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_remap(&self) {
        self.remaps.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of read transactions started.
    pub fn read_tx_started(&self) -> u64 {
        self.read_tx_started.load(Ordering::Relaxed)
    }

    /// Returns the number of currently open read transactions.
    pub fn open_read_tx(&self) -> u64 {
        self.open_read_tx.load(Ordering::Relaxed)
    }

    /// Returns the number of committed write transactions.
    pub fn tx_committed(&self) -> u64 {
        self.tx_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of rolled back write transactions.
    pub fn tx_rolled_back(&self) -> u64 {
        self.tx_rolled_back.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    ///
    /// Freelist counts are not tracked here and are left at zero.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            read_tx_started: self.read_tx_started(),
            open_read_tx: self.open_read_tx(),
            write_tx_started: self.write_tx_started.load(Ordering::Relaxed),
            tx_committed: self.tx_committed(),
            tx_rolled_back: self.tx_rolled_back(),
            pages_allocated: self.pages_allocated.load(Ordering::Relaxed),
            pages_written: self.pages_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            nodes_materialized: self.nodes_materialized.load(Ordering::Relaxed),
            splits: self.splits.load(Ordering::Relaxed),
            spills: self.spills.load(Ordering::Relaxed),
            merges: self.merges.load(Ordering::Relaxed),
            remaps: self.remaps.load(Ordering::Relaxed),
            commit_time: Duration::from_micros(self.commit_time_us.load(Ordering::Relaxed)),
            free_pages: 0,
            pending_pages: 0,
        }
    }
}

/// Counters of a single write transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TxStats {
    /// Pages allocated, overflow pages included.
    pub pages_allocated: u64,
    /// Pages written at commit, meta excluded.
    pub pages_written: u64,
    /// Bytes written at commit, meta excluded.
    pub bytes_written: u64,
    /// Pages copied into memory for modification.
    pub nodes_materialized: u64,
    /// Extra pieces produced by splitting oversized nodes.
    pub splits: u64,
    /// Nodes written to new pages.
    pub spills: u64,
    /// Underfilled siblings merged before writing.
    pub merges: u64,
    /// Time spent in commit.
    pub commit_time: Duration,
}

/// A point-in-time snapshot of database statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StatsSnapshot {
    /// Read transactions started.
    pub read_tx_started: u64,
    /// Read transactions currently open.
    pub open_read_tx: u64,
    /// Write transactions started.
    pub write_tx_started: u64,
    /// Write transactions committed.
    pub tx_committed: u64,
    /// Write transactions rolled back.
    pub tx_rolled_back: u64,
    /// Pages allocated by committed transactions.
    pub pages_allocated: u64,
    /// Pages written by committed transactions.
    pub pages_written: u64,
    /// Bytes written by committed transactions.
    pub bytes_written: u64,
    /// Pages copied into memory for modification.
    pub nodes_materialized: u64,
    /// Node splits.
    pub splits: u64,
    /// Nodes written.
    pub spills: u64,
    /// Sibling merges.
    pub merges: u64,
    /// Times the file was grown and remapped.
    pub remaps: u64,
    /// Total time spent committing.
    pub commit_time: Duration,
    /// Pages free for reuse.
    pub free_pages: usize,
    /// Pages freed but still visible to an open reader.
    pub pending_pages: usize,
}
