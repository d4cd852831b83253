//! # boltstore Core
//!
//! Embedded key/value engine for boltstore.
//!
//! This crate provides:
//! - A single-file, page-based store with two alternating meta pages
//! - Copy-on-write B+trees, so readers never block the writer
//! - Nested buckets with per-bucket sequences and ordered cursors
//! - One read-write transaction alongside any number of read-only ones
//! - Free page tracking that holds back pages open readers can still see
//! - Cross-process file locking and open-time options
//!
//! ## Example
//!
//! ```rust
//! use boltstore_core::{Db, Options};
//!
//! let db = Db::open_in_memory(Options::default())?;
//!
//! db.update(|tx| {
//!     let mut users = tx.create_bucket(b"users")?;
//!     users.put(b"1", b"alice")?;
//!     Ok(())
//! })?;
//!
//! db.view(|tx| {
//!     let users = tx.bucket(b"users")?.expect("created above");
//!     assert_eq!(users.get(b"1")?, Some(b"alice".to_vec()));
//!     Ok(())
//! })?;
//! # Ok::<(), boltstore_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bucket;
mod check;
mod config;
mod cursor;
mod database;
mod error;
mod freelist;
mod lock;
mod node;
pub mod page;
mod stats;
mod transaction;
mod types;

pub use bucket::{Bucket, BucketMut, BucketStats};
pub use check::IntegrityIssue;
pub use config::{default_open_file, open, AccessMode, FreelistType, OpenFileFn, OpenOption, Options};
pub use cursor::{Cursor, CursorItem};
pub use database::{Db, DbInfo};
pub use error::{CoreError, CoreResult};
pub use page::{DEFAULT_PAGE_SIZE, MAX_KEY_SIZE, MAX_PAGE_SIZE, MAX_VALUE_SIZE, MIN_PAGE_SIZE};
pub use stats::{DatabaseStats, StatsSnapshot, TxStats};
pub use transaction::{ReadTx, WriteTx, DEFAULT_FILL_PERCENT, MAX_FILL_PERCENT, MIN_FILL_PERCENT};
pub use types::{PageId, TransactionId};

pub use boltstore_storage::MmapFlags;
