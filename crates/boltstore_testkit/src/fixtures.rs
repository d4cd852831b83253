//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use boltstore_core::{Db, Options};
use std::path::{Path, PathBuf};
use std::sync::Once;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// File name used for file-backed test databases.
pub const TEST_DB_FILE: &str = "test.db";

/// Permission bits used when creating test database files.
pub const TEST_DB_MODE: u32 = 0o600;

static TRACING: Once = Once::new();

/// Installs a `tracing` subscriber that writes through the test harness.
///
/// The filter comes from `RUST_LOG` and defaults to `warn`. Calling this more
/// than once is harmless.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        // Another subscriber may already be installed by the test binary.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A test database with automatic cleanup.
pub struct TestDb {
    /// The database instance.
    pub db: Db,
    options: Options,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
    path: Option<PathBuf>,
}

impl TestDb {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self::memory_with(Options::default())
    }

    /// Creates a new in-memory test database with custom options.
    pub fn memory_with(options: Options) -> Self {
        Self {
            db: Db::open_in_memory(options.clone()).expect("Failed to open in-memory database"),
            options,
            _temp_dir: None,
            path: None,
        }
    }

    /// Creates a new file-based test database in a temporary directory.
    pub fn file() -> Self {
        Self::file_with(Options::default())
    }

    /// Creates a new file-based test database with custom options.
    pub fn file_with(options: Options) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join(TEST_DB_FILE);
        let db = Db::open(&path, TEST_DB_MODE, options.clone()).expect("Failed to open file database");

        Self {
            db,
            options,
            _temp_dir: Some(temp_dir),
            path: Some(path),
        }
    }

    /// Returns the database path if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Closes the database and opens the same file again.
    ///
    /// # Panics
    ///
    /// Panics for in-memory databases, which do not survive a close.
    pub fn reopen(self) -> Self {
        let Self {
            db,
            options,
            _temp_dir,
            path,
        } = self;
        let path = path.expect("Only file databases can be reopened");
        db.close().expect("Failed to close database");
        drop(db);

        let db = Db::open(&path, TEST_DB_MODE, options.clone()).expect("Failed to reopen database");
        Self {
            db,
            options,
            _temp_dir,
            path: Some(path),
        }
    }
}

impl std::ops::Deref for TestDb {
    type Target = Db;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust,ignore
/// use boltstore_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db| {
///         db.update(|tx| tx.put_path(b"b:k", b"v")).unwrap();
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Db) -> R,
{
    let test_db = TestDb::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary file-based database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Db, &Path) -> R,
{
    let test_db = TestDb::file();
    let path = test_db.path().expect("File database should have a path");
    f(&test_db.db, path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Key used for entry `index` by the populated scenarios.
    pub fn scenario_key(index: usize) -> Vec<u8> {
        format!("key-{index:08}").into_bytes()
    }

    /// Value stored for entry `index` by the populated scenarios.
    pub fn scenario_value(index: usize) -> Vec<u8> {
        format!(r#"{{"index":{index}}}"#).into_bytes()
    }

    /// Creates a database with one bucket named `data` holding `count` entries.
    pub fn populated_database(count: usize) -> TestDb {
        let test_db = TestDb::memory();
        test_db
            .update(|tx| {
                let mut bucket = tx.create_bucket(b"data")?;
                for i in 0..count {
                    bucket.put(&scenario_key(i), &scenario_value(i))?;
                }
                Ok(())
            })
            .expect("Failed to populate database");
        test_db
    }

    /// Creates a database with `bucket_count` top-level buckets, one entry each.
    pub fn multi_bucket_database(bucket_count: usize) -> (TestDb, Vec<Vec<u8>>) {
        let test_db = TestDb::memory();
        let names: Vec<Vec<u8>> = (0..bucket_count)
            .map(|i| format!("bucket_{i}").into_bytes())
            .collect();

        test_db
            .update(|tx| {
                for (i, name) in names.iter().enumerate() {
                    tx.create_bucket(name)?
                        .put(&scenario_key(i), &scenario_value(i))?;
                }
                Ok(())
            })
            .expect("Failed to create buckets");

        (test_db, names)
    }

    /// Creates a chain of buckets nested `depth` levels deep.
    ///
    /// Returns the database and the `:`-separated path of the innermost bucket.
    pub fn nested_database(depth: usize) -> (TestDb, Vec<u8>) {
        assert!(depth > 0, "depth must be at least one");
        let test_db = TestDb::memory();
        let path = (0..depth)
            .map(|level| format!("level{level}"))
            .collect::<Vec<_>>()
            .join(":")
            .into_bytes();

        let key_path = [path.as_slice(), b":leaf"].concat();
        test_db
            .update(|tx| tx.put_path(&key_path, b"bottom"))
            .expect("Failed to create nested buckets");

        (test_db, path)
    }
}
