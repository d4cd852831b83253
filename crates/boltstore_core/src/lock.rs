//! Cross-process file locking.
//!
//! A read-write handle holds an exclusive lock on the database file; a
//! read-only handle holds a shared one, so many read-only processes can open
//! the same file while a writer excludes everyone. Locks are released when
//! the handle is dropped, and by the OS if the process dies.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::File;
use std::io;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Interval between lock attempts while waiting with a timeout.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// A held lock on the database file.
#[derive(Debug)]
pub(crate) struct FileLock {
    file: File,
    exclusive: bool,
}

impl FileLock {
    /// Locks `file`, exclusive or shared.
    ///
    /// A zero `timeout` blocks until the lock is granted. Otherwise the lock
    /// is polled until `timeout` has passed, then [`CoreError::Timeout`] is
    /// returned.
    pub fn acquire(file: File, exclusive: bool, timeout: Duration) -> CoreResult<Self> {
        if timeout.is_zero() {
            if exclusive {
                FileExt::lock_exclusive(&file)?;
            } else {
                FileExt::lock_shared(&file)?;
            }
            debug!(exclusive, "Acquired database file lock");
            return Ok(Self { file, exclusive });
        }

        let deadline = Instant::now() + timeout;
        loop {
            let attempt = if exclusive {
                FileExt::try_lock_exclusive(&file)
            } else {
                FileExt::try_lock_shared(&file)
            };

            match attempt {
                Ok(()) => {
                    debug!(exclusive, "Acquired database file lock");
                    return Ok(Self { file, exclusive });
                }
                Err(e) if is_contended(&e) => {}
                Err(e) => return Err(e.into()),
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    exclusive,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for database file lock"
                );
                return Err(CoreError::Timeout);
            }
            thread::sleep(LOCK_RETRY_INTERVAL.min(deadline - now));
        }
    }

    /// The locked file.
    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(error = %e, "Failed to release database file lock");
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::tempdir;

    fn open(path: &std::path::Path) -> File {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .unwrap()
    }

    #[test]
    fn exclusive_lock_excludes_second_holder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let first = FileLock::acquire(open(&path), true, Duration::ZERO).unwrap();
        assert!(first.is_exclusive());

        let start = Instant::now();
        let second = FileLock::acquire(open(&path), true, Duration::from_millis(120));
        assert!(matches!(second, Err(CoreError::Timeout)));
        assert!(start.elapsed() >= Duration::from_millis(120));
    }

    #[test]
    fn shared_locks_coexist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        drop(open(&path));

        let _a = FileLock::acquire(open(&path), false, Duration::from_millis(100)).unwrap();
        let _b = FileLock::acquire(open(&path), false, Duration::from_millis(100)).unwrap();
        let writer = FileLock::acquire(open(&path), true, Duration::from_millis(60));
        assert!(matches!(writer, Err(CoreError::Timeout)));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let _lock = FileLock::acquire(open(&path), true, Duration::ZERO).unwrap();
        }
        let lock = FileLock::acquire(open(&path), true, Duration::from_millis(50));
        assert!(lock.is_ok());
    }

    #[test]
    fn zero_timeout_waits_for_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let held = FileLock::acquire(open(&path), true, Duration::ZERO).unwrap();
        let waiter_path = path.clone();
        let waiter = thread::spawn(move || {
            FileLock::acquire(open(&waiter_path), true, Duration::ZERO).map(|_| ())
        });

        thread::sleep(Duration::from_millis(200));
        assert!(!waiter.is_finished());
        drop(held);
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn contention_is_told_apart_from_real_errors() {
        assert!(is_contended(&fs2::lock_contended_error()));
        assert!(is_contended(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_contended(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[test]
    fn shared_waiter_is_granted_after_writer_leaves() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let writer = FileLock::acquire(open(&path), true, Duration::ZERO).unwrap();
        let reader_path = path.clone();
        let reader = thread::spawn(move || {
            FileLock::acquire(open(&reader_path), false, Duration::from_secs(5))
                .map(|lock| lock.is_exclusive())
        });

        thread::sleep(Duration::from_millis(150));
        drop(writer);
        assert!(!reader.join().unwrap().unwrap());
    }
}
