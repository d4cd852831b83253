//! Stress tests for boltstore.
//!
//! These tests verify behavior under heavy load and concurrent access.

use boltstore_core::{CoreError, Db, StatsSnapshot};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

const STRESS_BUCKET: &[u8] = b"stress";

/// Result of a stress test run.
#[derive(Debug, Clone, Serialize)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Logs a summary of the test.
    pub fn print_summary(&self, name: &str) {
        info!(
            test = name,
            total = self.total_ops,
            successful = self.successful_ops,
            failed = self.failed_ops,
            duration = ?self.duration,
            ops_per_second = format_args!("{:.2}", self.ops_per_second),
            "Stress test finished"
        );
    }
}

/// A stress result together with the database counters after the run.
#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    /// Name of the scenario.
    pub name: String,
    /// Operation counts and timing.
    pub result: StressTestResult,
    /// Database statistics when the run ended.
    pub stats: StatsSnapshot,
}

impl StressReport {
    /// Captures the current statistics of `db` alongside `result`.
    pub fn capture(name: &str, result: StressTestResult, db: &Db) -> Self {
        Self {
            name: name.to_string(),
            result,
            stats: db.stats(),
        }
    }

    /// Renders the report as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Size of each value in bytes.
    pub value_size: usize,
    /// Number of distinct keys.
    pub key_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            value_size: 256,
            key_count: 1_000,
        }
    }
}

fn stress_key(index: usize) -> [u8; 8] {
    (index as u64).to_be_bytes()
}

/// Writes `config.key_count` keys into the stress bucket.
fn populate(db: &Db, config: &StressConfig) {
    let value = vec![0xABu8; config.value_size];
    let _ = db.update(|tx| {
        let mut bucket = tx.create_bucket_if_not_exists(STRESS_BUCKET)?;
        for i in 0..config.key_count {
            bucket.put(&stress_key(i), &value)?;
        }
        Ok(())
    });
}

/// Run a sequential write stress test, one transaction per put.
pub fn stress_sequential_writes(db: &Db, config: &StressConfig) -> StressTestResult {
    let value = vec![0xABu8; config.value_size];

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let key = stress_key(i % config.key_count.max(1));

        match db.update(|tx| tx.create_bucket_if_not_exists(STRESS_BUCKET)?.put(&key, &value)) {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a sequential read stress test.
pub fn stress_sequential_reads(db: &Db, config: &StressConfig) -> StressTestResult {
    populate(db, config);

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let key = stress_key(i % config.key_count.max(1));

        let result = db.view(|tx| match tx.bucket(STRESS_BUCKET)? {
            Some(bucket) => bucket.get(&key),
            None => Ok(None),
        });
        match result {
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a mixed read/write/delete stress test.
pub fn stress_mixed_operations(db: &Db, config: &StressConfig) -> StressTestResult {
    let value = vec![0xABu8; config.value_size];

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let key = stress_key(i % config.key_count.max(1));

        let result = if i % 3 == 0 {
            // Write (33%)
            db.update(|tx| tx.create_bucket_if_not_exists(STRESS_BUCKET)?.put(&key, &value))
        } else if i % 3 == 1 {
            // Read (33%)
            db.view(|tx| tx.bucket(STRESS_BUCKET)?.map(|b| b.get(&key)).transpose())
                .map(|_| ())
        } else {
            // Delete (33%)
            db.update(|tx| match tx.bucket_mut(STRESS_BUCKET)? {
                Some(mut bucket) => bucket.delete(&key),
                None => Ok(()),
            })
        };

        match result {
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a concurrent read stress test.
pub fn stress_concurrent_reads(db: Arc<Db>, config: &StressConfig) -> StressTestResult {
    populate(&db, config);

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads.max(1);

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let db = Arc::clone(&db);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let key_count = config.key_count.max(1);

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let key = stress_key((t * ops_per_thread + i) % key_count);

                    let result = db.view(|tx| match tx.bucket(STRESS_BUCKET)? {
                        Some(bucket) => bucket.get(&key),
                        None => Ok(None),
                    });
                    match result {
                        Ok(Some(_)) => {
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(None) | Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run readers against a single writer that keeps rewriting every key.
///
/// Each read transaction checks that all keys carry the same generation,
/// so a torn commit shows up as a failed operation.
pub fn stress_readers_with_writer(db: Arc<Db>, config: &StressConfig) -> StressTestResult {
    let key_count = config.key_count.max(1);
    let write_generation = |generation: u64| {
        db.update(|tx| {
            let mut bucket = tx.create_bucket_if_not_exists(STRESS_BUCKET)?;
            for i in 0..key_count {
                bucket.put(&stress_key(i), &generation.to_be_bytes())?;
            }
            Ok(())
        })
    };
    let _ = write_generation(0);

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicBool::new(false));

    let start = Instant::now();

    let readers: Vec<_> = (0..config.threads)
        .map(|_| {
            let db = Arc::clone(&db);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let done = Arc::clone(&done);

            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    let consistent = db.view(|tx| {
                        let bucket = tx.bucket(STRESS_BUCKET)?.ok_or(CoreError::BucketNotFound)?;
                        let first = bucket.get(&stress_key(0))?;
                        for i in 1..key_count {
                            if bucket.get(&stress_key(i))? != first {
                                return Ok(false);
                            }
                        }
                        Ok(true)
                    });
                    if matches!(consistent, Ok(true)) {
                        successful.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for generation in 1..=config.operations as u64 {
        if write_generation(generation).is_ok() {
            successful.fetch_add(1, Ordering::Relaxed);
        } else {
            failed.fetch_add(1, Ordering::Relaxed);
        }
    }
    done.store(true, Ordering::Release);

    for handle in readers {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run a transaction abort stress test.
pub fn stress_transaction_aborts(db: &Db, config: &StressConfig) -> StressTestResult {
    let value = vec![0xABu8; config.value_size];

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let key = stress_key(i);

        // Every other transaction will fail intentionally
        let should_fail = i % 2 == 0;

        let result = db.update(|tx| {
            tx.create_bucket_if_not_exists(STRESS_BUCKET)?.put(&key, &value)?;

            if should_fail {
                Err(CoreError::Canceled)
            } else {
                Ok(())
            }
        });

        match result {
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a large transaction stress test.
pub fn stress_large_transactions(db: &Db, config: &StressConfig) -> StressTestResult {
    let value = vec![0xABu8; config.value_size];
    let batch_size = 100; // Keys per transaction

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for batch in 0..(config.operations / batch_size) {
        let result = db.update(|tx| {
            let mut bucket = tx.create_bucket_if_not_exists(STRESS_BUCKET)?;
            for i in 0..batch_size {
                bucket.put(&stress_key(batch * batch_size + i), &value)?;
            }
            Ok(())
        });

        match result {
            Ok(_) => successful += batch_size,
            Err(_) => failed += batch_size,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestDb;
    use boltstore_core::Options;

    fn create_test_db() -> Db {
        Db::open_in_memory(Options::default()).expect("Failed to create database")
    }

    #[test]
    fn test_sequential_writes() {
        let db = create_test_db();
        let config = StressConfig {
            operations: 500,
            value_size: 64,
            ..Default::default()
        };

        let result = stress_sequential_writes(&db, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 500);
    }

    #[test]
    fn test_sequential_reads() {
        let db = create_test_db();
        let config = StressConfig {
            operations: 1_000,
            key_count: 100,
            value_size: 64,
            ..Default::default()
        };

        let result = stress_sequential_reads(&db, &config);
        assert_eq!(result.failed_ops, 0);
    }

    #[test]
    fn test_mixed_operations() {
        let db = create_test_db();
        let config = StressConfig {
            operations: 600,
            key_count: 100,
            value_size: 64,
            ..Default::default()
        };

        let result = stress_mixed_operations(&db, &config);
        assert_eq!(result.failed_ops, 0);
        assert!(db.check().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_reads() {
        let db = Arc::new(create_test_db());
        let config = StressConfig {
            operations: 1_000,
            threads: 4,
            key_count: 100,
            value_size: 64,
        };

        let result = stress_concurrent_reads(Arc::clone(&db), &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 1_000);
        assert_eq!(db.stats().open_read_tx, 0);
    }

    #[test]
    fn test_readers_with_writer() {
        let db = Arc::new(create_test_db());
        let config = StressConfig {
            operations: 50,
            threads: 3,
            key_count: 50,
            value_size: 8,
        };

        let result = stress_readers_with_writer(Arc::clone(&db), &config);
        assert_eq!(result.failed_ops, 0);
        assert!(result.successful_ops >= 50);
        assert!(db.check().unwrap().is_empty());
    }

    #[test]
    fn test_transaction_aborts() {
        let db = create_test_db();
        let config = StressConfig {
            operations: 100,
            value_size: 64,
            ..Default::default()
        };

        let result = stress_transaction_aborts(&db, &config);
        // Half should succeed, half should fail (intentionally)
        assert_eq!(result.successful_ops, 50);
        assert_eq!(result.failed_ops, 50);
        assert_eq!(db.stats().tx_rolled_back, 50);
    }

    #[test]
    fn test_large_transactions_on_file() {
        let db = TestDb::file();
        let config = StressConfig {
            operations: 1_000,
            value_size: 64,
            ..Default::default()
        };

        let result = stress_large_transactions(&db, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 1_000);

        let report = StressReport::capture("large_transactions", result, &db);
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["name"], "large_transactions");
        assert_eq!(json["result"]["successful_ops"], 1_000);
        assert_eq!(json["stats"]["tx_committed"], 10);
    }
}
