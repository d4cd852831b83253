//! Database operation benchmarks.

use boltstore_bench::utils::{load, random_data, sequential_keys, shuffled_keys, BENCH_BUCKET};
use boltstore_core::{Db, Options};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;

fn memory_db() -> Db {
    Db::open_in_memory(Options::default()).unwrap()
}

/// Benchmark single-key write transactions.
fn bench_single_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_write");

    for size in [64, 256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let db = memory_db();
            let data = random_data(size);
            let mut next = 0u64;

            b.iter(|| {
                next += 1;
                db.update(|tx| {
                    tx.create_bucket_if_not_exists(BENCH_BUCKET)?
                        .put(&next.to_be_bytes(), black_box(&data))
                })
                .unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark batch writes in sequential and random key order.
fn bench_batch_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_write");

    for batch_size in [100, 1000, 10_000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("sequential", batch_size),
            batch_size,
            |b, &batch_size| {
                let keys = sequential_keys(batch_size);
                b.iter(|| {
                    let db = memory_db();
                    load(&db, black_box(&keys), 128).unwrap();
                });
            },
        );
        group.bench_with_input(
            BenchmarkId::new("random", batch_size),
            batch_size,
            |b, &batch_size| {
                let keys = shuffled_keys(batch_size);
                b.iter(|| {
                    let db = memory_db();
                    load(&db, black_box(&keys), 128).unwrap();
                });
            },
        );
    }
    group.finish();
}

/// Benchmark point reads from a populated bucket.
fn bench_read_populated(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_populated");

    for count in [1_000, 10_000, 100_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let db = memory_db();
            let keys = shuffled_keys(count);
            load(&db, &keys, 64).unwrap();
            let mut i = 0usize;

            b.iter(|| {
                let key = keys[i % keys.len()];
                i += 1;
                let value = db
                    .view(|tx| tx.bucket(BENCH_BUCKET)?.expect("bucket exists").get(&key))
                    .unwrap();
                black_box(value);
            });
        });
    }
    group.finish();
}

/// Benchmark a full cursor scan.
fn bench_cursor_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("cursor_scan");

    for count in [1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let db = memory_db();
            load(&db, &sequential_keys(count), 64).unwrap();

            b.iter(|| {
                let seen = db
                    .view(|tx| {
                        let bucket = tx.bucket(BENCH_BUCKET)?.expect("bucket exists");
                        let mut cursor = bucket.cursor();
                        let mut seen = 0usize;
                        let mut item = cursor.first()?;
                        while item.is_some() {
                            seen += 1;
                            item = cursor.next()?;
                        }
                        Ok(seen)
                    })
                    .unwrap();
                black_box(seen);
            });
        });
    }
    group.finish();
}

/// Benchmark the fixed cost of empty transactions.
fn bench_transaction_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("transaction_overhead");
    let db = memory_db();

    group.bench_function("read", |b| {
        b.iter(|| {
            let tx = db.begin_read().unwrap();
            black_box(tx.id());
        });
    });
    group.bench_function("empty_commit", |b| {
        b.iter(|| db.update(|_| Ok(())).unwrap());
    });
    group.finish();
}

/// Benchmark durable commits to a real file.
fn bench_file_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_commit");
    group.sample_size(20);

    for no_sync in [false, true] {
        let label = if no_sync { "no_sync" } else { "sync" };
        group.bench_function(label, |b| {
            let temp_dir = TempDir::new().unwrap();
            let db = Db::open(
                temp_dir.path().join("bench.db"),
                0o600,
                Options::default().no_sync(no_sync),
            )
            .unwrap();
            let data = random_data(256);
            let mut next = 0u64;

            b.iter(|| {
                next += 1;
                db.update(|tx| {
                    tx.create_bucket_if_not_exists(BENCH_BUCKET)?
                        .put(&next.to_be_bytes(), &data)
                })
                .unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_single_write,
    bench_batch_write,
    bench_read_populated,
    bench_cursor_scan,
    bench_transaction_overhead,
    bench_file_commit,
);

criterion_main!(benches);
