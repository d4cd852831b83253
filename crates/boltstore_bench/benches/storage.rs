//! Storage backend benchmarks.

use boltstore_bench::utils::random_data;
use boltstore_storage::{FileBackend, InMemoryBackend, StorageBackend};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;

const PAGE: usize = 4096;
const REGION_PAGES: u64 = 256;

/// Writes `data` at a scattered page offset inside the benchmark region.
fn write_pages<B: StorageBackend>(backend: &B, data: &[u8], round: &mut u64) {
    let page = (*round * 7919) % REGION_PAGES;
    *round += 1;
    backend
        .write_at(page * PAGE as u64, black_box(data))
        .unwrap();
}

/// Benchmark InMemoryBackend writes.
fn bench_inmemory_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("inmemory_write");

    for size in [256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let backend = InMemoryBackend::new();
            backend.grow(REGION_PAGES * PAGE as u64).unwrap();
            let data = random_data(size);
            let mut round = 0u64;

            b.iter(|| write_pages(&backend, &data, &mut round));
        });
    }

    group.finish();
}

/// Benchmark InMemoryBackend reads.
fn bench_inmemory_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("inmemory_read");

    for size in [256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let backend = InMemoryBackend::with_data(random_data(REGION_PAGES as usize * PAGE));

            b.iter(|| {
                let result = backend.read_at(black_box(PAGE as u64), black_box(size)).unwrap();
                black_box(result);
            });
        });
    }

    group.finish();
}

/// Benchmark FileBackend writes through the file handle.
fn bench_file_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_write");
    group.sample_size(50);

    for size in [256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let temp_dir = TempDir::new().unwrap();
            let backend = FileBackend::open(&temp_dir.path().join("bench.dat")).unwrap();
            backend.grow(REGION_PAGES * PAGE as u64).unwrap();
            let data = random_data(size);
            let mut round = 0u64;

            b.iter(|| write_pages(&backend, &data, &mut round));
        });
    }

    group.finish();
}

/// Benchmark FileBackend reads served from the memory map.
fn bench_file_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_read");

    for size in [256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let temp_dir = TempDir::new().unwrap();
            let backend = FileBackend::open(&temp_dir.path().join("bench.dat")).unwrap();
            backend.grow(REGION_PAGES * PAGE as u64).unwrap();
            backend.write_at(PAGE as u64, &random_data(size)).unwrap();

            b.iter(|| {
                let result = backend.read_at(black_box(PAGE as u64), black_box(size)).unwrap();
                black_box(result);
            });
        });
    }

    group.finish();
}

/// Benchmark FileBackend sync.
fn bench_file_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_sync");
    group.sample_size(20);

    group.bench_function("write_and_sync", |b| {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::open(&temp_dir.path().join("bench.dat")).unwrap();
        backend.grow(REGION_PAGES * PAGE as u64).unwrap();
        let data = random_data(PAGE);
        let mut round = 0u64;

        b.iter(|| {
            write_pages(&backend, &data, &mut round);
            backend.sync().unwrap();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_inmemory_write,
    bench_inmemory_read,
    bench_file_write,
    bench_file_read,
    bench_file_sync,
);

criterion_main!(benches);
