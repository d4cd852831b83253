//! Benchmark utilities.

use boltstore_core::{CoreResult, Db};
use rand::seq::SliceRandom;
use rand::Rng;

/// Bucket every benchmark writes into.
pub const BENCH_BUCKET: &[u8] = b"bench";

/// Generate random data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` sequential big-endian keys.
pub fn sequential_keys(count: usize) -> Vec<[u8; 8]> {
    (0..count as u64).map(u64::to_be_bytes).collect()
}

/// Generate the same keys as [`sequential_keys`] in random order.
pub fn shuffled_keys(count: usize) -> Vec<[u8; 8]> {
    let mut keys = sequential_keys(count);
    keys.shuffle(&mut rand::thread_rng());
    keys
}

/// Writes `keys` with random values of `value_size` bytes in one transaction.
pub fn load(db: &Db, keys: &[[u8; 8]], value_size: usize) -> CoreResult<()> {
    db.update(|tx| {
        let mut bucket = tx.create_bucket_if_not_exists(BENCH_BUCKET)?;
        for key in keys {
            bucket.put(key, &random_data(value_size))?;
        }
        Ok(())
    })
}
