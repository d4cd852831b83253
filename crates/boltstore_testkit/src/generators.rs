//! Property-based test generators using proptest.
//!
//! Provides strategies for generating keys, values and operation sequences,
//! plus an in-memory model that operation sequences can be checked against.

use boltstore_core::{CoreError, CoreResult, Db, WriteTx, MAX_KEY_SIZE};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for generating valid keys (non-empty, arbitrary bytes).
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..64)
}

/// Strategy for keys drawn from a small alphabet, so sequences revisit them.
pub fn colliding_key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(b'a'..=b'd', 1..4)
}

/// Strategy for generating values (arbitrary bytes, possibly empty).
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

/// Strategy for generating valid bucket names.
pub fn bucket_name_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}")
        .expect("Invalid regex")
        .prop_map(String::into_bytes)
}

/// Strategy for bucket names drawn from a fixed set of three.
pub fn fixed_bucket_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        Just(b"alpha".to_vec()),
        Just(b"beta".to_vec()),
        Just(b"gamma".to_vec()),
    ]
}

/// A single operation against a two-level (bucket, key) store.
#[derive(Debug, Clone)]
pub enum KvOperation {
    /// Put a value, creating the bucket if needed
    Put {
        /// Bucket name
        bucket: Vec<u8>,
        /// Key
        key: Vec<u8>,
        /// Value
        value: Vec<u8>,
    },
    /// Delete a key
    Delete {
        /// Bucket name
        bucket: Vec<u8>,
        /// Key
        key: Vec<u8>,
    },
    /// Read a key
    Get {
        /// Bucket name
        bucket: Vec<u8>,
        /// Key
        key: Vec<u8>,
    },
    /// Delete a whole bucket
    DeleteBucket {
        /// Bucket name
        bucket: Vec<u8>,
    },
}

/// Strategy for generating operations that frequently touch the same keys.
pub fn kv_operation_strategy() -> impl Strategy<Value = KvOperation> {
    prop_oneof![
        6 => (fixed_bucket_strategy(), colliding_key_strategy(), value_strategy())
            .prop_map(|(bucket, key, value)| KvOperation::Put { bucket, key, value }),
        2 => (fixed_bucket_strategy(), colliding_key_strategy())
            .prop_map(|(bucket, key)| KvOperation::Delete { bucket, key }),
        2 => (fixed_bucket_strategy(), colliding_key_strategy())
            .prop_map(|(bucket, key)| KvOperation::Get { bucket, key }),
        1 => fixed_bucket_strategy().prop_map(|bucket| KvOperation::DeleteBucket { bucket }),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<KvOperation>> {
    prop::collection::vec(kv_operation_strategy(), min_ops..max_ops)
}

/// Reference model: bucket name to sorted key/value map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvModel {
    /// Buckets and their contents.
    pub buckets: BTreeMap<Vec<u8>, BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl KvModel {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an operation, returning the value a `Get` observes.
    pub fn apply(&mut self, op: &KvOperation) -> Option<Vec<u8>> {
        match op {
            KvOperation::Put { bucket, key, value } => {
                self.buckets
                    .entry(bucket.clone())
                    .or_default()
                    .insert(key.clone(), value.clone());
                None
            }
            KvOperation::Delete { bucket, key } => {
                if let Some(entries) = self.buckets.get_mut(bucket) {
                    entries.remove(key);
                }
                None
            }
            KvOperation::Get { bucket, key } => {
                self.buckets.get(bucket).and_then(|e| e.get(key)).cloned()
            }
            KvOperation::DeleteBucket { bucket } => {
                self.buckets.remove(bucket);
                None
            }
        }
    }

    /// Reads the full contents of `db` into a model.
    ///
    /// Nested buckets are skipped; only plain values are collected.
    pub fn from_db(db: &Db) -> CoreResult<Self> {
        db.view(|tx| {
            let mut names = Vec::new();
            tx.for_each(|name| {
                names.push(name.to_vec());
                Ok(())
            })?;

            let mut model = Self::new();
            for name in names {
                let bucket = tx
                    .bucket(&name)?
                    .ok_or(CoreError::BucketNotFound)?;
                let mut entries = BTreeMap::new();
                bucket.for_each(|key, value| {
                    if let Some(value) = value {
                        entries.insert(key.to_vec(), value.to_vec());
                    }
                    Ok(())
                })?;
                model.buckets.insert(name, entries);
            }
            Ok(model)
        })
    }
}

/// Applies an operation inside a write transaction, returning what a `Get` saw.
///
/// Deleting a missing bucket is accepted, matching [`KvModel::apply`].
pub fn apply_operation(tx: &mut WriteTx<'_>, op: &KvOperation) -> CoreResult<Option<Vec<u8>>> {
    match op {
        KvOperation::Put { bucket, key, value } => {
            tx.create_bucket_if_not_exists(bucket)?.put(key, value)?;
            Ok(None)
        }
        KvOperation::Delete { bucket, key } => {
            if let Some(mut b) = tx.bucket_mut(bucket)? {
                b.delete(key)?;
            }
            Ok(None)
        }
        KvOperation::Get { bucket, key } => match tx.bucket(bucket)? {
            Some(b) => b.get(key),
            None => Ok(None),
        },
        KvOperation::DeleteBucket { bucket } => match tx.delete_bucket(bucket) {
            Err(CoreError::BucketNotFound) => Ok(None),
            other => other.map(|()| None),
        },
    }
}

/// Runs `ops` against both `db` and `model`, committing every `batch` operations.
///
/// Returns the index of the first `Get` whose result diverged from the model.
pub fn run_against_model(
    db: &Db,
    model: &mut KvModel,
    ops: &[KvOperation],
    batch: usize,
) -> CoreResult<Option<usize>> {
    let batch = batch.max(1);
    for (chunk_index, chunk) in ops.chunks(batch).enumerate() {
        let diverged = db.update(|tx| {
            for (i, op) in chunk.iter().enumerate() {
                let expected = model.apply(op);
                let actual = apply_operation(tx, op)?;
                if actual != expected {
                    return Ok(Some(chunk_index * batch + i));
                }
            }
            Ok(None)
        })?;
        if diverged.is_some() {
            return Ok(diverged);
        }
    }
    Ok(None)
}

/// Returns a key one byte longer than the engine accepts.
pub fn oversized_key() -> Vec<u8> {
    vec![b'k'; MAX_KEY_SIZE + 1]
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
