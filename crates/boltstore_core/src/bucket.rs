//! Buckets: named, ordered key/value collections.
//!
//! A bucket is a B+tree. Its header (root page and sequence) is stored as a
//! value in the parent bucket, flagged so it cannot be mistaken for plain
//! data. Top-level buckets live in the root bucket, whose header is kept in
//! the meta page; the root bucket itself only ever holds buckets.
//!
//! Buckets are reached through a transaction:
//!
//! - [`Bucket`] is a read-only view, available from both transaction kinds
//! - [`BucketMut`] borrows the [`WriteTx`] mutably and can change data

use crate::cursor::Cursor;
use crate::error::{CoreError, CoreResult};
use crate::node::{Child, Node};
use crate::page::BucketHeader;
use crate::transaction::{root_child, tree_get, TxView, WriteTx};

/// Read-only view of a bucket.
pub struct Bucket<'tx> {
    view: &'tx dyn TxView,
    path: Vec<Vec<u8>>,
    root: Option<Child>,
    sequence: u64,
}

impl std::fmt::Debug for Bucket<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("path", &self.path)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl<'tx> Bucket<'tx> {
    /// Resolves the bucket at `path` inside the tree rooted at `parent_root`.
    pub(crate) fn open(
        view: &'tx dyn TxView,
        parent_root: Option<Child>,
        path: Vec<Vec<u8>>,
    ) -> CoreResult<Option<Self>> {
        let Some((root, sequence)) = resolve(view, parent_root, &path)? else {
            return Ok(None);
        };
        Ok(Some(Self {
            view,
            path,
            root,
            sequence,
        }))
    }

    /// Name of the bucket.
    #[must_use]
    pub fn name(&self) -> &[u8] {
        self.path.last().map_or(&[][..], Vec::as_slice)
    }

    /// Returns the value for `key`.
    ///
    /// Returns `None` if the key does not exist or names a nested bucket.
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let entry = tree_get(self.view, self.root, key)?;
        Ok(entry.filter(|e| !e.is_bucket()).map(|e| e.value))
    }

    /// Returns the nested bucket `name`, if it exists.
    pub fn bucket(&self, name: &[u8]) -> CoreResult<Option<Bucket<'tx>>> {
        let mut path = self.path.clone();
        path.push(name.to_vec());
        Bucket::open(self.view, self.root, path)
    }

    /// Current sequence number.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Creates a cursor over the bucket's keys.
    #[must_use]
    pub fn cursor(&self) -> Cursor<'tx> {
        Cursor::new(self.view, self.root)
    }

    /// Calls `f` for every key in order. Nested buckets are passed with a
    /// `None` value. Stops at the first error.
    pub fn for_each<F>(&self, f: F) -> CoreResult<()>
    where
        F: FnMut(&[u8], Option<&[u8]>) -> CoreResult<()>,
    {
        for_each_entry(self.cursor(), f)
    }

    /// Collects statistics over the bucket and its nested buckets.
    pub fn stats(&self) -> CoreResult<BucketStats> {
        collect_stats(self.view, &self.path, self.root)
    }
}

/// Root and sequence of the bucket at `path`, preferring the transaction's
/// uncommitted state.
fn resolve(
    view: &dyn TxView,
    parent_root: Option<Child>,
    path: &[Vec<u8>],
) -> CoreResult<Option<(Option<Child>, u64)>> {
    if let Some(state) = view.cached_bucket(path) {
        return Ok(Some(state));
    }
    let Some(name) = path.last() else {
        return Ok(None);
    };
    match tree_get(view, parent_root, name)? {
        Some(entry) if entry.is_bucket() => {
            let header = BucketHeader::from_bytes(&entry.value)?;
            Ok(Some((root_child(header.root), header.sequence)))
        }
        _ => Ok(None),
    }
}

fn for_each_entry<F>(mut cursor: Cursor<'_>, mut f: F) -> CoreResult<()>
where
    F: FnMut(&[u8], Option<&[u8]>) -> CoreResult<()>,
{
    let mut item = cursor.first()?;
    while let Some((key, value)) = item {
        f(&key, value.as_deref())?;
        item = cursor.next()?;
    }
    Ok(())
}

/// Size and shape of a bucket tree.
///
/// Nested buckets are included in every count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BucketStats {
    /// Plain keys.
    pub key_count: usize,
    /// Buckets, this one included.
    pub bucket_count: usize,
    /// Depth of the deepest tree.
    pub depth: usize,
    /// Branch nodes.
    pub branch_nodes: usize,
    /// Leaf nodes.
    pub leaf_nodes: usize,
    /// Encoded bytes of branch nodes.
    pub branch_bytes: usize,
    /// Encoded bytes of leaf nodes.
    pub leaf_bytes: usize,
}

fn collect_stats(
    view: &dyn TxView,
    path: &[Vec<u8>],
    root: Option<Child>,
) -> CoreResult<BucketStats> {
    let mut stats = BucketStats {
        bucket_count: 1,
        ..BucketStats::default()
    };
    let Some(root) = root else {
        return Ok(stats);
    };

    let mut nested = Vec::new();
    let mut stack = vec![(root, 1usize)];
    while let Some((child, depth)) = stack.pop() {
        stats.depth = stats.depth.max(depth);
        let node = view.node(child)?;
        match node.as_ref() {
            Node::Branch(entries) => {
                stats.branch_nodes += 1;
                stats.branch_bytes += node.size();
                stack.extend(entries.iter().map(|e| (e.child, depth + 1)));
            }
            Node::Leaf(entries) => {
                stats.leaf_nodes += 1;
                stats.leaf_bytes += node.size();
                for entry in entries {
                    if entry.is_bucket() {
                        nested.push(entry.key.clone());
                    } else {
                        stats.key_count += 1;
                    }
                }
            }
        }
    }

    for name in nested {
        let mut child_path = path.to_vec();
        child_path.push(name);
        if let Some((child_root, _)) = resolve(view, Some(root), &child_path)? {
            let child = collect_stats(view, &child_path, child_root)?;
            stats.key_count += child.key_count;
            stats.bucket_count += child.bucket_count;
            stats.depth = stats.depth.max(child.depth);
            stats.branch_nodes += child.branch_nodes;
            stats.leaf_nodes += child.leaf_nodes;
            stats.branch_bytes += child.branch_bytes;
            stats.leaf_bytes += child.leaf_bytes;
        }
    }

    Ok(stats)
}

/// Writable handle to a bucket inside a [`WriteTx`].
///
/// # Example
///
/// ```rust
/// use boltstore_core::{Db, Options};
///
/// let db = Db::open_in_memory(Options::default())?;
/// db.update(|tx| {
///     let mut users = tx.create_bucket_if_not_exists(b"users")?;
///     let id = users.next_sequence()?;
///     users.put(id.to_string().as_bytes(), b"alice")?;
///     Ok(())
/// })?;
///
/// db.view(|tx| {
///     let users = tx.bucket(b"users")?.expect("bucket exists");
///     assert_eq!(users.get(b"1")?, Some(b"alice".to_vec()));
///     Ok(())
/// })?;
/// # Ok::<(), boltstore_core::CoreError>(())
/// ```
pub struct BucketMut<'tx, 'db> {
    tx: &'tx mut WriteTx<'db>,
    path: Vec<Vec<u8>>,
}

impl std::fmt::Debug for BucketMut<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketMut")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl<'tx, 'db> BucketMut<'tx, 'db> {
    pub(crate) fn new(tx: &'tx mut WriteTx<'db>, path: Vec<Vec<u8>>) -> Self {
        Self { tx, path }
    }

    /// Name of the bucket.
    #[must_use]
    pub fn name(&self) -> &[u8] {
        self.path.last().map_or(&[][..], Vec::as_slice)
    }

    /// Returns the value for `key`, or `None` if missing or a nested bucket.
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let entry = self.tx.entry_at(&self.path, key)?;
        Ok(entry.filter(|e| !e.is_bucket()).map(|e| e.value))
    }

    /// Sets `key` to `value`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// - [`CoreError::KeyRequired`] / [`CoreError::KeyTooLarge`] for a bad key
    /// - [`CoreError::ValueTooLarge`] for an oversized value
    /// - [`CoreError::IncompatibleValue`] if `key` names a nested bucket
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.tx.put_at(&self.path, key, value)
    }

    /// Removes `key`. Missing keys are ignored.
    ///
    /// # Errors
    ///
    /// [`CoreError::IncompatibleValue`] if `key` names a nested bucket.
    pub fn delete(&mut self, key: &[u8]) -> CoreResult<()> {
        self.tx.delete_at(&self.path, key)
    }

    /// Read-only view of the nested bucket `name`.
    pub fn bucket(&self, name: &[u8]) -> CoreResult<Option<Bucket<'_>>> {
        self.tx.bucket_view(&self.path, name)
    }

    /// Writable handle to the nested bucket `name`, if it exists.
    pub fn bucket_mut(&mut self, name: &[u8]) -> CoreResult<Option<BucketMut<'_, 'db>>> {
        let path = self.child_path(name);
        if !self.tx.bucket_exists(&path)? {
            return Ok(None);
        }
        Ok(Some(BucketMut::new(self.tx, path)))
    }

    /// Creates the nested bucket `name`.
    ///
    /// # Errors
    ///
    /// [`CoreError::BucketExists`] if it already exists,
    /// [`CoreError::IncompatibleValue`] if `name` holds a plain value.
    pub fn create_bucket(&mut self, name: &[u8]) -> CoreResult<BucketMut<'_, 'db>> {
        let path = self.child_path(name);
        self.tx.create_bucket_at(&self.path, name, false)?;
        Ok(BucketMut::new(self.tx, path))
    }

    /// Creates the nested bucket `name` unless it already exists.
    pub fn create_bucket_if_not_exists(&mut self, name: &[u8]) -> CoreResult<BucketMut<'_, 'db>> {
        let path = self.child_path(name);
        self.tx.create_bucket_at(&self.path, name, true)?;
        Ok(BucketMut::new(self.tx, path))
    }

    /// Deletes the nested bucket `name` and everything below it.
    pub fn delete_bucket(&mut self, name: &[u8]) -> CoreResult<()> {
        self.tx.delete_bucket_at(&self.path, name)
    }

    /// Current sequence number.
    pub fn sequence(&self) -> CoreResult<u64> {
        self.tx.sequence_at(&self.path)
    }

    /// Sets the sequence number.
    pub fn set_sequence(&mut self, sequence: u64) -> CoreResult<()> {
        self.tx.set_sequence_at(&self.path, sequence)
    }

    /// Increments the sequence and returns the new value.
    ///
    /// # Errors
    ///
    /// [`CoreError::SequenceOverflow`] at `u64::MAX`.
    pub fn next_sequence(&mut self) -> CoreResult<u64> {
        let next = self
            .sequence()?
            .checked_add(1)
            .ok_or(CoreError::SequenceOverflow)?;
        self.set_sequence(next)?;
        Ok(next)
    }

    /// Sets how full split pages are filled at commit, clamped to
    /// `0.1..=1.0`. Applies to this transaction only.
    pub fn set_fill_percent(&mut self, fill_percent: f64) -> CoreResult<()> {
        self.tx.set_fill_percent_at(&self.path, fill_percent)
    }

    /// Creates a cursor over the bucket's current contents.
    pub fn cursor(&self) -> CoreResult<Cursor<'_>> {
        let root = self.tx.root_at(&self.path)?;
        Ok(Cursor::new(&*self.tx, root))
    }

    /// Calls `f` for every key in order; nested buckets get a `None` value.
    pub fn for_each<F>(&self, f: F) -> CoreResult<()>
    where
        F: FnMut(&[u8], Option<&[u8]>) -> CoreResult<()>,
    {
        for_each_entry(self.cursor()?, f)
    }

    /// Collects statistics over the bucket and its nested buckets.
    pub fn stats(&self) -> CoreResult<BucketStats> {
        let root = self.tx.root_at(&self.path)?;
        collect_stats(&*self.tx, &self.path, root)
    }

    fn child_path(&self, name: &[u8]) -> Vec<Vec<u8>> {
        let mut path = self.path.clone();
        path.push(name.to_vec());
        path
    }
}

/// Splits a separator-joined path into bucket names and the final key.
///
/// `b"users:1"` with `b':'` yields `(["users"], "1")`.
pub(crate) fn split_path(path: &[u8], separator: u8) -> CoreResult<(Vec<Vec<u8>>, Vec<u8>)> {
    let mut parts: Vec<Vec<u8>> = path
        .split(|&b| b == separator)
        .map(<[u8]>::to_vec)
        .collect();
    let key = parts.pop().unwrap_or_default();

    if parts.is_empty() || parts.iter().any(Vec::is_empty) {
        return Err(CoreError::BucketNameRequired);
    }
    if key.is_empty() {
        return Err(CoreError::KeyRequired);
    }
    Ok((parts, key))
}
