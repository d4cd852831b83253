use super::{root_child, tree_get, TxView, DEFAULT_FILL_PERCENT, MAX_FILL_PERCENT, MIN_FILL_PERCENT};
use crate::bucket::{split_path, Bucket, BucketMut};
use crate::cursor::Cursor;
use crate::database::Db;
use crate::error::{CoreError, CoreResult};
use crate::node::{branch_index, leaf_search, BranchEntry, Child, LeafEntry, Node};
use crate::page::{
    BucketHeader, Meta, PageHeader, BUCKET_LEAF_FLAG, FREELIST_NONE, MAX_KEY_SIZE, MAX_VALUE_SIZE,
    PAGE_HEADER_SIZE,
};
use crate::stats::TxStats;
use crate::types::{PageId, TransactionId};
use parking_lot::MutexGuard;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{debug, warn};

/// Uncommitted state of a bucket touched by the transaction.
#[derive(Debug, Clone)]
struct BucketState {
    root: Option<Child>,
    sequence: u64,
    dirty: bool,
    fill_percent: f64,
}

impl BucketState {
    fn clean(header: BucketHeader) -> Self {
        Self {
            root: root_child(header.root),
            sequence: header.sequence,
            dirty: false,
            fill_percent: DEFAULT_FILL_PERCENT,
        }
    }
}

/// The read-write transaction.
///
/// Only one exists at a time; [`Db::begin_write`] blocks until the previous
/// one is committed or rolled back. Changes are made on private copies of
/// the touched nodes and become visible to new readers when
/// [`commit`](WriteTx::commit) publishes a new meta page. Dropping the
/// transaction without committing rolls it back.
pub struct WriteTx<'db> {
    db: &'db Db,
    _writer: MutexGuard<'db, ()>,
    /// Meta being built; `txid` is already the new id.
    meta: Meta,
    page_size: usize,
    /// Materialized nodes, addressed by [`Child::Node`].
    arena: Vec<Node>,
    /// Buckets read or changed so far, keyed by name path. The root bucket
    /// has the empty path.
    buckets: HashMap<Vec<Vec<u8>>, BucketState>,
    /// Committed pages replaced by this transaction, with their overflow.
    freed: Vec<(PageId, u32)>,
    /// Runs taken from the freelist during commit.
    allocated: Vec<(PageId, usize)>,
    /// Encoded pages waiting to be written.
    pages: BTreeMap<PageId, Vec<u8>>,
    stats: TxStats,
    finished: bool,
}

impl std::fmt::Debug for WriteTx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTx")
            .field("txid", &self.meta.txid)
            .field("nodes", &self.arena.len())
            .field("buckets", &self.buckets.len())
            .finish_non_exhaustive()
    }
}

impl<'db> WriteTx<'db> {
    pub(crate) fn new(db: &'db Db, writer: MutexGuard<'db, ()>, base: Meta) -> Self {
        let mut meta = base;
        meta.txid = base.txid.next();

        let mut buckets = HashMap::new();
        buckets.insert(Vec::new(), BucketState::clean(base.root));

        Self {
            db,
            _writer: writer,
            meta,
            page_size: db.page_size(),
            arena: Vec::new(),
            buckets,
            freed: Vec::new(),
            allocated: Vec::new(),
            pages: BTreeMap::new(),
            stats: TxStats::default(),
            finished: false,
        }
    }

    /// Id this transaction commits as.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.meta.txid
    }

    /// Counters collected so far.
    #[must_use]
    pub fn stats(&self) -> &TxStats {
        &self.stats
    }

    /// Read-only view of the top-level bucket `name`.
    pub fn bucket(&self, name: &[u8]) -> CoreResult<Option<Bucket<'_>>> {
        self.bucket_view(&[], name)
    }

    /// Writable handle to the top-level bucket `name`, if it exists.
    pub fn bucket_mut(&mut self, name: &[u8]) -> CoreResult<Option<BucketMut<'_, 'db>>> {
        let path = vec![name.to_vec()];
        if !self.bucket_exists(&path)? {
            return Ok(None);
        }
        Ok(Some(BucketMut::new(self, path)))
    }

    /// Creates the top-level bucket `name`.
    ///
    /// # Errors
    ///
    /// [`CoreError::BucketExists`] if it already exists,
    /// [`CoreError::BucketNameRequired`] for an empty name.
    pub fn create_bucket(&mut self, name: &[u8]) -> CoreResult<BucketMut<'_, 'db>> {
        self.create_bucket_at(&[], name, false)?;
        Ok(BucketMut::new(self, vec![name.to_vec()]))
    }

    /// Creates the top-level bucket `name` unless it already exists.
    pub fn create_bucket_if_not_exists(&mut self, name: &[u8]) -> CoreResult<BucketMut<'_, 'db>> {
        self.create_bucket_at(&[], name, true)?;
        Ok(BucketMut::new(self, vec![name.to_vec()]))
    }

    /// Deletes the top-level bucket `name` and all its contents.
    ///
    /// # Errors
    ///
    /// [`CoreError::BucketNotFound`] if it does not exist.
    pub fn delete_bucket(&mut self, name: &[u8]) -> CoreResult<()> {
        self.delete_bucket_at(&[], name)
    }

    /// Cursor over the names of the top-level buckets.
    pub fn cursor(&self) -> CoreResult<Cursor<'_>> {
        Ok(Cursor::new(self, self.root_at(&[])?))
    }

    /// Sets a value by separator-joined path, creating missing buckets.
    ///
    /// `put_path(b"users:1", b"alice")` stores `1 -> alice` in bucket
    /// `users`.
    pub fn put_path(&mut self, path: &[u8], value: &[u8]) -> CoreResult<()> {
        let (buckets, key) = split_path(path, self.db.options().bucket_separator)?;
        for depth in 0..buckets.len() {
            self.create_bucket_at(&buckets[..depth], &buckets[depth], true)?;
        }
        self.put_at(&buckets, &key, value)
    }

    /// Looks up a value by separator-joined path.
    pub fn get_path(&self, path: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let (buckets, key) = split_path(path, self.db.options().bucket_separator)?;
        let Some((first, rest)) = buckets.split_first() else {
            return Ok(None);
        };
        let Some(mut bucket) = self.bucket(first)? else {
            return Ok(None);
        };
        for name in rest {
            match bucket.bucket(name)? {
                Some(child) => bucket = child,
                None => return Ok(None),
            }
        }
        bucket.get(&key)
    }

    /// Removes a value by separator-joined path.
    ///
    /// # Errors
    ///
    /// [`CoreError::BucketNotFound`] if a bucket on the path is missing.
    pub fn delete_path(&mut self, path: &[u8]) -> CoreResult<()> {
        let (buckets, key) = split_path(path, self.db.options().bucket_separator)?;
        if !self.bucket_exists(&buckets)? {
            return Err(CoreError::BucketNotFound);
        }
        self.delete_at(&buckets, &key)
    }

    /// Writes all changes and publishes them.
    ///
    /// On failure nothing is published: the freelist is restored and the
    /// database stays at the previous commit.
    pub fn commit(mut self) -> CoreResult<()> {
        let started = Instant::now();
        self.finished = true;

        match self.write_commit() {
            Ok(()) => {
                self.stats.commit_time = started.elapsed();
                self.db.stats_counters().record_commit(&self.stats);
                debug!(
                    txid = %self.meta.txid,
                    pages = self.stats.pages_written,
                    high_water = self.meta.pgid,
                    "Committed write transaction"
                );
                Ok(())
            }
            Err(e) => {
                self.db
                    .freelist()
                    .lock()
                    .rollback(self.meta.txid, &self.allocated);
                self.db.stats_counters().record_rollback();
                warn!(txid = %self.meta.txid, error = %e, "Commit failed, rolled back");
                Err(e)
            }
        }
    }

    /// Discards all changes.
    pub fn rollback(mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.db.stats_counters().record_rollback();
        debug!(txid = %self.meta.txid, "Rolled back write transaction");
    }

    fn write_commit(&mut self) -> CoreResult<()> {
        let db = self.db;
        let open = db.open_guard();
        if !*open {
            return Err(CoreError::TxClosed);
        }

        self.spill()?;

        let txid = self.meta.txid;
        {
            let mut freelist = self.db.freelist().lock();
            for (pgid, overflow) in self.freed.drain(..) {
                freelist.free(txid, pgid, overflow)?;
            }
            if self.meta.freelist != FREELIST_NONE {
                let header = self.db.pages().header(self.meta.freelist)?;
                freelist.free(txid, self.meta.freelist, header.overflow)?;
            }
        }

        if self.db.options().no_freelist_sync {
            self.meta.freelist = FREELIST_NONE;
        } else {
            self.write_freelist()?;
        }

        self.db.write_pages(&self.pages, self.meta.pgid)?;
        self.db.write_meta(&self.meta)?;

        self.stats.pages_written = self
            .pages
            .values()
            .map(|p| (p.len() / self.page_size) as u64)
            .sum();
        self.stats.bytes_written = self.pages.values().map(|p| p.len() as u64).sum();

        self.db.publish(self.meta);
        Ok(())
    }

    fn write_freelist(&mut self) -> CoreResult<()> {
        let size = self.db.freelist().lock().estimated_size();
        let count = size.div_ceil(self.page_size).max(1);
        let pgid = self.allocate(count)?;

        let mut page = self.db.freelist().lock().encode(pgid, self.page_size)?;
        // Allocation may shrink the freelist below the estimate; the page
        // still has to cover every allocated page so it is freed whole.
        if page.len() < count * self.page_size {
            page.resize(count * self.page_size, 0);
            let mut header = PageHeader::from_bytes(&page)?;
            header.overflow = (count - 1) as u32;
            page[..PAGE_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        }

        self.pages.insert(pgid, page);
        self.meta.freelist = pgid;
        Ok(())
    }

    // ---- bucket plumbing used by `BucketMut` ----

    pub(crate) fn bucket_exists(&mut self, path: &[Vec<u8>]) -> CoreResult<bool> {
        self.load_bucket(path)
    }

    pub(crate) fn bucket_view(&self, path: &[Vec<u8>], name: &[u8]) -> CoreResult<Option<Bucket<'_>>> {
        let mut child = path.to_vec();
        child.push(name.to_vec());
        Bucket::open(self, self.root_at(path)?, child)
    }

    pub(crate) fn root_at(&self, path: &[Vec<u8>]) -> CoreResult<Option<Child>> {
        Ok(self.state(path)?.root)
    }

    pub(crate) fn sequence_at(&self, path: &[Vec<u8>]) -> CoreResult<u64> {
        Ok(self.state(path)?.sequence)
    }

    pub(crate) fn set_sequence_at(&mut self, path: &[Vec<u8>], sequence: u64) -> CoreResult<()> {
        let state = self.state_mut(path)?;
        state.sequence = sequence;
        state.dirty = true;
        Ok(())
    }

    pub(crate) fn set_fill_percent_at(&mut self, path: &[Vec<u8>], fill_percent: f64) -> CoreResult<()> {
        self.state_mut(path)?.fill_percent = fill_percent.clamp(MIN_FILL_PERCENT, MAX_FILL_PERCENT);
        Ok(())
    }

    pub(crate) fn entry_at(&self, path: &[Vec<u8>], key: &[u8]) -> CoreResult<Option<LeafEntry>> {
        tree_get(self, self.root_at(path)?, key)
    }

    pub(crate) fn put_at(&mut self, path: &[Vec<u8>], key: &[u8], value: &[u8]) -> CoreResult<()> {
        validate_key(key)?;
        if value.len() > MAX_VALUE_SIZE {
            return Err(CoreError::value_too_large(value.len(), MAX_VALUE_SIZE));
        }
        if path.is_empty() {
            return Err(CoreError::IncompatibleValue);
        }
        if !self.load_bucket(path)? {
            return Err(CoreError::BucketNotFound);
        }
        if matches!(self.entry_at(path, key)?, Some(e) if e.is_bucket()) {
            return Err(CoreError::IncompatibleValue);
        }

        self.set_leaf_entry(
            path,
            LeafEntry {
                flags: 0,
                key: key.to_vec(),
                value: value.to_vec(),
            },
        )
    }

    pub(crate) fn delete_at(&mut self, path: &[Vec<u8>], key: &[u8]) -> CoreResult<()> {
        if !self.load_bucket(path)? {
            return Err(CoreError::BucketNotFound);
        }
        match self.entry_at(path, key)? {
            None => Ok(()),
            Some(e) if e.is_bucket() => Err(CoreError::IncompatibleValue),
            Some(_) => {
                self.remove_leaf_entry(path, key)?;
                Ok(())
            }
        }
    }

    pub(crate) fn create_bucket_at(
        &mut self,
        parent: &[Vec<u8>],
        name: &[u8],
        if_not_exists: bool,
    ) -> CoreResult<()> {
        if name.is_empty() {
            return Err(CoreError::BucketNameRequired);
        }
        if name.len() > MAX_KEY_SIZE {
            return Err(CoreError::key_too_large(name.len(), MAX_KEY_SIZE));
        }
        if !self.load_bucket(parent)? {
            return Err(CoreError::BucketNotFound);
        }

        let mut path = parent.to_vec();
        path.push(name.to_vec());
        if self.load_bucket(&path)? {
            return if if_not_exists {
                Ok(())
            } else {
                Err(CoreError::BucketExists)
            };
        }
        if self.entry_at(parent, name)?.is_some() {
            return Err(CoreError::IncompatibleValue);
        }

        self.set_leaf_entry(
            parent,
            LeafEntry {
                flags: BUCKET_LEAF_FLAG,
                key: name.to_vec(),
                value: BucketHeader::default().to_bytes().to_vec(),
            },
        )?;
        self.buckets.insert(
            path,
            BucketState {
                root: None,
                sequence: 0,
                dirty: true,
                fill_percent: DEFAULT_FILL_PERCENT,
            },
        );
        Ok(())
    }

    pub(crate) fn delete_bucket_at(&mut self, parent: &[Vec<u8>], name: &[u8]) -> CoreResult<()> {
        if name.is_empty() {
            return Err(CoreError::BucketNameRequired);
        }
        if !self.load_bucket(parent)? {
            return Err(CoreError::BucketNotFound);
        }

        let mut path = parent.to_vec();
        path.push(name.to_vec());
        if !self.load_bucket(&path)? {
            return match self.entry_at(parent, name)? {
                Some(_) => Err(CoreError::IncompatibleValue),
                None => Err(CoreError::BucketNotFound),
            };
        }

        self.free_bucket(&path)?;
        self.buckets.retain(|p, _| !p.starts_with(&path));
        self.remove_leaf_entry(parent, name)?;
        Ok(())
    }

    // ---- bucket state ----

    fn state(&self, path: &[Vec<u8>]) -> CoreResult<&BucketState> {
        self.buckets.get(path).ok_or(CoreError::BucketNotFound)
    }

    fn state_mut(&mut self, path: &[Vec<u8>]) -> CoreResult<&mut BucketState> {
        self.buckets.get_mut(path).ok_or(CoreError::BucketNotFound)
    }

    /// Caches the state of the bucket at `path`. Returns false if there is
    /// no such bucket.
    fn load_bucket(&mut self, path: &[Vec<u8>]) -> CoreResult<bool> {
        if self.buckets.contains_key(path) {
            return Ok(true);
        }
        let Some((name, parent)) = path.split_last() else {
            return Ok(false);
        };
        if !self.load_bucket(parent)? {
            return Ok(false);
        }

        match self.entry_at(parent, name)? {
            Some(entry) if entry.is_bucket() => {
                let header = BucketHeader::from_bytes(&entry.value)?;
                self.buckets.insert(path.to_vec(), BucketState::clean(header));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Frees every page of the bucket at `path` and of its nested buckets.
    fn free_bucket(&mut self, path: &[Vec<u8>]) -> CoreResult<()> {
        let Some(root) = self.root_at(path)? else {
            return Ok(());
        };

        let mut nested = Vec::new();
        let mut stack = vec![root];
        while let Some(child) = stack.pop() {
            let node = match child {
                Child::Page(pgid) => {
                    let (node, header) = self.db.pages().node(pgid)?;
                    self.freed.push((pgid, header.overflow));
                    Cow::Owned(node)
                }
                Child::Node(idx) => Cow::Borrowed(self.arena_node(idx)?),
            };
            match node.as_ref() {
                Node::Branch(entries) => stack.extend(entries.iter().map(|e| e.child)),
                Node::Leaf(entries) => nested.extend(
                    entries
                        .iter()
                        .filter(|e| e.is_bucket())
                        .map(|e| e.key.clone()),
                ),
            }
        }

        for name in nested {
            let mut child = path.to_vec();
            child.push(name);
            if self.load_bucket(&child)? {
                self.free_bucket(&child)?;
            }
        }
        Ok(())
    }

    fn mark_dirty(&mut self, path: &[Vec<u8>]) {
        if let Some(state) = self.buckets.get_mut(path) {
            state.dirty = true;
        }
    }

    // ---- node materialization ----

    fn arena_node(&self, idx: usize) -> CoreResult<&Node> {
        self.arena
            .get(idx)
            .ok_or_else(|| CoreError::corrupted(format!("node {idx} missing from arena")))
    }

    fn push_node(&mut self, node: Node) -> usize {
        self.arena.push(node);
        self.arena.len() - 1
    }

    /// Returns the arena index of `child`, copying its page into the arena
    /// and scheduling the page to be freed if needed.
    fn materialize(&mut self, child: Child) -> CoreResult<usize> {
        match child {
            Child::Node(idx) => Ok(idx),
            Child::Page(pgid) => {
                let (node, header) = self.db.pages().node(pgid)?;
                self.freed.push((pgid, header.overflow));
                self.stats.nodes_materialized += 1;
                Ok(self.push_node(node))
            }
        }
    }

    /// Materializes the path from the bucket root to the leaf for `key`.
    fn materialize_leaf(&mut self, path: &[Vec<u8>], key: &[u8]) -> CoreResult<usize> {
        let mut idx = match self.root_at(path)? {
            Some(root) => self.materialize(root)?,
            None => self.push_node(Node::default()),
        };
        self.state_mut(path)?.root = Some(Child::Node(idx));

        loop {
            let (slot, child) = match self.arena_node(idx)? {
                Node::Leaf(_) => return Ok(idx),
                Node::Branch(entries) if entries.is_empty() => {
                    return Err(CoreError::corrupted("empty branch node"));
                }
                Node::Branch(entries) => {
                    let slot = branch_index(entries, key);
                    (slot, entries[slot].child)
                }
            };
            let next = self.materialize(child)?;
            if let Node::Branch(entries) = &mut self.arena[idx] {
                entries[slot].child = Child::Node(next);
            }
            idx = next;
        }
    }

    /// Inserts or replaces a leaf entry.
    fn set_leaf_entry(&mut self, path: &[Vec<u8>], entry: LeafEntry) -> CoreResult<()> {
        let leaf = self.materialize_leaf(path, &entry.key)?;
        let Node::Leaf(entries) = &mut self.arena[leaf] else {
            return Err(CoreError::corrupted("expected a leaf node"));
        };
        match leaf_search(entries, &entry.key) {
            Ok(i) => entries[i] = entry,
            Err(i) => entries.insert(i, entry),
        }
        self.mark_dirty(path);
        Ok(())
    }

    fn remove_leaf_entry(&mut self, path: &[Vec<u8>], key: &[u8]) -> CoreResult<Option<LeafEntry>> {
        let leaf = self.materialize_leaf(path, key)?;
        let Node::Leaf(entries) = &mut self.arena[leaf] else {
            return Err(CoreError::corrupted("expected a leaf node"));
        };
        let removed = leaf_search(entries, key).ok().map(|i| entries.remove(i));
        self.mark_dirty(path);
        Ok(removed)
    }

    // ---- spill ----

    /// Writes every dirty bucket, deepest first, and stores the new bucket
    /// headers in their parents. The root bucket's header goes to the meta.
    fn spill(&mut self) -> CoreResult<()> {
        let max_depth = self.buckets.keys().map(Vec::len).max().unwrap_or(0);

        for depth in (0..=max_depth).rev() {
            let mut paths: Vec<Vec<Vec<u8>>> = self
                .buckets
                .iter()
                .filter(|(p, s)| p.len() == depth && s.dirty)
                .map(|(p, _)| p.clone())
                .collect();
            paths.sort();

            for path in paths {
                let (root, fill_percent) = {
                    let state = self.state(&path)?;
                    (state.root, state.fill_percent)
                };
                let root = match root {
                    Some(Child::Node(idx)) => self.spill_root(idx, fill_percent)?,
                    other => other,
                };

                let state = self.state_mut(&path)?;
                state.root = root;
                state.dirty = false;
                let header = BucketHeader {
                    root: match root {
                        None => 0,
                        Some(Child::Page(pgid)) => pgid,
                        Some(Child::Node(_)) => {
                            return Err(CoreError::corrupted("bucket root was not spilled"))
                        }
                    },
                    sequence: state.sequence,
                };

                match path.split_last() {
                    None => self.meta.root = header,
                    Some((name, parent)) => self.set_leaf_entry(
                        parent,
                        LeafEntry {
                            flags: BUCKET_LEAF_FLAG,
                            key: name.clone(),
                            value: header.to_bytes().to_vec(),
                        },
                    )?,
                }
            }
        }
        Ok(())
    }

    /// Spills a bucket's root node and returns the new root.
    ///
    /// A root that splits gets a new branch above it, repeatedly, until a
    /// single page is left.
    fn spill_root(&mut self, idx: usize, fill_percent: f64) -> CoreResult<Option<Child>> {
        let mut entries = self.spill_node(idx, fill_percent, true)?;
        loop {
            match entries.len() {
                0 => return Ok(None),
                1 => return Ok(entries.pop().map(|e| e.child)),
                _ => entries = self.write_node(Node::Branch(entries), fill_percent)?,
            }
        }
    }

    /// Writes the subtree under arena node `idx` and returns the parent
    /// entries pointing at the written pages.
    fn spill_node(
        &mut self,
        idx: usize,
        fill_percent: f64,
        is_root: bool,
    ) -> CoreResult<Vec<BranchEntry>> {
        self.arena_node(idx)?;
        let node = std::mem::take(&mut self.arena[idx]);

        match node {
            Node::Leaf(ref entries) if entries.is_empty() => Ok(Vec::new()),
            Node::Leaf(_) => self.write_node(node, fill_percent),
            Node::Branch(entries) => {
                let entries = self.merge_siblings(entries);
                let mut children = Vec::with_capacity(entries.len());
                for entry in entries {
                    match entry.child {
                        Child::Page(_) => children.push(entry),
                        Child::Node(child) => {
                            children.extend(self.spill_node(child, fill_percent, false)?);
                        }
                    }
                }

                if children.is_empty() || (is_root && children.len() == 1) {
                    return Ok(children);
                }
                self.write_node(Node::Branch(children), fill_percent)
            }
        }
    }

    /// Merges adjacent materialized siblings when one of them is small and
    /// both fit in one page together.
    fn merge_siblings(&mut self, entries: Vec<BranchEntry>) -> Vec<BranchEntry> {
        let min_size = self.page_size / 4;
        let mut merged: Vec<BranchEntry> = Vec::with_capacity(entries.len());

        for entry in entries {
            let left = match merged.last() {
                Some(BranchEntry {
                    child: Child::Node(left),
                    ..
                }) => Some(*left),
                _ => None,
            };
            if let (Some(left), Child::Node(right)) = (left, entry.child) {
                let (l, r) = (&self.arena[left], &self.arena[right]);
                let combined = l.size() + r.size() - PAGE_HEADER_SIZE;
                if l.is_leaf() == r.is_leaf()
                    && (l.size() < min_size || r.size() < min_size)
                    && combined <= self.page_size
                {
                    let right = std::mem::take(&mut self.arena[right]);
                    self.arena[left].append(right);
                    self.stats.merges += 1;
                    continue;
                }
            }
            merged.push(entry);
        }
        merged
    }

    /// Splits `node` to fit the page size and writes each piece to newly
    /// allocated pages.
    fn write_node(&mut self, node: Node, fill_percent: f64) -> CoreResult<Vec<BranchEntry>> {
        let threshold = (self.page_size as f64 * fill_percent) as usize;
        let pieces = node.split(self.page_size, threshold);
        self.stats.splits += pieces.len().saturating_sub(1) as u64;

        let mut entries = Vec::with_capacity(pieces.len());
        for piece in pieces {
            let count = piece.size().div_ceil(self.page_size).max(1);
            let pgid = self.allocate(count)?;
            let page = piece.encode(pgid, self.page_size)?;
            entries.push(BranchEntry {
                key: piece.first_key().map(<[u8]>::to_vec).unwrap_or_default(),
                child: Child::Page(pgid),
            });
            self.pages.insert(pgid, page);
            self.stats.spills += 1;
        }
        Ok(entries)
    }

    /// Allocates `count` contiguous pages, from the freelist if possible,
    /// otherwise past the high-water mark.
    fn allocate(&mut self, count: usize) -> CoreResult<PageId> {
        let reused = self.db.freelist().lock().allocate(self.meta.txid, count);
        let pgid = match reused {
            Some(pgid) => {
                self.allocated.push((pgid, count));
                pgid
            }
            None => {
                let pgid = self.meta.pgid;
                self.meta.pgid = pgid
                    .checked_add(count as u64)
                    .ok_or_else(|| CoreError::corrupted("page id space exhausted"))?;
                pgid
            }
        };
        self.stats.pages_allocated += count as u64;
        Ok(pgid)
    }
}

fn validate_key(key: &[u8]) -> CoreResult<()> {
    if key.is_empty() {
        return Err(CoreError::KeyRequired);
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(CoreError::key_too_large(key.len(), MAX_KEY_SIZE));
    }
    Ok(())
}

impl TxView for WriteTx<'_> {
    fn node(&self, child: Child) -> CoreResult<Cow<'_, Node>> {
        match child {
            Child::Page(pgid) => Ok(Cow::Owned(self.db.pages().node(pgid)?.0)),
            Child::Node(idx) => self.arena_node(idx).map(Cow::Borrowed),
        }
    }

    fn cached_bucket(&self, path: &[Vec<u8>]) -> Option<(Option<Child>, u64)> {
        self.buckets.get(path).map(|s| (s.root, s.sequence))
    }
}

impl Drop for WriteTx<'_> {
    fn drop(&mut self) {
        self.discard();
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Options;
    use crate::database::Db;
    use crate::error::CoreError;

    fn db() -> Db {
        Db::open_in_memory(Options::default().page_size(1024)).unwrap()
    }

    #[test]
    fn put_get_within_transaction() {
        let db = db();
        let mut tx = db.begin_write().unwrap();
        let mut bucket = tx.create_bucket(b"b").unwrap();
        bucket.put(b"k", b"v").unwrap();
        assert_eq!(bucket.get(b"k").unwrap(), Some(b"v".to_vec()));
        tx.commit().unwrap();
    }

    #[test]
    fn rejects_bad_keys_and_values() {
        let db = db();
        let mut tx = db.begin_write().unwrap();
        let mut bucket = tx.create_bucket(b"b").unwrap();

        assert!(matches!(bucket.put(b"", b"v"), Err(CoreError::KeyRequired)));
        let long = vec![0u8; crate::page::MAX_KEY_SIZE + 1];
        assert!(matches!(
            bucket.put(&long, b"v"),
            Err(CoreError::KeyTooLarge { .. })
        ));
    }

    #[test]
    fn bucket_and_value_keys_do_not_mix() {
        let db = db();
        let mut tx = db.begin_write().unwrap();
        let mut bucket = tx.create_bucket(b"b").unwrap();
        bucket.create_bucket(b"child").unwrap();
        bucket.put(b"plain", b"v").unwrap();

        assert!(matches!(
            bucket.put(b"child", b"v"),
            Err(CoreError::IncompatibleValue)
        ));
        assert!(matches!(
            bucket.delete(b"child"),
            Err(CoreError::IncompatibleValue)
        ));
        assert!(matches!(
            bucket.create_bucket(b"plain"),
            Err(CoreError::IncompatibleValue)
        ));
        assert!(matches!(
            bucket.delete_bucket(b"plain"),
            Err(CoreError::IncompatibleValue)
        ));
        assert_eq!(bucket.get(b"child").unwrap(), None);
    }

    #[test]
    fn create_bucket_twice() {
        let db = db();
        let mut tx = db.begin_write().unwrap();
        tx.create_bucket(b"b").unwrap();
        assert!(matches!(
            tx.create_bucket(b"b"),
            Err(CoreError::BucketExists)
        ));
        assert!(tx.create_bucket_if_not_exists(b"b").is_ok());
        assert!(matches!(
            tx.create_bucket(b""),
            Err(CoreError::BucketNameRequired)
        ));
    }

    #[test]
    fn large_commit_splits_and_reads_back() {
        let db = db();
        db.update(|tx| {
            let mut bucket = tx.create_bucket(b"b")?;
            for i in 0..500u32 {
                bucket.put(format!("key{i:05}").as_bytes(), &[7u8; 40])?;
            }
            Ok(())
        })
        .unwrap();

        let stats = db.stats();
        assert!(stats.splits > 0);

        db.view(|tx| {
            let bucket = tx.bucket(b"b")?.unwrap();
            for i in 0..500u32 {
                assert_eq!(
                    bucket.get(format!("key{i:05}").as_bytes())?,
                    Some(vec![7u8; 40])
                );
            }
            assert!(bucket.stats()?.depth >= 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn deleting_everything_empties_the_tree() {
        let db = db();
        db.update(|tx| {
            let mut bucket = tx.create_bucket(b"b")?;
            for i in 0..200u32 {
                bucket.put(&i.to_be_bytes(), b"value")?;
            }
            Ok(())
        })
        .unwrap();
        db.update(|tx| {
            let mut bucket = tx.bucket_mut(b"b")?.unwrap();
            for i in 0..200u32 {
                bucket.delete(&i.to_be_bytes())?;
            }
            Ok(())
        })
        .unwrap();

        db.view(|tx| {
            let bucket = tx.bucket(b"b")?.unwrap();
            assert!(bucket.cursor().first()?.is_none());
            assert_eq!(bucket.stats()?.leaf_nodes, 0);
            Ok(())
        })
        .unwrap();
        assert!(db.check().unwrap().is_empty());
    }

    #[test]
    fn nested_bucket_changes_reach_parent() {
        let db = db();
        db.update(|tx| {
            tx.create_bucket(b"a")?
                .create_bucket(b"b")?
                .put(b"k", b"v")?;
            Ok(())
        })
        .unwrap();
        db.update(|tx| {
            let mut a = tx.bucket_mut(b"a")?.unwrap();
            let mut b = a.bucket_mut(b"b")?.unwrap();
            b.put(b"k2", b"v2")?;
            assert_eq!(b.next_sequence()?, 1);
            Ok(())
        })
        .unwrap();

        db.view(|tx| {
            let b = tx.bucket(b"a")?.unwrap().bucket(b"b")?.unwrap();
            assert_eq!(b.get(b"k")?, Some(b"v".to_vec()));
            assert_eq!(b.get(b"k2")?, Some(b"v2".to_vec()));
            assert_eq!(b.sequence(), 1);
            Ok(())
        })
        .unwrap();
        assert!(db.check().unwrap().is_empty());
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let db = db();
        {
            let mut tx = db.begin_write().unwrap();
            tx.create_bucket(b"b").unwrap();
        }
        let tx = db.begin_read().unwrap();
        assert!(tx.bucket(b"b").unwrap().is_none());
        assert_eq!(db.stats().tx_rolled_back, 1);
    }

    #[test]
    fn fill_percent_is_clamped() {
        let db = db();
        let mut tx = db.begin_write().unwrap();
        let mut bucket = tx.create_bucket(b"b").unwrap();
        bucket.set_fill_percent(5.0).unwrap();
        for i in 0..100u32 {
            bucket.put(&i.to_be_bytes(), &[1u8; 20]).unwrap();
        }
        tx.commit().unwrap();
        assert!(db.check().unwrap().is_empty());
    }
}
