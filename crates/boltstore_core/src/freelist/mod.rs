//! Free page tracking.
//!
//! Pages released by a commit cannot be reused right away: a read
//! transaction started before the commit may still be walking them. They
//! are kept *pending* under the id of the transaction that freed them, and
//! only move to the free index once no open reader can see them.
//!
//! ## Encodings
//!
//! | Type | Allocation | Notes |
//! |------|------------|-------|
//! | [`FreelistType::Array`] | linear scan | always the lowest id |
//! | [`FreelistType::HashMap`] | span lookup | faster, id not minimal |
//!
//! Both persist to the same page format: a freelist page whose elements are
//! the sorted free and pending ids. When there are `0xFFFF` ids or more, the
//! header count is `0xFFFF` and the real count is stored in the first
//! element.

mod array;
mod hashmap;

use crate::config::FreelistType;
use crate::error::{CoreError, CoreResult};
use crate::page::{read_u64, PageHeader, PageType, PAGE_HEADER_SIZE};
use crate::types::{PageId, TransactionId};
use array::ArrayIndex;
use hashmap::HashMapIndex;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Index of pages that are free right now.
pub(crate) trait FreeIndex: Send {
    /// Number of free pages.
    fn free_count(&self) -> usize;

    /// Takes `n` contiguous pages, returning the first id.
    fn allocate(&mut self, n: usize) -> Option<PageId>;

    /// Adds pages to the index.
    fn merge(&mut self, ids: &[PageId]);

    /// All free ids in ascending order.
    fn ids(&self) -> Vec<PageId>;

    /// Replaces the contents of the index.
    fn reset(&mut self, ids: &[PageId]);
}

#[derive(Debug, Default)]
struct TxPending {
    ids: Vec<PageId>,
    /// Transaction that allocated each id, 0 when unknown.
    alloc_tx: Vec<TransactionId>,
}

/// Free and pending pages of a database.
pub(crate) struct Freelist {
    kind: FreelistType,
    index: Box<dyn FreeIndex>,
    pending: BTreeMap<TransactionId, TxPending>,
    /// First page of each run allocated since open -> allocating transaction.
    allocs: HashMap<PageId, TransactionId>,
    /// Every free or pending id.
    cache: HashSet<PageId>,
}

impl std::fmt::Debug for Freelist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Freelist")
            .field("kind", &self.kind)
            .field("free", &self.free_count())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl Freelist {
    pub fn new(kind: FreelistType) -> Self {
        let index: Box<dyn FreeIndex> = match kind {
            FreelistType::Array => Box::<ArrayIndex>::default(),
            FreelistType::HashMap => Box::<HashMapIndex>::default(),
        };
        Self {
            kind,
            index,
            pending: BTreeMap::new(),
            allocs: HashMap::new(),
            cache: HashSet::new(),
        }
    }

    pub fn kind(&self) -> FreelistType {
        self.kind
    }

    pub fn free_count(&self) -> usize {
        self.index.free_count()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().map(|p| p.ids.len()).sum()
    }

    /// Free plus pending pages.
    pub fn count(&self) -> usize {
        self.free_count() + self.pending_count()
    }

    /// Allocates `n` contiguous free pages for transaction `txid`.
    pub fn allocate(&mut self, txid: TransactionId, n: usize) -> Option<PageId> {
        let start = self.index.allocate(n)?;
        for id in start..start + n as u64 {
            self.cache.remove(&id);
        }
        self.allocs.insert(start, txid);
        Some(start)
    }

    /// Marks a page and its overflow as freed by `txid`.
    pub fn free(&mut self, txid: TransactionId, pgid: PageId, overflow: u32) -> CoreResult<()> {
        if pgid <= 1 {
            return Err(CoreError::corrupted(format!("cannot free meta page {pgid}")));
        }

        let alloc_tx = self.allocs.remove(&pgid).unwrap_or_default();
        let pending = self.pending.entry(txid).or_default();
        for id in pgid..=pgid + u64::from(overflow) {
            if !self.cache.insert(id) {
                return Err(CoreError::corrupted(format!("page {id} already freed")));
            }
            pending.ids.push(id);
            pending.alloc_tx.push(alloc_tx);
        }
        Ok(())
    }

    /// Moves pages freed by transactions `<= txid` to the free index.
    pub fn release(&mut self, txid: TransactionId) {
        let keep = match txid.as_u64().checked_add(1) {
            Some(next) => self.pending.split_off(&TransactionId::new(next)),
            None => BTreeMap::new(),
        };
        let released = std::mem::replace(&mut self.pending, keep);

        let mut ids: Vec<PageId> = released.into_values().flat_map(|p| p.ids).collect();
        ids.sort_unstable();
        self.index.merge(&ids);
    }

    /// Releases pending pages whose whole lifetime lies inside
    /// `begin..=end`: freed by a transaction in the range and allocated by
    /// one in the range.
    pub fn release_range(&mut self, begin: TransactionId, end: TransactionId) {
        if begin > end {
            return;
        }

        let mut ids = Vec::new();
        let mut emptied = Vec::new();
        for (&tid, pending) in self.pending.range_mut(begin..=end) {
            let mut kept = TxPending::default();
            for (&id, &alloc_tx) in pending.ids.iter().zip(&pending.alloc_tx) {
                if begin <= alloc_tx && alloc_tx <= end {
                    ids.push(id);
                } else {
                    kept.ids.push(id);
                    kept.alloc_tx.push(alloc_tx);
                }
            }
            if kept.ids.is_empty() {
                emptied.push(tid);
            }
            *pending = kept;
        }
        for tid in emptied {
            self.pending.remove(&tid);
        }

        ids.sort_unstable();
        self.index.merge(&ids);
    }

    /// Undoes the freelist effects of an aborted commit.
    ///
    /// Pages `txid` freed are no longer pending, and the runs it took from
    /// the free index (`allocated`, as `(start, len)`) go back.
    pub fn rollback(&mut self, txid: TransactionId, allocated: &[(PageId, usize)]) {
        if let Some(pending) = self.pending.remove(&txid) {
            for id in pending.ids {
                self.cache.remove(&id);
            }
        }

        let mut ids = Vec::new();
        for &(start, len) in allocated {
            self.allocs.remove(&start);
            for id in start..start + len as u64 {
                self.cache.insert(id);
                ids.push(id);
            }
        }
        ids.sort_unstable();
        self.index.merge(&ids);
    }

    /// Returns true if the page is free or pending.
    #[cfg(test)]
    pub fn freed(&self, pgid: PageId) -> bool {
        self.cache.contains(&pgid)
    }

    /// Replaces the free pages, keeping pending ones.
    pub fn reload(&mut self, ids: &[PageId]) {
        let pending: HashSet<PageId> = self
            .pending
            .values()
            .flat_map(|p| p.ids.iter().copied())
            .collect();
        let free: Vec<PageId> = ids
            .iter()
            .copied()
            .filter(|id| !pending.contains(id))
            .collect();

        self.index.reset(&free);
        self.cache = pending;
        self.cache.extend(free);
    }

    /// Loads the free pages from a freelist page.
    pub fn read(&mut self, page: &[u8]) -> CoreResult<()> {
        let ids = decode_ids(page)?;
        self.reload(&ids);
        Ok(())
    }

    /// Free and pending ids in ascending order; what gets persisted.
    pub fn all_ids(&self) -> Vec<PageId> {
        let mut ids = self.index.ids();
        for pending in self.pending.values() {
            ids.extend_from_slice(&pending.ids);
        }
        ids.sort_unstable();
        ids
    }

    /// Bytes needed to write the freelist page.
    pub fn estimated_size(&self) -> usize {
        let mut n = self.count();
        if n >= 0xFFFF {
            n += 1;
        }
        PAGE_HEADER_SIZE + n * 8
    }

    /// Encodes the freelist as page `pgid`, padded to whole pages.
    pub fn encode(&self, pgid: PageId, page_size: usize) -> CoreResult<Vec<u8>> {
        let ids = self.all_ids();
        let size = self.estimated_size();
        let pages = size.div_ceil(page_size).max(1);
        let overflow = u32::try_from(pages - 1)
            .map_err(|_| CoreError::corrupted("freelist too large to encode"))?;

        let (count, mut offset) = if ids.len() < 0xFFFF {
            (ids.len() as u16, PAGE_HEADER_SIZE)
        } else {
            (0xFFFF, PAGE_HEADER_SIZE + 8)
        };

        let mut buf = vec![0u8; pages * page_size];
        let header = PageHeader {
            id: pgid,
            page_type: PageType::Freelist,
            count,
            overflow,
        };
        buf[..PAGE_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        if count == 0xFFFF {
            buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + 8]
                .copy_from_slice(&(ids.len() as u64).to_le_bytes());
        }
        for id in ids {
            buf[offset..offset + 8].copy_from_slice(&id.to_le_bytes());
            offset += 8;
        }
        Ok(buf)
    }
}

/// Decodes the ids stored in a freelist page.
pub(crate) fn decode_ids(page: &[u8]) -> CoreResult<Vec<PageId>> {
    let header = PageHeader::from_bytes(page)?;
    if header.page_type != PageType::Freelist {
        return Err(CoreError::corrupted(format!(
            "page {} is not a freelist page",
            header.id
        )));
    }

    let mut offset = PAGE_HEADER_SIZE;
    let mut count = usize::from(header.count);
    if count == 0xFFFF {
        if page.len() < offset + 8 {
            return Err(CoreError::corrupted("freelist count truncated"));
        }
        count = read_u64(page, offset) as usize;
        offset += 8;
    }
    if page.len() < offset + count * 8 {
        return Err(CoreError::corrupted(format!(
            "freelist page {} holds fewer than {count} ids",
            header.id
        )));
    }

    Ok((0..count).map(|i| read_u64(page, offset + i * 8)).collect())
}
