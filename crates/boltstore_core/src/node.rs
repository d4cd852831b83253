//! In-memory B+tree nodes.
//!
//! A write transaction copies every page it modifies into a [`Node`]. At
//! commit the dirty nodes are split to fit the page size and written to
//! freshly allocated pages; the pages they were read from are freed.

use crate::error::{CoreError, CoreResult};
use crate::page::{
    read_u32, read_u64, PageHeader, PageType, BUCKET_LEAF_FLAG, ELEMENT_SIZE, PAGE_HEADER_SIZE,
};
use crate::types::PageId;

/// Reference from a branch entry to its child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Child {
    /// A committed page, not modified by the current transaction.
    Page(PageId),
    /// A node in the write transaction's arena.
    Node(usize),
}

/// A key/value pair stored in a leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LeafEntry {
    pub flags: u32,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl LeafEntry {
    pub fn is_bucket(&self) -> bool {
        self.flags & BUCKET_LEAF_FLAG != 0
    }

    fn encoded_size(&self) -> usize {
        ELEMENT_SIZE + self.key.len() + self.value.len()
    }
}

/// A separator key and the child holding keys `>= key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BranchEntry {
    pub key: Vec<u8>,
    pub child: Child,
}

impl BranchEntry {
    fn encoded_size(&self) -> usize {
        ELEMENT_SIZE + self.key.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    Leaf(Vec<LeafEntry>),
    Branch(Vec<BranchEntry>),
}

impl Default for Node {
    fn default() -> Self {
        Node::Leaf(Vec::new())
    }
}

impl Node {
    pub fn len(&self) -> usize {
        match self {
            Node::Leaf(entries) => entries.len(),
            Node::Branch(entries) => entries.len(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    /// Encoded size in bytes, header included.
    pub fn size(&self) -> usize {
        PAGE_HEADER_SIZE
            + match self {
                Node::Leaf(entries) => entries.iter().map(LeafEntry::encoded_size).sum::<usize>(),
                Node::Branch(entries) => {
                    entries.iter().map(BranchEntry::encoded_size).sum::<usize>()
                }
            }
    }

    pub fn first_key(&self) -> Option<&[u8]> {
        match self {
            Node::Leaf(entries) => entries.first().map(|e| e.key.as_slice()),
            Node::Branch(entries) => entries.first().map(|e| e.key.as_slice()),
        }
    }

    /// Moves all entries of `other` to the end of `self`.
    ///
    /// Both nodes must be of the same kind; `other` must sort after `self`.
    pub fn append(&mut self, other: Node) {
        match (self, other) {
            (Node::Leaf(a), Node::Leaf(mut b)) => a.append(&mut b),
            (Node::Branch(a), Node::Branch(mut b)) => a.append(&mut b),
            _ => {}
        }
    }

    /// Decodes a leaf or branch page. `buf` must hold every overflow page.
    pub fn decode(buf: &[u8]) -> CoreResult<(Node, PageHeader)> {
        let header = PageHeader::from_bytes(buf)?;
        let count = usize::from(header.count);
        if PAGE_HEADER_SIZE + count * ELEMENT_SIZE > buf.len() {
            return Err(CoreError::corrupted(format!(
                "page {}: {count} elements overflow the page",
                header.id
            )));
        }

        let node = match header.page_type {
            PageType::Leaf => {
                let mut entries = Vec::with_capacity(count);
                for i in 0..count {
                    let base = PAGE_HEADER_SIZE + i * ELEMENT_SIZE;
                    let flags = read_u32(buf, base);
                    let pos = read_u32(buf, base + 4) as usize;
                    let ksize = read_u32(buf, base + 8) as usize;
                    let vsize = read_u32(buf, base + 12) as usize;
                    let key_start = base + pos;
                    let key_end = key_start + ksize;
                    let value_end = key_end + vsize;
                    if value_end > buf.len() {
                        return Err(element_out_of_bounds(header.id, i));
                    }
                    entries.push(LeafEntry {
                        flags,
                        key: buf[key_start..key_end].to_vec(),
                        value: buf[key_end..value_end].to_vec(),
                    });
                }
                Node::Leaf(entries)
            }
            PageType::Branch => {
                let mut entries = Vec::with_capacity(count);
                for i in 0..count {
                    let base = PAGE_HEADER_SIZE + i * ELEMENT_SIZE;
                    let pos = read_u32(buf, base) as usize;
                    let ksize = read_u32(buf, base + 4) as usize;
                    let pgid = read_u64(buf, base + 8);
                    let key_start = base + pos;
                    let key_end = key_start + ksize;
                    if key_end > buf.len() {
                        return Err(element_out_of_bounds(header.id, i));
                    }
                    entries.push(BranchEntry {
                        key: buf[key_start..key_end].to_vec(),
                        child: Child::Page(pgid),
                    });
                }
                Node::Branch(entries)
            }
            other => {
                return Err(CoreError::corrupted(format!(
                    "page {}: expected a tree page, found {other:?}",
                    header.id
                )))
            }
        };

        Ok((node, header))
    }

    /// Encodes the node as page `id`, padded to whole pages.
    ///
    /// Branch children must already be committed pages.
    pub fn encode(&self, id: PageId, page_size: usize) -> CoreResult<Vec<u8>> {
        let size = self.size();
        let pages = size.div_ceil(page_size).max(1);
        let count = u16::try_from(self.len())
            .map_err(|_| CoreError::corrupted(format!("node with {} entries", self.len())))?;
        let overflow = u32::try_from(pages - 1)
            .map_err(|_| CoreError::corrupted(format!("node spanning {pages} pages")))?;

        let mut buf = vec![0u8; pages * page_size];
        let header = PageHeader {
            id,
            page_type: if self.is_leaf() {
                PageType::Leaf
            } else {
                PageType::Branch
            },
            count,
            overflow,
        };
        buf[..PAGE_HEADER_SIZE].copy_from_slice(&header.to_bytes());

        let mut data = PAGE_HEADER_SIZE + self.len() * ELEMENT_SIZE;
        match self {
            Node::Leaf(entries) => {
                for (i, entry) in entries.iter().enumerate() {
                    let base = PAGE_HEADER_SIZE + i * ELEMENT_SIZE;
                    put_u32(&mut buf, base, entry.flags);
                    put_u32(&mut buf, base + 4, (data - base) as u32);
                    put_u32(&mut buf, base + 8, entry.key.len() as u32);
                    put_u32(&mut buf, base + 12, entry.value.len() as u32);
                    buf[data..data + entry.key.len()].copy_from_slice(&entry.key);
                    data += entry.key.len();
                    buf[data..data + entry.value.len()].copy_from_slice(&entry.value);
                    data += entry.value.len();
                }
            }
            Node::Branch(entries) => {
                for (i, entry) in entries.iter().enumerate() {
                    let Child::Page(pgid) = entry.child else {
                        return Err(CoreError::corrupted("branch child was not spilled"));
                    };
                    let base = PAGE_HEADER_SIZE + i * ELEMENT_SIZE;
                    put_u32(&mut buf, base, (data - base) as u32);
                    put_u32(&mut buf, base + 4, entry.key.len() as u32);
                    buf[base + 8..base + 16].copy_from_slice(&pgid.to_le_bytes());
                    buf[data..data + entry.key.len()].copy_from_slice(&entry.key);
                    data += entry.key.len();
                }
            }
        }

        Ok(buf)
    }

    /// Splits the node into pieces for writing.
    ///
    /// A node that fits in one page is returned whole. Otherwise pieces are
    /// cut once they pass `threshold` bytes, keeping at least one entry per
    /// leaf and two per branch in every piece.
    pub fn split(self, page_size: usize, threshold: usize) -> Vec<Node> {
        if self.size() <= page_size {
            return vec![self];
        }
        match self {
            Node::Leaf(entries) => split_entries(entries, threshold, 1, LeafEntry::encoded_size)
                .into_iter()
                .map(Node::Leaf)
                .collect(),
            Node::Branch(entries) => {
                split_entries(entries, threshold, 2, BranchEntry::encoded_size)
                    .into_iter()
                    .map(Node::Branch)
                    .collect()
            }
        }
    }
}

fn split_entries<T>(
    entries: Vec<T>,
    threshold: usize,
    min_keys: usize,
    entry_size: impl Fn(&T) -> usize,
) -> Vec<Vec<T>> {
    let mut pieces = Vec::new();
    let mut current = Vec::new();
    let mut size = PAGE_HEADER_SIZE;
    let mut remaining = entries.len();

    for entry in entries {
        let esize = entry_size(&entry);
        if current.len() >= min_keys && size + esize > threshold && remaining >= min_keys {
            pieces.push(std::mem::take(&mut current));
            size = PAGE_HEADER_SIZE;
        }
        size += esize;
        current.push(entry);
        remaining -= 1;
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn element_out_of_bounds(pgid: PageId, index: usize) -> CoreError {
    CoreError::corrupted(format!("page {pgid}: element {index} out of bounds"))
}

/// Position of `key` in a leaf, or where it would be inserted.
pub(crate) fn leaf_search(entries: &[LeafEntry], key: &[u8]) -> Result<usize, usize> {
    entries.binary_search_by(|e| e.key.as_slice().cmp(key))
}

/// Index of the child of a branch that may contain `key`.
pub(crate) fn branch_index(entries: &[BranchEntry], key: &[u8]) -> usize {
    match entries.binary_search_by(|e| e.key.as_slice().cmp(key)) {
        Ok(i) => i,
        Err(0) => 0,
        Err(i) => i - 1,
    }
}
