//! On-disk page format.
//!
//! Every page starts with a 16-byte header:
//!
//! ```text
//! | id: u64 | flags: u16 | count: u16 | overflow: u32 |
//! ```
//!
//! A node larger than one page occupies `overflow + 1` contiguous pages and
//! only the first one carries a header. All integers are little-endian.
//!
//! Pages 0 and 1 hold the two meta copies. The meta of transaction `t` is
//! written to page `t % 2`, so a torn meta write always leaves the previous
//! one intact.

use crate::error::{CoreError, CoreResult};
use crate::types::{PageId, TransactionId};
use xxhash_rust::xxh3::xxh3_64;

/// Size of the page header in bytes.
pub const PAGE_HEADER_SIZE: usize = 16;

/// Size of a leaf or branch element in bytes.
pub const ELEMENT_SIZE: usize = 16;

/// Smallest supported page size.
pub const MIN_PAGE_SIZE: usize = 1024;

/// Largest supported page size.
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

/// Page size used when none is configured.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Magic number identifying a boltstore file.
pub const MAGIC: u32 = 0xED0C_DAED;

/// On-disk format version.
pub const VERSION: u32 = 2;

/// Freelist id recorded in the meta when the freelist is not persisted.
pub const FREELIST_NONE: PageId = u64::MAX;

/// Leaf element flag marking the value as a bucket header.
pub const BUCKET_LEAF_FLAG: u32 = 0x01;

/// Maximum key length in bytes.
pub const MAX_KEY_SIZE: usize = 32_768;

/// Maximum value length in bytes.
pub const MAX_VALUE_SIZE: usize = (1 << 31) - 2;

/// Encoded size of a [`BucketHeader`].
pub const BUCKET_HEADER_SIZE: usize = 16;

/// Encoded size of a [`Meta`], checksum included.
pub const META_SIZE: usize = 64;

/// Returns true if `size` can be used as a page size.
#[must_use]
pub const fn is_valid_page_size(size: usize) -> bool {
    size.is_power_of_two() && size >= MIN_PAGE_SIZE && size <= MAX_PAGE_SIZE
}

/// Kind of a page, stored in the header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PageType {
    /// Interior B+tree node.
    Branch = 0x01,
    /// B+tree leaf.
    Leaf = 0x02,
    /// Meta page.
    Meta = 0x04,
    /// Freelist page.
    Freelist = 0x10,
}

impl PageType {
    /// Decodes header flags.
    pub fn from_flags(flags: u16) -> CoreResult<Self> {
        match flags {
            0x01 => Ok(Self::Branch),
            0x02 => Ok(Self::Leaf),
            0x04 => Ok(Self::Meta),
            0x10 => Ok(Self::Freelist),
            other => Err(CoreError::corrupted(format!(
                "unknown page flags {other:#06x}"
            ))),
        }
    }
}

/// Header at the start of every page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    /// Id of the page.
    pub id: PageId,
    /// Kind of the page.
    pub page_type: PageType,
    /// Number of elements.
    pub count: u16,
    /// Number of additional contiguous pages.
    pub overflow: u32,
}

impl PageHeader {
    /// Encodes the header.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; PAGE_HEADER_SIZE] {
        let mut buf = [0u8; PAGE_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.id.to_le_bytes());
        buf[8..10].copy_from_slice(&(self.page_type as u16).to_le_bytes());
        buf[10..12].copy_from_slice(&self.count.to_le_bytes());
        buf[12..16].copy_from_slice(&self.overflow.to_le_bytes());
        buf
    }

    /// Decodes a header from the start of `buf`.
    pub fn from_bytes(buf: &[u8]) -> CoreResult<Self> {
        if buf.len() < PAGE_HEADER_SIZE {
            return Err(CoreError::corrupted("page shorter than its header"));
        }
        Ok(Self {
            id: read_u64(buf, 0),
            page_type: PageType::from_flags(read_u16(buf, 8))?,
            count: read_u16(buf, 10),
            overflow: read_u32(buf, 12),
        })
    }
}

/// Location and sequence of a bucket's B+tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BucketHeader {
    /// Root page of the bucket tree, 0 when the bucket is empty.
    pub root: PageId,
    /// Monotonic sequence counter of the bucket.
    pub sequence: u64,
}

impl BucketHeader {
    /// Encodes the header as a leaf value.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; BUCKET_HEADER_SIZE] {
        let mut buf = [0u8; BUCKET_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.root.to_le_bytes());
        buf[8..16].copy_from_slice(&self.sequence.to_le_bytes());
        buf
    }

    /// Decodes a header stored in a leaf value.
    pub fn from_bytes(buf: &[u8]) -> CoreResult<Self> {
        if buf.len() < BUCKET_HEADER_SIZE {
            return Err(CoreError::corrupted("bucket header truncated"));
        }
        Ok(Self {
            root: read_u64(buf, 0),
            sequence: read_u64(buf, 8),
        })
    }
}

/// Database meta record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Meta {
    /// Page size of the file.
    pub page_size: u32,
    /// Reserved flags.
    pub flags: u32,
    /// Header of the root bucket.
    pub root: BucketHeader,
    /// Freelist page, or [`FREELIST_NONE`].
    pub freelist: PageId,
    /// High-water mark: first page id never allocated.
    pub pgid: PageId,
    /// Id of the transaction that wrote this meta.
    pub txid: TransactionId,
}

impl Meta {
    /// Encodes the meta record including its checksum.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; META_SIZE] {
        let mut buf = [0u8; META_SIZE];
        buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&self.page_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.flags.to_le_bytes());
        buf[16..32].copy_from_slice(&self.root.to_bytes());
        buf[32..40].copy_from_slice(&self.freelist.to_le_bytes());
        buf[40..48].copy_from_slice(&self.pgid.to_le_bytes());
        buf[48..56].copy_from_slice(&self.txid.as_u64().to_le_bytes());
        let checksum = xxh3_64(&buf[..56]);
        buf[56..64].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Decodes and validates a meta record.
    ///
    /// Checks magic, version and checksum, in that order.
    pub fn from_bytes(buf: &[u8]) -> CoreResult<Self> {
        if buf.len() < META_SIZE {
            return Err(CoreError::invalid_format("meta page truncated"));
        }
        if read_u32(buf, 0) != MAGIC {
            return Err(CoreError::invalid_format("invalid magic number"));
        }
        let version = read_u32(buf, 4);
        if version != VERSION {
            return Err(CoreError::VersionMismatch {
                expected: VERSION,
                found: version,
            });
        }
        let expected = read_u64(buf, 56);
        let actual = xxh3_64(&buf[..56]);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        Ok(Self {
            page_size: read_u32(buf, 8),
            flags: read_u32(buf, 12),
            root: BucketHeader::from_bytes(&buf[16..32])?,
            freelist: read_u64(buf, 32),
            pgid: read_u64(buf, 40),
            txid: TransactionId::new(read_u64(buf, 48)),
        })
    }

    /// Meta slot this record is written to.
    #[must_use]
    pub fn slot(&self) -> PageId {
        self.txid.as_u64() % 2
    }

    /// Builds a full meta page for `slot`.
    #[must_use]
    pub fn to_page(&self, slot: PageId, page_size: usize) -> Vec<u8> {
        let mut page = vec![0u8; page_size];
        let header = PageHeader {
            id: slot,
            page_type: PageType::Meta,
            count: 0,
            overflow: 0,
        };
        page[..PAGE_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + META_SIZE].copy_from_slice(&self.to_bytes());
        page
    }

    /// Decodes a full meta page, header included.
    ///
    /// The meta record is validated before the header, so a file that is
    /// not a database reports a bad magic number.
    pub fn from_page(page: &[u8]) -> CoreResult<Self> {
        if page.len() < PAGE_HEADER_SIZE {
            return Err(CoreError::invalid_format("meta page truncated"));
        }
        let meta = Self::from_bytes(&page[PAGE_HEADER_SIZE..])?;
        let header = PageHeader::from_bytes(page)?;
        if header.page_type != PageType::Meta {
            return Err(CoreError::invalid_format(format!(
                "page {} is not a meta page",
                header.id
            )));
        }
        Ok(meta)
    }
}

pub(crate) fn read_u16(buf: &[u8], at: usize) -> u16 {
    let mut bytes = [0u8; 2];
    bytes.copy_from_slice(&buf[at..at + 2]);
    u16::from_le_bytes(bytes)
}

pub(crate) fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

pub(crate) fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}
