use super::{root_child, TxView};
use crate::bucket::{split_path, Bucket};
use crate::config::{default_open_file, AccessMode};
use crate::cursor::Cursor;
use crate::database::Db;
use crate::error::{CoreError, CoreResult};
use crate::node::{Child, Node};
use crate::page::Meta;
use crate::types::TransactionId;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Pages copied per read while streaming a snapshot.
const COPY_CHUNK_PAGES: u64 = 64;

/// A read-only transaction.
///
/// Sees the database as of the last commit before it began. Pages reachable
/// from that snapshot are not reused until the transaction is dropped, so
/// long-running readers hold back page reclamation.
pub struct ReadTx<'db> {
    db: &'db Db,
    meta: Meta,
}

impl std::fmt::Debug for ReadTx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadTx")
            .field("txid", &self.meta.txid)
            .finish_non_exhaustive()
    }
}

impl<'db> ReadTx<'db> {
    pub(crate) fn new(db: &'db Db, meta: Meta) -> Self {
        Self { db, meta }
    }

    /// Id of the commit this transaction reads.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.meta.txid
    }

    /// Size in bytes of the database as seen by this transaction.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.meta.pgid * self.db.page_size() as u64
    }

    /// Returns the top-level bucket `name`, if it exists.
    pub fn bucket(&self, name: &[u8]) -> CoreResult<Option<Bucket<'_>>> {
        Bucket::open(self, root_child(self.meta.root.root), vec![name.to_vec()])
    }

    /// Looks up a separator-joined path such as `b"users:1"`.
    ///
    /// Returns `None` if any bucket on the way is missing.
    pub fn get_path(&self, path: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let (buckets, key) = split_path(path, self.db.options().bucket_separator)?;
        let mut names = buckets.iter();
        let Some(first) = names.next() else {
            return Ok(None);
        };
        let Some(mut bucket) = self.bucket(first)? else {
            return Ok(None);
        };
        for name in names {
            match bucket.bucket(name)? {
                Some(child) => bucket = child,
                None => return Ok(None),
            }
        }
        bucket.get(&key)
    }

    /// Cursor over the names of the top-level buckets.
    #[must_use]
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::new(self, root_child(self.meta.root.root))
    }

    /// Calls `f` with the name of every top-level bucket.
    pub fn for_each<F>(&self, mut f: F) -> CoreResult<()>
    where
        F: FnMut(&[u8]) -> CoreResult<()>,
    {
        let mut cursor = self.cursor();
        let mut item = cursor.first()?;
        while let Some((name, _)) = item {
            f(&name)?;
            item = cursor.next()?;
        }
        Ok(())
    }

    /// Streams a consistent copy of the database into `w`.
    ///
    /// Both meta slots of the copy carry this transaction's meta. Returns
    /// the number of bytes written.
    pub fn write_to<W: Write>(&self, w: &mut W) -> CoreResult<u64> {
        let page_size = self.db.page_size();
        let mut written = 0u64;

        for slot in 0..2 {
            let page = self.meta.to_page(slot, page_size);
            w.write_all(&page)?;
            written += page.len() as u64;
        }

        let mut pgid = 2;
        while pgid < self.meta.pgid {
            let count = COPY_CHUNK_PAGES.min(self.meta.pgid - pgid);
            let chunk = self.db.pages().read_raw(pgid, count)?;
            w.write_all(&chunk)?;
            written += chunk.len() as u64;
            pgid += count;
        }

        w.flush()?;
        Ok(written)
    }

    /// Writes a copy of the database to a new file at `path`.
    ///
    /// An existing file is truncated. `mode` holds the permission bits for a
    /// newly created file.
    pub fn copy_file(&self, path: impl AsRef<Path>, mode: u32) -> CoreResult<()> {
        let file = default_open_file(path.as_ref(), AccessMode::ReadWrite, mode)?;
        file.set_len(0)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        let file: File = writer
            .into_inner()
            .map_err(|e| CoreError::Io(e.into_error()))?;
        file.sync_all()?;
        Ok(())
    }
}

impl TxView for ReadTx<'_> {
    fn node(&self, child: Child) -> CoreResult<Cow<'_, Node>> {
        match child {
            Child::Page(id) => Ok(Cow::Owned(self.db.pages().node(id)?.0)),
            Child::Node(_) => Err(CoreError::corrupted(
                "read transaction reached an uncommitted node",
            )),
        }
    }

    fn cached_bucket(&self, _path: &[Vec<u8>]) -> Option<(Option<Child>, u64)> {
        None
    }
}

impl Drop for ReadTx<'_> {
    fn drop(&mut self) {
        self.db.unregister_reader(self.meta.txid);
    }
}
