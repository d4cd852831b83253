//! Read and write transactions.
//!
//! Any number of [`ReadTx`] may run alongside the single [`WriteTx`]. A
//! read transaction pins the meta that was current when it began and sees
//! that snapshot until it is dropped. The write transaction works on private
//! copies of the nodes it changes; nothing it does is visible until commit
//! swaps in a new meta page.

mod read;
mod write;

pub use read::ReadTx;
pub use write::WriteTx;

use crate::error::CoreResult;
use crate::node::{branch_index, leaf_search, Child, LeafEntry, Node};
use crate::types::PageId;
use std::borrow::Cow;

/// Default fill percent used when splitting nodes.
pub const DEFAULT_FILL_PERCENT: f64 = 0.5;

/// Lowest accepted fill percent.
pub const MIN_FILL_PERCENT: f64 = 0.1;

/// Highest accepted fill percent.
pub const MAX_FILL_PERCENT: f64 = 1.0;

/// Read access to the trees a transaction can see.
pub(crate) trait TxView {
    /// Returns the node behind `child`.
    fn node(&self, child: Child) -> CoreResult<Cow<'_, Node>>;

    /// Uncommitted root and sequence of the bucket at `path`, if the
    /// transaction changed it.
    fn cached_bucket(&self, path: &[Vec<u8>]) -> Option<(Option<Child>, u64)>;
}

/// Root reference for a stored root page id.
pub(crate) fn root_child(root: PageId) -> Option<Child> {
    (root != 0).then_some(Child::Page(root))
}

/// Looks up `key` in the tree rooted at `root`.
pub(crate) fn tree_get<V: TxView + ?Sized>(
    view: &V,
    root: Option<Child>,
    key: &[u8],
) -> CoreResult<Option<LeafEntry>> {
    let Some(mut child) = root else {
        return Ok(None);
    };

    loop {
        let node = view.node(child)?;
        match node.as_ref() {
            Node::Branch(entries) => {
                let Some(entry) = entries.get(branch_index(entries, key)) else {
                    return Ok(None);
                };
                child = entry.child;
            }
            Node::Leaf(entries) => {
                return Ok(leaf_search(entries, key).ok().map(|i| entries[i].clone()));
            }
        }
    }
}
