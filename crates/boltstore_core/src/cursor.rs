//! Ordered traversal of a bucket.

use crate::error::{CoreError, CoreResult};
use crate::node::{branch_index, leaf_search, Child, Node};
use crate::transaction::TxView;

/// A key and its value. The value is `None` when the key names a nested
/// bucket.
pub type CursorItem = (Vec<u8>, Option<Vec<u8>>);

#[derive(Debug)]
struct Frame {
    node: Node,
    index: usize,
}

/// Iterates the keys of one bucket in byte order.
///
/// A new cursor is unpositioned; call [`first`](Cursor::first),
/// [`last`](Cursor::last) or [`seek`](Cursor::seek) before moving it.
/// Running off either end leaves it unpositioned again.
///
/// The cursor keeps its own copy of the path from the root to the current
/// leaf, so the nodes it holds are never invalidated by the file growing.
pub struct Cursor<'tx> {
    view: &'tx dyn TxView,
    root: Option<Child>,
    stack: Vec<Frame>,
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("root", &self.root)
            .field("depth", &self.stack.len())
            .finish_non_exhaustive()
    }
}

impl<'tx> Cursor<'tx> {
    pub(crate) fn new(view: &'tx dyn TxView, root: Option<Child>) -> Self {
        Self {
            view,
            root,
            stack: Vec::new(),
        }
    }

    /// Moves to the first key.
    pub fn first(&mut self) -> CoreResult<Option<CursorItem>> {
        self.stack.clear();
        let Some(root) = self.root else {
            return Ok(None);
        };
        self.push(root, false)?;
        self.descend(false)?;
        match self.item() {
            Some(item) => Ok(Some(item)),
            None => self.next(),
        }
    }

    /// Moves to the last key.
    pub fn last(&mut self) -> CoreResult<Option<CursorItem>> {
        self.stack.clear();
        let Some(root) = self.root else {
            return Ok(None);
        };
        self.push(root, true)?;
        self.descend(true)?;
        match self.item() {
            Some(item) => Ok(Some(item)),
            None => self.prev(),
        }
    }

    /// Moves to the next key.
    pub fn next(&mut self) -> CoreResult<Option<CursorItem>> {
        loop {
            let mut depth = self.stack.len();
            loop {
                if depth == 0 {
                    self.stack.clear();
                    return Ok(None);
                }
                let frame = &mut self.stack[depth - 1];
                if frame.index + 1 < frame.node.len() {
                    frame.index += 1;
                    break;
                }
                depth -= 1;
            }
            self.stack.truncate(depth);
            self.descend(false)?;
            if let Some(item) = self.item() {
                return Ok(Some(item));
            }
        }
    }

    /// Moves to the previous key.
    pub fn prev(&mut self) -> CoreResult<Option<CursorItem>> {
        loop {
            let mut depth = self.stack.len();
            loop {
                if depth == 0 {
                    self.stack.clear();
                    return Ok(None);
                }
                let frame = &mut self.stack[depth - 1];
                if frame.index > 0 {
                    frame.index = frame.index.min(frame.node.len()) - 1;
                    break;
                }
                depth -= 1;
            }
            self.stack.truncate(depth);
            self.descend(true)?;
            if let Some(item) = self.item() {
                return Ok(Some(item));
            }
        }
    }

    /// Moves to the first key `>= target`.
    pub fn seek(&mut self, target: &[u8]) -> CoreResult<Option<CursorItem>> {
        self.stack.clear();
        let Some(mut child) = self.root else {
            return Ok(None);
        };

        loop {
            let node = self.view.node(child)?.into_owned();
            let (index, next) = match &node {
                Node::Branch(entries) => {
                    if entries.is_empty() {
                        return Err(CoreError::corrupted("empty branch node"));
                    }
                    let index = branch_index(entries, target);
                    (index, Some(entries[index].child))
                }
                Node::Leaf(entries) => match leaf_search(entries, target) {
                    Ok(i) | Err(i) => (i, None),
                },
            };
            self.stack.push(Frame { node, index });
            match next {
                Some(next) => child = next,
                None => break,
            }
        }

        match self.item() {
            Some(item) => Ok(Some(item)),
            None => self.next(),
        }
    }

    /// Returns the entry under the cursor.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidSeek`] when the cursor is not positioned on an
    /// entry.
    pub fn current(&self) -> CoreResult<CursorItem> {
        self.item().ok_or(CoreError::InvalidSeek)
    }

    fn push(&mut self, child: Child, from_end: bool) -> CoreResult<()> {
        let node = self.view.node(child)?.into_owned();
        let index = if from_end {
            node.len().saturating_sub(1)
        } else {
            0
        };
        self.stack.push(Frame { node, index });
        Ok(())
    }

    /// Follows the current branch indexes down to a leaf.
    fn descend(&mut self, from_end: bool) -> CoreResult<()> {
        loop {
            let Some(frame) = self.stack.last() else {
                return Ok(());
            };
            let child = match &frame.node {
                Node::Leaf(_) => return Ok(()),
                Node::Branch(entries) => match entries.get(frame.index) {
                    Some(entry) => entry.child,
                    None => return Ok(()),
                },
            };
            self.push(child, from_end)?;
        }
    }

    fn item(&self) -> Option<CursorItem> {
        let frame = self.stack.last()?;
        let Node::Leaf(entries) = &frame.node else {
            return None;
        };
        let entry = entries.get(frame.index)?;
        let value = (!entry.is_bucket()).then(|| entry.value.clone());
        Some((entry.key.clone(), value))
    }
}
