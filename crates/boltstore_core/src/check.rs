//! Consistency checking of the page file.
//!
//! Walks every tree reachable from a meta page and compares the pages it
//! finds with the freelist. The same walk is used to rebuild the freelist
//! of a database that does not persist it.

use crate::database::PageReader;
use crate::node::{Child, Node};
use crate::page::{BucketHeader, Meta, FREELIST_NONE};
use crate::types::PageId;
use std::collections::HashSet;
use std::fmt;

/// A problem found by [`Db::check`](crate::Db::check).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum IntegrityIssue {
    /// A tree references a page at or past the high-water mark.
    OutOfBounds {
        /// Referenced page.
        pgid: PageId,
        /// High-water mark of the meta.
        high_water: PageId,
    },
    /// A page is referenced more than once.
    MultipleReferences {
        /// Referenced page.
        pgid: PageId,
    },
    /// A page is reachable but also listed as free.
    ReachableFreed {
        /// The page.
        pgid: PageId,
    },
    /// A page is neither reachable nor free.
    Unreachable {
        /// The page.
        pgid: PageId,
    },
    /// A reachable page could not be decoded.
    Unreadable {
        /// The page.
        pgid: PageId,
        /// Decode error.
        message: String,
    },
    /// Keys of a page are not in ascending order.
    UnsortedKeys {
        /// The page.
        pgid: PageId,
    },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds { pgid, high_water } => {
                write!(f, "page {pgid}: out of bounds (high water {high_water})")
            }
            Self::MultipleReferences { pgid } => write!(f, "page {pgid}: multiple references"),
            Self::ReachableFreed { pgid } => write!(f, "page {pgid}: reachable but freed"),
            Self::Unreachable { pgid } => write!(f, "page {pgid}: unreachable and not freed"),
            Self::Unreadable { pgid, message } => write!(f, "page {pgid}: unreadable: {message}"),
            Self::UnsortedKeys { pgid } => write!(f, "page {pgid}: keys out of order"),
        }
    }
}

/// Collects every page reachable from `meta`: both meta pages, the freelist
/// and all bucket trees.
pub(crate) fn walk(pages: &PageReader<'_>, meta: &Meta) -> (HashSet<PageId>, Vec<IntegrityIssue>) {
    let mut reachable: HashSet<PageId> = [0, 1].into_iter().collect();
    let mut issues = Vec::new();

    if meta.freelist != FREELIST_NONE && mark(&mut reachable, &mut issues, meta.pgid, meta.freelist) {
        match pages.header(meta.freelist) {
            Ok(header) => {
                for pgid in meta.freelist + 1..=meta.freelist + u64::from(header.overflow) {
                    mark(&mut reachable, &mut issues, meta.pgid, pgid);
                }
            }
            Err(e) => issues.push(IntegrityIssue::Unreadable {
                pgid: meta.freelist,
                message: e.to_string(),
            }),
        }
    }

    let mut stack: Vec<PageId> = Vec::new();
    if meta.root.root != 0 {
        stack.push(meta.root.root);
    }

    while let Some(pgid) = stack.pop() {
        if !mark(&mut reachable, &mut issues, meta.pgid, pgid) {
            continue;
        }
        let (node, header) = match pages.node(pgid) {
            Ok(found) => found,
            Err(e) => {
                issues.push(IntegrityIssue::Unreadable {
                    pgid,
                    message: e.to_string(),
                });
                continue;
            }
        };
        for id in pgid + 1..=pgid + u64::from(header.overflow) {
            mark(&mut reachable, &mut issues, meta.pgid, id);
        }

        let sorted = match &node {
            Node::Leaf(entries) => entries.windows(2).all(|w| w[0].key < w[1].key),
            Node::Branch(entries) => entries.windows(2).all(|w| w[0].key < w[1].key),
        };
        if !sorted {
            issues.push(IntegrityIssue::UnsortedKeys { pgid });
        }

        match node {
            Node::Branch(entries) => {
                for entry in entries {
                    if let Child::Page(child) = entry.child {
                        stack.push(child);
                    }
                }
            }
            Node::Leaf(entries) => {
                for entry in entries.iter().filter(|e| e.is_bucket()) {
                    match BucketHeader::from_bytes(&entry.value) {
                        Ok(bucket) if bucket.root != 0 => stack.push(bucket.root),
                        Ok(_) => {}
                        Err(e) => issues.push(IntegrityIssue::Unreadable {
                            pgid,
                            message: e.to_string(),
                        }),
                    }
                }
            }
        }
    }

    (reachable, issues)
}

/// Records `pgid` as reachable. Returns false if it should not be visited.
fn mark(
    reachable: &mut HashSet<PageId>,
    issues: &mut Vec<IntegrityIssue>,
    high_water: PageId,
    pgid: PageId,
) -> bool {
    if pgid >= high_water {
        issues.push(IntegrityIssue::OutOfBounds { pgid, high_water });
        false
    } else if !reachable.insert(pgid) {
        issues.push(IntegrityIssue::MultipleReferences { pgid });
        false
    } else {
        true
    }
}

/// Full check of `meta` against the free page ids, if they are known.
pub(crate) fn check(
    pages: &PageReader<'_>,
    meta: &Meta,
    free: Option<Vec<PageId>>,
) -> Vec<IntegrityIssue> {
    let (reachable, mut issues) = walk(pages, meta);
    let Some(free) = free else {
        return issues;
    };

    let free: HashSet<PageId> = free.into_iter().collect();
    let mut sorted: Vec<PageId> = free.iter().copied().collect();
    sorted.sort_unstable();
    for pgid in sorted {
        if reachable.contains(&pgid) {
            issues.push(IntegrityIssue::ReachableFreed { pgid });
        }
    }
    for pgid in 2..meta.pgid {
        if !reachable.contains(&pgid) && !free.contains(&pgid) {
            issues.push(IntegrityIssue::Unreachable { pgid });
        }
    }
    issues
}

/// Page ids below the high-water mark that no tree references.
pub(crate) fn unreachable_pages(
    pages: &PageReader<'_>,
    meta: &Meta,
) -> Result<Vec<PageId>, IntegrityIssue> {
    let (reachable, issues) = walk(pages, meta);
    if let Some(issue) = issues.into_iter().next() {
        return Err(issue);
    }
    Ok((2..meta.pgid).filter(|id| !reachable.contains(id)).collect())
}
