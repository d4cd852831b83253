//! Sorted-array free page index.

use super::FreeIndex;
use crate::types::PageId;

/// Free pages kept as one sorted vector.
///
/// Allocation scans for the lowest contiguous run, so it always returns the
/// smallest usable id at the cost of linear work per allocation.
#[derive(Debug, Default)]
pub(crate) struct ArrayIndex {
    ids: Vec<PageId>,
}

impl FreeIndex for ArrayIndex {
    fn free_count(&self) -> usize {
        self.ids.len()
    }

    fn allocate(&mut self, n: usize) -> Option<PageId> {
        if n == 0 {
            return None;
        }
        let n = n as u64;

        let mut initial: PageId = 0;
        let mut previous: PageId = 0;
        for (i, &id) in self.ids.iter().enumerate() {
            if previous == 0 || id - previous != 1 {
                initial = id;
            }
            if id - initial + 1 == n {
                let start = i + 1 - n as usize;
                self.ids.drain(start..=i);
                return Some(initial);
            }
            previous = id;
        }
        None
    }

    fn merge(&mut self, ids: &[PageId]) {
        if ids.is_empty() {
            return;
        }
        self.ids.extend_from_slice(ids);
        self.ids.sort_unstable();
    }

    fn ids(&self) -> Vec<PageId> {
        self.ids.clone()
    }

    fn reset(&mut self, ids: &[PageId]) {
        self.ids = ids.to_vec();
        self.ids.sort_unstable();
    }
}
