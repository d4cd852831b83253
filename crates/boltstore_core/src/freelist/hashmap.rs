//! Span-map free page index.

use super::FreeIndex;
use crate::types::PageId;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Free pages kept as contiguous spans.
///
/// Spans are indexed by start, by end and by size, so allocating a run of
/// `n` pages is a lookup instead of a scan. The returned id is not
/// necessarily the smallest free one.
#[derive(Debug, Default)]
pub(crate) struct HashMapIndex {
    /// start -> size
    forward: HashMap<PageId, u64>,
    /// end -> size
    backward: HashMap<PageId, u64>,
    /// size -> starts
    by_size: BTreeMap<u64, HashSet<PageId>>,
    count: usize,
}

impl HashMapIndex {
    fn add_span(&mut self, start: PageId, size: u64) {
        self.forward.insert(start, size);
        self.backward.insert(start + size - 1, size);
        self.by_size.entry(size).or_default().insert(start);
        self.count += size as usize;
    }

    fn del_span(&mut self, start: PageId, size: u64) {
        self.forward.remove(&start);
        self.backward.remove(&(start + size - 1));
        if let Some(starts) = self.by_size.get_mut(&size) {
            starts.remove(&start);
            if starts.is_empty() {
                self.by_size.remove(&size);
            }
        }
        self.count -= size as usize;
    }

    /// Adds one page, joining it with the spans that touch it.
    fn merge_one(&mut self, id: PageId) {
        let mut start = id;
        let mut size = 1;

        if let Some(&prev_size) = self.backward.get(&(id - 1)) {
            let prev_start = id - prev_size;
            self.del_span(prev_start, prev_size);
            start = prev_start;
            size += prev_size;
        }
        if let Some(&next_size) = self.forward.get(&(id + 1)) {
            self.del_span(id + 1, next_size);
            size += next_size;
        }

        self.add_span(start, size);
    }
}

impl FreeIndex for HashMapIndex {
    fn free_count(&self) -> usize {
        self.count
    }

    fn allocate(&mut self, n: usize) -> Option<PageId> {
        if n == 0 {
            return None;
        }
        let n = n as u64;

        // Smallest span that can hold the run.
        let (&size, starts) = self.by_size.range(n..).next()?;
        let start = *starts.iter().next()?;

        self.del_span(start, size);
        if size > n {
            self.add_span(start + n, size - n);
        }
        Some(start)
    }

    fn merge(&mut self, ids: &[PageId]) {
        for &id in ids {
            self.merge_one(id);
        }
    }

    fn ids(&self) -> Vec<PageId> {
        let mut ids = Vec::with_capacity(self.count);
        for (&start, &size) in &self.forward {
            ids.extend(start..start + size);
        }
        ids.sort_unstable();
        ids
    }

    fn reset(&mut self, ids: &[PageId]) {
        *self = Self::default();

        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        let mut iter = sorted.into_iter();
        let Some(first) = iter.next() else {
            return;
        };

        let mut start = first;
        let mut size = 1;
        for id in iter {
            if id == start + size {
                size += 1;
            } else {
                self.add_span(start, size);
                start = id;
                size = 1;
            }
        }
        self.add_span(start, size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(ids: &[PageId]) -> HashMapIndex {
        let mut index = HashMapIndex::default();
        index.reset(ids);
        index
    }

    #[test]
    fn reset_builds_spans() {
        let index = index(&[3, 4, 5, 9, 12, 13]);
        assert_eq!(index.forward.get(&3), Some(&3));
        assert_eq!(index.forward.get(&9), Some(&1));
        assert_eq!(index.backward.get(&13), Some(&2));
        assert_eq!(index.free_count(), 6);
        assert_eq!(index.ids(), vec![3, 4, 5, 9, 12, 13]);
    }

    #[test]
    fn allocates_from_exact_or_larger_span() {
        let mut index = index(&[3, 4, 5, 9, 12, 13]);

        assert_eq!(index.allocate(2), Some(12));
        assert_eq!(index.allocate(2), Some(3));
        assert_eq!(index.ids(), vec![5, 9]);
        assert_eq!(index.allocate(2), None);
        assert_eq!(index.free_count(), 2);
    }

    #[test]
    fn merge_joins_neighbours() {
        let mut index = index(&[3, 5]);
        index.merge(&[4]);
        assert_eq!(index.forward.get(&3), Some(&3));
        assert_eq!(index.forward.len(), 1);
        assert_eq!(index.allocate(3), Some(3));
        assert_eq!(index.free_count(), 0);
    }
}
