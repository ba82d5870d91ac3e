//! A collection of orderable values which the caller can efficiently
//! drain in one go.
//!
//! Buses record themselves here when their value changes during an
//! edge, and the board drains the set once the edge is complete so
//! that observers hear about each bus at most once per edge.
use std::collections::BTreeSet;

#[derive(Debug)]
pub(crate) struct ChangeIndex<K: Ord> {
    changes: BTreeSet<K>,
}

impl<K: Ord> Default for ChangeIndex<K> {
    // Cannot use derive for Default because that would require K to
    // implement Default, while in reality it doesn't need to.
    fn default() -> Self {
        Self {
            changes: BTreeSet::new(),
        }
    }
}

impl<K: Ord> ChangeIndex<K> {
    pub(crate) fn add(&mut self, k: K) {
        self.changes.insert(k);
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.changes.clear();
    }

    pub(crate) fn drain(&mut self) -> BTreeSet<K> {
        std::mem::take(&mut self.changes)
    }
}

#[test]
fn test_change_index_drains_each_key_once() {
    let mut index: ChangeIndex<u8> = ChangeIndex::default();
    assert!(index.is_empty());
    index.add(3);
    index.add(1);
    index.add(3);
    let drained: Vec<u8> = index.drain().into_iter().collect();
    assert_eq!(drained, vec![1, 3]);
    assert!(index.is_empty());
}

#[test]
fn test_change_index_clear() {
    let mut index: ChangeIndex<u8> = ChangeIndex::default();
    index.add(7);
    index.clear();
    assert!(index.drain().is_empty());
}
