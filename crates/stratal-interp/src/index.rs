//! Ordered tuple indexes.
//!
//! An index stores a relation's rows pre-permuted under one column order
//! and compares them lexicographically on the signed word. Range queries
//! take inclusive `[low, high]` bounds in original column space, with
//! unbounded coordinates encoded as `Domain::MIN`/`Domain::MAX`.
//!
//! Scans are cursors, not borrowed iterators: each step takes the read
//! lock, fetches the next key past the previous one, and releases the
//! lock. A cursor therefore stays valid while other workers insert (or
//! erase) concurrently, observes any row present for the whole scan, and
//! never holds a lock across nested evaluation.

use std::collections::BTreeSet;
use std::ops::Bound;

use parking_lot::RwLock;
use stratal_ram::{ColumnOrder, Domain};

use crate::tuple::Row;

pub struct Index {
    order: ColumnOrder,
    set: RwLock<BTreeSet<Row>>,
}

impl Index {
    pub fn new(order: ColumnOrder) -> Self {
        Index { order, set: RwLock::new(BTreeSet::new()) }
    }

    pub fn order(&self) -> &ColumnOrder {
        &self.order
    }

    /// Permute a row into stored space.
    fn encode(&self, row: &[Domain]) -> Row {
        self.order.0.iter().map(|&c| row[c]).collect()
    }

    /// Invert the permutation on a stored key.
    fn decode(&self, stored: &[Domain]) -> Row {
        let mut row: Row = smallvec::smallvec![0; stored.len()];
        for (pos, &col) in self.order.0.iter().enumerate() {
            row[col] = stored[pos];
        }
        row
    }

    /// Insert a row; false when it was already present.
    pub fn insert(&self, row: &[Domain]) -> bool {
        let key = self.encode(row);
        self.set.write().insert(key)
    }

    /// Remove a row; false when it was absent.
    pub fn remove(&self, row: &[Domain]) -> bool {
        let key = self.encode(row);
        self.set.write().remove(&key)
    }

    pub fn contains(&self, row: &[Domain]) -> bool {
        let key = self.encode(row);
        self.set.read().contains(&key)
    }

    /// True when some row lies within `[low, high]`.
    pub fn contains_range(&self, low: &[Domain], high: &[Domain]) -> bool {
        self.first_in_range(low, high).is_some()
    }

    /// Smallest row within `[low, high]` under this order, decoded.
    pub fn first_in_range(&self, low: &[Domain], high: &[Domain]) -> Option<Row> {
        let low = self.encode(low);
        let high = self.encode(high);
        if low > high {
            return None;
        }
        let set = self.set.read();
        set.range((Bound::Included(low), Bound::Included(high)))
            .next()
            .map(|key| self.decode(key))
    }

    pub fn len(&self) -> usize {
        self.set.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.read().is_empty()
    }

    /// Drop every row. Outstanding cursors terminate at their next step.
    pub fn clear(&self) {
        self.set.write().clear();
    }

    pub fn scan(&self) -> Cursor<'_> {
        Cursor::new(self, Bound::Unbounded, Bound::Unbounded, true)
    }

    /// Cursor over stored-order keys; used by statistics walks that care
    /// about the index order itself.
    pub fn scan_stored(&self) -> Cursor<'_> {
        Cursor::new(self, Bound::Unbounded, Bound::Unbounded, false)
    }

    pub fn range(&self, low: &[Domain], high: &[Domain]) -> Cursor<'_> {
        let low = self.encode(low);
        let high = self.encode(high);
        if low > high {
            return Cursor::exhausted(self);
        }
        Cursor::new(self, Bound::Included(low), Bound::Included(high), true)
    }

    /// Split the full scan into roughly `parts` cursors.
    pub fn partition_scan(&self, parts: usize) -> Vec<Cursor<'_>> {
        self.partition(Bound::Unbounded, Bound::Unbounded, parts)
    }

    /// Split a range scan into roughly `parts` cursors.
    pub fn partition_range(&self, low: &[Domain], high: &[Domain], parts: usize) -> Vec<Cursor<'_>> {
        let low = self.encode(low);
        let high = self.encode(high);
        if low > high {
            return Vec::new();
        }
        self.partition(Bound::Included(low), Bound::Included(high), parts)
    }

    fn partition(
        &self,
        low: Bound<Row>,
        high: Bound<Row>,
        parts: usize,
    ) -> Vec<Cursor<'_>> {
        // One O(n) walk collecting a split key every chunk-th element. The
        // boundaries are then independent cursors, so workers never share
        // iterator state.
        let splits = {
            let set = self.set.read();
            let total = set.range((low.clone(), high.clone())).count();
            if total == 0 {
                return Vec::new();
            }
            let chunk = total.div_ceil(parts.max(1));
            set.range((low.clone(), high.clone()))
                .enumerate()
                .filter(|(i, _)| *i != 0 && *i % chunk == 0)
                .map(|(_, key)| key.clone())
                .collect::<Vec<_>>()
        };

        let mut cursors = Vec::with_capacity(splits.len() + 1);
        let mut start = low;
        for split in splits {
            cursors.push(Cursor::new(self, start, Bound::Excluded(split.clone()), true));
            start = Bound::Included(split);
        }
        cursors.push(Cursor::new(self, start, high, true));
        cursors
    }
}

/// A resumable scan position. Yields decoded rows (or stored keys for
/// statistics walks); holds the index lock only inside `next`.
pub struct Cursor<'a> {
    index: &'a Index,
    next_from: Bound<Row>,
    until: Bound<Row>,
    decode: bool,
    done: bool,
}

impl<'a> Cursor<'a> {
    fn new(index: &'a Index, next_from: Bound<Row>, until: Bound<Row>, decode: bool) -> Self {
        Cursor { index, next_from, until, decode, done: false }
    }

    fn exhausted(index: &'a Index) -> Self {
        Cursor {
            index,
            next_from: Bound::Unbounded,
            until: Bound::Unbounded,
            decode: true,
            done: true,
        }
    }
}

impl Iterator for Cursor<'_> {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        if self.done {
            return None;
        }
        let key = {
            let set = self.index.set.read();
            set.range((self.next_from.clone(), self.until.clone()))
                .next()
                .cloned()
        };
        match key {
            Some(key) => {
                let item = if self.decode { self.index.decode(&key) } else { key.clone() };
                self.next_from = Bound::Excluded(key);
                Some(item)
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}
