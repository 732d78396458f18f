//! Per-relation index advice.
//!
//! Index *selection* happens upstream: the evaluator consumes, for every
//! relation, an [`IndexCluster`] naming the column orders to materialize
//! and mapping each search signature (the set of bound columns of a
//! lookup) to one of those orders. A lookup is answerable by an order only
//! if its bound columns form a prefix of the order; the cluster is
//! expected to guarantee that for every signature it maps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The set of bound columns of a lookup, as a bitmask over column
/// positions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SearchSignature(pub u64);

impl SearchSignature {
    pub fn from_columns(columns: impl IntoIterator<Item = usize>) -> Self {
        let mut mask = 0u64;
        for col in columns {
            mask |= 1 << col;
        }
        SearchSignature(mask)
    }

    pub fn contains(self, column: usize) -> bool {
        self.0 & (1 << column) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }
}

/// A permutation of column positions. Tuples stored under an order compare
/// lexicographically by `row[order[0]], row[order[1]], ...`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnOrder(pub Vec<usize>);

impl ColumnOrder {
    pub fn identity(arity: usize) -> Self {
        ColumnOrder((0..arity).collect())
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    /// Position of a column within the order, if present.
    pub fn position_of(&self, column: usize) -> Option<usize> {
        self.0.iter().position(|&c| c == column)
    }

    /// True when the signature's columns are exactly the first
    /// `signature.count()` columns of this order.
    pub fn covers_as_prefix(&self, signature: SearchSignature) -> bool {
        let bound = signature.count();
        self.0[..bound].iter().all(|&c| signature.contains(c))
            && self.0[bound..].iter().all(|&c| !signature.contains(c))
    }
}

/// The advised index set for one relation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexCluster {
    /// Orders to materialize. Position 0 is the primary order used for
    /// full scans and insertion bookkeeping.
    pub orders: Vec<ColumnOrder>,
    /// Signature to order-position assignments.
    pub selections: BTreeMap<SearchSignature, usize>,
}

impl IndexCluster {
    /// A cluster with only the identity order. Sufficient for relations
    /// that are only ever fully scanned or probed on a column prefix.
    pub fn single(arity: usize) -> Self {
        IndexCluster {
            orders: vec![ColumnOrder::identity(arity)],
            selections: BTreeMap::new(),
        }
    }

    /// Build a cluster covering the given search signatures with a
    /// first-fit strategy: reuse any existing order whose prefix matches,
    /// otherwise add an order listing the bound columns first. Auxiliary
    /// columns always stay trailing so provenance lookups see
    /// `(rule_number, level_number)` in declaration order.
    pub fn covering(
        arity: usize,
        aux_arity: usize,
        signatures: impl IntoIterator<Item = SearchSignature>,
    ) -> Self {
        let mut cluster = IndexCluster::single(arity);
        for signature in signatures {
            cluster.cover(arity, aux_arity, signature);
        }
        cluster
    }

    fn cover(&mut self, arity: usize, aux_arity: usize, signature: SearchSignature) {
        if self.selections.contains_key(&signature) {
            return;
        }
        if let Some(pos) = self.orders.iter().position(|o| o.covers_as_prefix(signature)) {
            self.selections.insert(signature, pos);
            return;
        }
        let payload = arity - aux_arity;
        let mut columns: Vec<usize> = (0..payload).filter(|&c| signature.contains(c)).collect();
        columns.extend((0..payload).filter(|&c| !signature.contains(c)));
        columns.extend(payload..arity);
        self.orders.push(ColumnOrder(columns));
        self.selections.insert(signature, self.orders.len() - 1);
    }

    /// Resolve the order position answering a signature, if any order can.
    pub fn select(&self, signature: SearchSignature) -> Option<usize> {
        if signature.is_empty() {
            return Some(0);
        }
        if let Some(&pos) = self.selections.get(&signature) {
            return Some(pos);
        }
        self.orders.iter().position(|o| o.covers_as_prefix(signature))
    }
}
