//! Relations: duplicate-free tuple sets behind one or more indexes.
//!
//! Representations:
//! - **btree** (default) and **btree-with-delete**: every advised column
//!   order is materialized as its own [`Index`]; insert updates the
//!   primary first, so the tuple is visible through every order before
//!   the insert returns.
//! - **provenance**: a btree whose last two columns carry
//!   `(rule_number, level_number)`; the index advice keeps those columns
//!   trailing so payload lookups partition correctly.
//! - **equivalence**: a binary relation closed under reflexivity,
//!   symmetry and transitivity, backed by a union-find; scans enumerate
//!   the closure's pairs in lexicographic order.
//!
//! Handles are slots: the node tree refers to relations through a
//! [`RelationCell`], and `Swap` exchanges the slot contents so every
//! outstanding reference observes the exchange.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use stratal_ram::{Domain, IndexCluster, RelationDecl, Representation, SearchSignature};

use crate::index::{Cursor, Index};
use crate::tuple::Row;

// ============================================================================
// Handles
// ============================================================================

/// A swappable relation slot. The evaluator resolves a cell to its
/// current relation at each use; a `Swap` only exchanges the two `Arc`s.
pub struct RelationCell(RwLock<Arc<Relation>>);

impl RelationCell {
    pub fn new(relation: Relation) -> Self {
        RelationCell(RwLock::new(Arc::new(relation)))
    }

    /// Snapshot the current relation behind this slot.
    pub fn get(&self) -> Arc<Relation> {
        self.0.read().clone()
    }

    /// Exchange the contents of two slots. Only issued between parallel
    /// regions, so lock ordering needs no further care.
    pub fn swap(a: &RelationCell, b: &RelationCell) {
        let mut ra = a.0.write();
        let mut rb = b.0.write();
        std::mem::swap(&mut *ra, &mut *rb);
    }
}

// ============================================================================
// Relation
// ============================================================================

pub enum Relation {
    Indexed(IndexedRelation),
    Equivalence(EquivalenceRelation),
}

impl Relation {
    /// Materialize a relation from its declaration and index advice.
    pub fn new(decl: RelationDecl, cluster: IndexCluster) -> Self {
        match decl.representation {
            Representation::Equivalence => {
                Relation::Equivalence(EquivalenceRelation::new(decl))
            }
            _ => Relation::Indexed(IndexedRelation::new(decl, cluster)),
        }
    }

    pub fn decl(&self) -> &RelationDecl {
        match self {
            Relation::Indexed(rel) => &rel.decl,
            Relation::Equivalence(rel) => &rel.decl,
        }
    }

    pub fn name(&self) -> &str {
        &self.decl().name
    }

    pub fn arity(&self) -> usize {
        self.decl().arity
    }

    pub fn representation(&self) -> Representation {
        self.decl().representation
    }

    /// Insert a row; false when no new knowledge was added. Safe from
    /// concurrent workers.
    pub fn insert(&self, row: &[Domain]) -> bool {
        match self {
            Relation::Indexed(rel) => rel.insert(row),
            Relation::Equivalence(rel) => rel.insert(row),
        }
    }

    /// Erase a row; a no-op when absent. Only btree-with-delete relations
    /// support erasure, which node generation guarantees.
    pub fn erase(&self, row: &[Domain]) -> bool {
        match self {
            Relation::Indexed(rel) => rel.erase(row),
            Relation::Equivalence(_) => {
                panic!("erase on equivalence relation (rejected at generation)")
            }
        }
    }

    /// Drop every tuple and reset all indexes.
    pub fn purge(&self) {
        match self {
            Relation::Indexed(rel) => rel.purge(),
            Relation::Equivalence(rel) => rel.purge(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Relation::Indexed(rel) => rel.indexes[0].len(),
            Relation::Equivalence(rel) => rel.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, row: &[Domain]) -> bool {
        match self {
            Relation::Indexed(rel) => rel.indexes[0].contains(row),
            Relation::Equivalence(rel) => rel.contains(row),
        }
    }

    /// Point-existence through a specific index (views route here).
    pub fn contains_via(&self, index_pos: usize, row: &[Domain]) -> bool {
        match self {
            Relation::Indexed(rel) => rel.index(index_pos).contains(row),
            Relation::Equivalence(rel) => rel.contains(row),
        }
    }

    /// Range-existence through a specific index.
    pub fn contains_range_via(&self, index_pos: usize, low: &[Domain], high: &[Domain]) -> bool {
        match self {
            Relation::Indexed(rel) => rel.index(index_pos).contains_range(low, high),
            Relation::Equivalence(rel) => rel.range(low, high).next().is_some(),
        }
    }

    /// Smallest row of `[low, high]` through a specific index.
    pub fn first_in_range_via(
        &self,
        index_pos: usize,
        low: &[Domain],
        high: &[Domain],
    ) -> Option<Row> {
        match self {
            Relation::Indexed(rel) => rel.index(index_pos).first_in_range(low, high),
            Relation::Equivalence(rel) => rel.range(low, high).next(),
        }
    }

    pub fn scan(&self) -> RelationScan<'_> {
        match self {
            Relation::Indexed(rel) => RelationScan::Index(rel.indexes[0].scan()),
            Relation::Equivalence(rel) => RelationScan::Pairs(rel.pairs().into_iter()),
        }
    }

    pub fn range(&self, index_pos: usize, low: &[Domain], high: &[Domain]) -> RelationScan<'_> {
        match self {
            Relation::Indexed(rel) => {
                RelationScan::Index(rel.index(index_pos).range(low, high))
            }
            Relation::Equivalence(rel) => rel.range(low, high),
        }
    }

    pub fn partition_scan(&self, parts: usize) -> Vec<RelationScan<'_>> {
        match self {
            Relation::Indexed(rel) => rel.indexes[0]
                .partition_scan(parts)
                .into_iter()
                .map(RelationScan::Index)
                .collect(),
            Relation::Equivalence(rel) => rel.partition_pairs(parts),
        }
    }

    pub fn partition_range(
        &self,
        index_pos: usize,
        low: &[Domain],
        high: &[Domain],
        parts: usize,
    ) -> Vec<RelationScan<'_>> {
        match self {
            Relation::Indexed(rel) => rel
                .index(index_pos)
                .partition_range(low, high, parts)
                .into_iter()
                .map(RelationScan::Index)
                .collect(),
            Relation::Equivalence(rel) => {
                let rows: Vec<Row> = rel.range(low, high).collect();
                EquivalenceRelation::chunk(rows, parts)
            }
        }
    }

    /// Resolve the index answering a search signature.
    pub fn select_index(&self, signature: SearchSignature) -> Option<usize> {
        match self {
            Relation::Indexed(rel) => rel.cluster.select(signature),
            // The union-find answers every binary pattern itself.
            Relation::Equivalence(_) => Some(0),
        }
    }

    /// Direct index access for statistics walks; equivalence relations
    /// have no materialized index.
    pub fn index(&self, index_pos: usize) -> Option<&Index> {
        match self {
            Relation::Indexed(rel) => Some(rel.index(index_pos)),
            Relation::Equivalence(_) => None,
        }
    }

    pub fn index_count(&self) -> usize {
        match self {
            Relation::Indexed(rel) => rel.indexes.len(),
            Relation::Equivalence(_) => 1,
        }
    }

    /// Merge the target equivalence relation's classes into this one.
    pub fn extend_and_insert(&self, target: &Relation) {
        match (self, target) {
            (Relation::Equivalence(src), Relation::Equivalence(trg)) => {
                src.absorb(trg);
            }
            _ => panic!("merge-extend on non-equivalence relations (rejected at generation)"),
        }
    }
}

/// A scan over any representation.
pub enum RelationScan<'a> {
    Index(Cursor<'a>),
    Pairs(std::vec::IntoIter<Row>),
}

impl Iterator for RelationScan<'_> {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        match self {
            RelationScan::Index(cursor) => cursor.next(),
            RelationScan::Pairs(pairs) => pairs.next(),
        }
    }
}

// ============================================================================
// Btree family
// ============================================================================

pub struct IndexedRelation {
    decl: RelationDecl,
    cluster: IndexCluster,
    indexes: Vec<Index>,
}

impl IndexedRelation {
    fn new(decl: RelationDecl, cluster: IndexCluster) -> Self {
        assert!(!cluster.orders.is_empty(), "relation {} has no index order", decl.name);
        for order in &cluster.orders {
            assert_eq!(
                order.arity(),
                decl.arity,
                "index order arity mismatch on relation {}",
                decl.name
            );
        }
        let indexes = cluster.orders.iter().map(|o| Index::new(o.clone())).collect();
        IndexedRelation { decl, cluster, indexes }
    }

    fn insert(&self, row: &[Domain]) -> bool {
        debug_assert_eq!(row.len(), self.decl.arity);
        // The primary decides novelty; secondaries follow only for new
        // rows, keeping concurrent duplicate inserts idempotent.
        if !self.indexes[0].insert(row) {
            return false;
        }
        for index in &self.indexes[1..] {
            index.insert(row);
        }
        true
    }

    fn erase(&self, row: &[Domain]) -> bool {
        if !self.indexes[0].remove(row) {
            return false;
        }
        for index in &self.indexes[1..] {
            index.remove(row);
        }
        true
    }

    fn purge(&self) {
        for index in &self.indexes {
            index.clear();
        }
    }

    fn index(&self, pos: usize) -> &Index {
        &self.indexes[pos]
    }
}

// ============================================================================
// Equivalence
// ============================================================================

#[derive(Default)]
struct UnionFind {
    parent: HashMap<Domain, Domain>,
}

impl UnionFind {
    fn add(&mut self, element: Domain) {
        self.parent.entry(element).or_insert(element);
    }

    fn find(&self, element: Domain) -> Option<Domain> {
        let mut current = *self.parent.get(&element)?;
        loop {
            let next = self.parent[&current];
            if next == current {
                return Some(current);
            }
            current = next;
        }
    }

    /// Union two elements, adding them as needed; true when the classes
    /// were previously distinct.
    fn union(&mut self, a: Domain, b: Domain) -> bool {
        self.add(a);
        self.add(b);
        let ra = self.find(a).expect("just added");
        let rb = self.find(b).expect("just added");
        if ra == rb {
            return false;
        }
        self.parent.insert(ra.max(rb), ra.min(rb));
        true
    }

    fn classes(&self) -> HashMap<Domain, Vec<Domain>> {
        let mut classes: HashMap<Domain, Vec<Domain>> = HashMap::new();
        for &element in self.parent.keys() {
            let root = self.find(element).expect("member of the forest");
            classes.entry(root).or_default().push(element);
        }
        for members in classes.values_mut() {
            members.sort_unstable();
        }
        classes
    }
}

pub struct EquivalenceRelation {
    decl: RelationDecl,
    state: RwLock<UnionFind>,
}

impl EquivalenceRelation {
    fn new(decl: RelationDecl) -> Self {
        assert_eq!(decl.arity, 2, "equivalence relation {} must be binary", decl.name);
        EquivalenceRelation { decl, state: RwLock::new(UnionFind::default()) }
    }

    fn insert(&self, row: &[Domain]) -> bool {
        debug_assert_eq!(row.len(), 2);
        self.state.write().union(row[0], row[1])
    }

    fn contains(&self, row: &[Domain]) -> bool {
        let state = self.state.read();
        match (state.find(row[0]), state.find(row[1])) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Cardinality of the closure: sum of squared class sizes.
    fn len(&self) -> usize {
        let state = self.state.read();
        state.classes().values().map(|c| c.len() * c.len()).sum()
    }

    fn purge(&self) {
        self.state.write().parent.clear();
    }

    /// All pairs of the closure, lexicographically ordered.
    fn pairs(&self) -> Vec<Row> {
        let classes = self.state.read().classes();
        let mut elements: Vec<(Domain, &Vec<Domain>)> = Vec::new();
        for members in classes.values() {
            for &a in members {
                elements.push((a, members));
            }
        }
        elements.sort_unstable_by_key(|(a, _)| *a);
        let mut pairs = Vec::new();
        for (a, members) in elements {
            for &b in members {
                pairs.push(smallvec::smallvec![a, b]);
            }
        }
        pairs
    }

    /// Lexicographic `[low, high]` slice of the closure's pairs.
    fn range(&self, low: &[Domain], high: &[Domain]) -> RelationScan<'_> {
        let low: Row = Row::from_slice(low);
        let high: Row = Row::from_slice(high);
        let rows: Vec<Row> = self
            .pairs()
            .into_iter()
            .filter(|pair| *pair >= low && *pair <= high)
            .collect();
        RelationScan::Pairs(rows.into_iter())
    }

    fn partition_pairs(&self, parts: usize) -> Vec<RelationScan<'_>> {
        Self::chunk(self.pairs(), parts)
    }

    fn chunk(rows: Vec<Row>, parts: usize) -> Vec<RelationScan<'static>> {
        if rows.is_empty() {
            return Vec::new();
        }
        let chunk = rows.len().div_ceil(parts.max(1));
        let mut out = Vec::new();
        let mut rest = rows;
        while rest.len() > chunk {
            let tail = rest.split_off(chunk);
            out.push(RelationScan::Pairs(rest.into_iter()));
            rest = tail;
        }
        out.push(RelationScan::Pairs(rest.into_iter()));
        out
    }

    /// Merge another union-find's knowledge into this one.
    fn absorb(&self, other: &EquivalenceRelation) {
        let pairs: Vec<(Domain, Domain)> = {
            let other = other.state.read();
            other
                .parent
                .keys()
                .map(|&element| (element, other.find(element).expect("member of the forest")))
                .collect()
        };
        let mut state = self.state.write();
        for (element, root) in pairs {
            state.union(element, root);
        }
    }
}
