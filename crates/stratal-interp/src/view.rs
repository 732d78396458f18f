//! Views: scoped read handles onto one index of one relation.
//!
//! A view pins the relation snapshot behind a handle slot for the
//! duration of the enclosing operation, so a concurrent `Swap` of the
//! slot never redirects lookups mid-operation. Every existence or range
//! probe inside a nested operation goes through a view.

use std::sync::Arc;

use stratal_ram::Domain;

use crate::relation::{Relation, RelationScan};
use crate::tuple::Row;

#[derive(Clone)]
pub struct View {
    relation: Arc<Relation>,
    index_pos: usize,
}

impl View {
    pub fn new(relation: Arc<Relation>, index_pos: usize) -> Self {
        View { relation, index_pos }
    }

    pub fn contains(&self, row: &[Domain]) -> bool {
        self.relation.contains_via(self.index_pos, row)
    }

    pub fn contains_range(&self, low: &[Domain], high: &[Domain]) -> bool {
        self.relation.contains_range_via(self.index_pos, low, high)
    }

    pub fn first_in_range(&self, low: &[Domain], high: &[Domain]) -> Option<Row> {
        self.relation.first_in_range_via(self.index_pos, low, high)
    }

    pub fn range(&self, low: &[Domain], high: &[Domain]) -> RelationScan<'_> {
        self.relation.range(self.index_pos, low, high)
    }
}
