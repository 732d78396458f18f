//! Record interning.
//!
//! Records reify tuples as single domain words: `pack` interns a tuple
//! and yields its reference id, `unpack` resolves a reference back to the
//! tuple. Id 0 is reserved for the nil reference and is never assigned.

use dashmap::DashMap;
use parking_lot::RwLock;
use stratal_ram::Domain;

use crate::tuple::{row_from, Row};

pub struct RecordTable {
    tuple_to_id: DashMap<Row, Domain>,
    id_to_tuple: RwLock<Vec<Row>>,
}

impl RecordTable {
    pub fn new() -> Self {
        RecordTable {
            tuple_to_id: DashMap::new(),
            id_to_tuple: RwLock::new(Vec::new()),
        }
    }

    /// Intern a tuple, returning its reference id (never 0).
    pub fn pack(&self, tuple: &[Domain]) -> Domain {
        let key = row_from(tuple);
        if let Some(id) = self.tuple_to_id.get(&key) {
            return *id;
        }
        *self
            .tuple_to_id
            .entry(key)
            .or_insert_with(|| {
                let mut table = self.id_to_tuple.write();
                table.push(row_from(tuple));
                table.len() as Domain
            })
            .value()
    }

    /// Resolve a reference id. The caller states the expected arity; a
    /// mismatch or an unknown id is a corrupted program and fails loudly.
    /// Resolving nil is a caller bug: nil short-circuits before unpack.
    pub fn unpack(&self, id: Domain, arity: usize) -> Row {
        let table = self.id_to_tuple.read();
        let tuple = match usize::try_from(id).ok().and_then(|i| i.checked_sub(1)).and_then(|i| table.get(i)) {
            Some(t) => t,
            None => panic!("record table: unpack of unknown reference {id}"),
        };
        assert_eq!(tuple.len(), arity, "record table: arity mismatch on unpack of {id}");
        tuple.clone()
    }

    pub fn len(&self) -> usize {
        self.id_to_tuple.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RecordTable {
    fn default() -> Self {
        Self::new()
    }
}
