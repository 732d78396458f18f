//! String interning.
//!
//! Symbols are strings interned to dense domain ids. Any worker may
//! encode concurrently; encoding the same string twice always yields the
//! same id.

use dashmap::DashMap;
use parking_lot::RwLock;
use stratal_ram::Domain;

pub struct SymbolTable {
    str_to_id: DashMap<String, Domain>,
    id_to_str: RwLock<Vec<String>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            str_to_id: DashMap::new(),
            id_to_str: RwLock::new(Vec::new()),
        }
    }

    /// Intern a string, returning its id. Idempotent and concurrent.
    pub fn encode(&self, symbol: &str) -> Domain {
        if let Some(id) = self.str_to_id.get(symbol) {
            return *id;
        }
        // The entry shard lock makes the id assignment race-free: only one
        // winner appends to the reverse table.
        *self
            .str_to_id
            .entry(symbol.to_string())
            .or_insert_with(|| {
                let mut table = self.id_to_str.write();
                table.push(symbol.to_string());
                (table.len() - 1) as Domain
            })
            .value()
    }

    /// Resolve an id back to its string. Ids only come from `encode`, so
    /// an unknown id is a corrupted program and fails loudly.
    pub fn decode(&self, id: Domain) -> String {
        let table = self.id_to_str.read();
        match usize::try_from(id).ok().and_then(|i| table.get(i)) {
            Some(s) => s.clone(),
            None => panic!("symbol table: decode of unknown id {id}"),
        }
    }

    /// Membership test that never interns.
    pub fn weak_contains(&self, symbol: &str) -> bool {
        self.str_to_id.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.id_to_str.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
