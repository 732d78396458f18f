//! Relation declarations.

use serde::{Deserialize, Serialize};

/// Attribute (and functor argument) type tags. Types never travel with
/// values at runtime; they drive I/O conversion and functor marshaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    Signed,
    Unsigned,
    Float,
    Symbol,
    Record,
    Adt,
}

/// Physical representation of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Representation {
    /// Ordered set; the default.
    Btree,
    /// Ordered set supporting erase.
    BtreeDelete,
    /// Binary relation closed under reflexivity, symmetry, transitivity.
    Equivalence,
    /// Ordered set whose last two columns are `(rule_number, level_number)`;
    /// lookups partition on the payload columns.
    Provenance,
}

/// Declaration of one named relation in a RAM program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDecl {
    pub name: String,
    pub arity: usize,
    /// Trailing columns carrying bookkeeping rather than payload
    /// (2 for provenance relations, 0 otherwise).
    pub aux_arity: usize,
    pub attribute_names: Vec<String>,
    pub attribute_types: Vec<TypeTag>,
    pub representation: Representation,
}

impl RelationDecl {
    /// A plain btree relation with all-signed attributes named `x0..xN`.
    pub fn btree(name: impl Into<String>, arity: usize) -> Self {
        Self::with_representation(name, arity, Representation::Btree)
    }

    /// A relation of the given representation with all-signed attributes.
    /// Provenance relations get `@rule_number`/`@level_number` trailers.
    pub fn with_representation(
        name: impl Into<String>,
        arity: usize,
        representation: Representation,
    ) -> Self {
        let aux_arity = match representation {
            Representation::Provenance => 2,
            _ => 0,
        };
        let mut attribute_names: Vec<String> =
            (0..arity.saturating_sub(aux_arity)).map(|i| format!("x{i}")).collect();
        if representation == Representation::Provenance {
            attribute_names.push("@rule_number".to_string());
            attribute_names.push("@level_number".to_string());
        }
        Self {
            name: name.into(),
            arity,
            aux_arity,
            attribute_names,
            attribute_types: vec![TypeTag::Signed; arity],
            representation,
        }
    }

    /// Override the attribute types (length must match the arity).
    pub fn with_types(mut self, types: Vec<TypeTag>) -> Self {
        assert_eq!(types.len(), self.arity, "type list must cover every column");
        self.attribute_types = types;
        self
    }

    /// Number of payload columns (arity minus bookkeeping trailers).
    pub fn payload_arity(&self) -> usize {
        self.arity - self.aux_arity
    }

    /// Relations named with a leading `@` are compiler temporaries and are
    /// excluded from profiling output.
    pub fn is_temp(&self) -> bool {
        self.name.starts_with('@')
    }
}
