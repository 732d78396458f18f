//! Stratal RAM: the relational algebra machine program representation.
//!
//! A RAM program is the compiled form of a Datalog program: an imperative
//! tree of statements over named relations, with nested tuple operations
//! (scans, existence checks, aggregates) inside each query. The evaluator
//! in `stratal-interp` consumes this tree as-is; construction and
//! optimization of RAM happen upstream.
//!
//! Layout:
//! - `domain`: the 64-bit domain word and its bitcast helpers
//! - `program`: expressions, conditions, operations, statements
//! - `relation`: relation declarations (arity, types, representation)
//! - `index`: per-relation index advice (`IndexCluster`)

pub mod domain;
pub mod index;
pub mod program;
pub mod relation;

pub use domain::{Domain, SHIFT_MASK};
pub use index::{ColumnOrder, IndexCluster, SearchSignature};
pub use program::{
    AggregateOp, Aggregator, Condition, ConstraintOp, Expr, IntrinsicOp, IoDirectives,
    NestedIntrinsicOp, Operation, Program, RangePattern, Statement, TranslationUnit,
};
pub use relation::{RelationDecl, Representation, TypeTag};
