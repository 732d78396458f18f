//! RAM program trees.
//!
//! Statements form the imperative skeleton (sequences, fixed-point loops,
//! queries, relation maintenance); operations are the tuple-at-a-time
//! constructs nested inside a query; expressions and conditions are pure
//! except for `AutoIncrement` and the record/symbol interning they may
//! trigger.
//!
//! Tuple ids are assigned by the RAM producer: every tuple-binding
//! operation names the slot its current row occupies, and
//! `Expr::TupleElement` reads a column of such a slot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::Domain;
use crate::index::IndexCluster;
use crate::relation::RelationDecl;

/// Key-value directives passed through to I/O readers and writers.
pub type IoDirectives = BTreeMap<String, String>;

// ============================================================================
// Expressions
// ============================================================================

/// Intrinsic operator opcodes. The `U`/`F` prefixes select the unsigned and
/// float views of the domain word; `S` the symbol view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntrinsicOp {
    // unary
    Ord,
    StrLen,
    Neg,
    FNeg,
    BNot,
    UBNot,
    LNot,
    ULNot,
    // identity and cross-type conversions
    I2I,
    U2U,
    F2F,
    S2S,
    F2I,
    F2U,
    I2U,
    I2F,
    U2I,
    U2F,
    F2S,
    I2S,
    U2S,
    S2F,
    S2I,
    S2U,
    // binary arithmetic
    Add,
    UAdd,
    FAdd,
    Sub,
    USub,
    FSub,
    Mul,
    UMul,
    FMul,
    Div,
    UDiv,
    FDiv,
    Exp,
    UExp,
    FExp,
    Mod,
    UMod,
    // bitwise
    BAnd,
    UBAnd,
    BOr,
    UBOr,
    BXor,
    UBXor,
    BShiftL,
    UBShiftL,
    BShiftR,
    UBShiftR,
    BShiftRUnsigned,
    UBShiftRUnsigned,
    // logical
    LAnd,
    ULAnd,
    LOr,
    ULOr,
    LXor,
    ULXor,
    // n-ary
    Max,
    UMax,
    FMax,
    SMax,
    Min,
    UMin,
    FMin,
    SMin,
    Cat,
    // string
    SubStr,
    SSAdd,
}

/// Range-emitting operators; these only appear under
/// [`Operation::NestedIntrinsic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NestedIntrinsicOp {
    Range,
    URange,
    FRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// A constant word; the producer bitcasts unsigned/float payloads.
    Number(Domain),
    /// A string constant, interned once at node-generation time.
    String(String),
    /// A named variable bound by `Statement::Assign`.
    Variable(String),
    /// Column `element` of the row bound to `tuple_id`.
    TupleElement { tuple_id: usize, element: usize },
    /// The engine-wide monotonic counter; each evaluation yields a fresh
    /// value.
    AutoIncrement,
    Intrinsic { op: IntrinsicOp, args: Vec<Expr> },
    /// A user-defined functor resolved through the registry.
    UserDefined { name: String, args: Vec<Expr> },
    /// Intern a tuple in the record table, yielding its reference id.
    PackRecord(Vec<Expr>),
    /// Positional argument of the enclosing subroutine.
    SubroutineArgument(usize),
    /// Cardinality of a relation.
    RelationSize(String),
    /// An unbounded coordinate in a search pattern. Evaluating it outside
    /// a pattern is a structural error.
    Undefined,
}

impl Expr {
    pub fn number(value: Domain) -> Expr {
        Expr::Number(value)
    }

    pub fn string(value: impl Into<String>) -> Expr {
        Expr::String(value.into())
    }

    pub fn tuple_element(tuple_id: usize, element: usize) -> Expr {
        Expr::TupleElement { tuple_id, element }
    }

    pub fn intrinsic(op: IntrinsicOp, args: Vec<Expr>) -> Expr {
        Expr::Intrinsic { op, args }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Expr::Undefined)
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Expr::Number(_) | Expr::String(_))
    }
}

// ============================================================================
// Conditions
// ============================================================================

/// Binary constraint opcodes, typed like the intrinsic table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintOp {
    Eq,
    FEq,
    Ne,
    FNe,
    Lt,
    ULt,
    FLt,
    SLt,
    Le,
    ULe,
    FLe,
    SLe,
    Gt,
    UGt,
    FGt,
    SGt,
    Ge,
    UGe,
    FGe,
    SGe,
    /// Regex match of the left pattern against the right string.
    Match,
    NotMatch,
    /// Substring containment of the left pattern in the right string.
    Contains,
    NotContains,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    True,
    False,
    /// Short-circuits on the first failing conjunct.
    Conjunction(Vec<Condition>),
    Negation(Box<Condition>),
    Constraint { op: ConstraintOp, lhs: Expr, rhs: Expr },
    EmptinessCheck { relation: String },
    /// Pattern columns are constants, tuple elements, general expressions,
    /// or `Expr::Undefined` for unbounded. A pattern with no unbounded
    /// column is a point-existence test.
    ExistenceCheck { relation: String, pattern: Vec<Expr> },
    /// Pattern covers the payload columns; the last pattern slot is the
    /// level bound expression. The `(rule, level)` trailers themselves are
    /// never constrained by the pattern.
    ProvenanceExistenceCheck { relation: String, pattern: Vec<Expr> },
}

impl Condition {
    pub fn and(conjuncts: Vec<Condition>) -> Condition {
        Condition::Conjunction(conjuncts)
    }

    pub fn negate(inner: Condition) -> Condition {
        Condition::Negation(Box::new(inner))
    }

    pub fn empty(relation: impl Into<String>) -> Condition {
        Condition::EmptinessCheck { relation: relation.into() }
    }

    pub fn compare(op: ConstraintOp, lhs: Expr, rhs: Expr) -> Condition {
        Condition::Constraint { op, lhs, rhs }
    }
}

// ============================================================================
// Aggregators
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateOp {
    Min,
    UMin,
    FMin,
    Max,
    UMax,
    FMax,
    Sum,
    USum,
    FSum,
    Count,
    Mean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Aggregator {
    Intrinsic(AggregateOp),
    /// A stateful functor folded over the accumulator; `init` seeds it.
    UserDefined { name: String, init: Expr },
}

// ============================================================================
// Operations
// ============================================================================

/// Inclusive range pattern for index operations. Both vectors are
/// arity-sized; `Expr::Undefined` marks an unbounded coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangePattern {
    pub lower: Vec<Expr>,
    pub upper: Vec<Expr>,
}

impl RangePattern {
    /// The common equal-bounds case: probe the given columns, leave the
    /// rest unbounded.
    pub fn point(arity: usize, bound: impl IntoIterator<Item = (usize, Expr)>) -> Self {
        let mut lower = vec![Expr::Undefined; arity];
        for (col, expr) in bound {
            lower[col] = expr;
        }
        RangePattern { upper: lower.clone(), lower }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Scan {
        relation: String,
        tuple_id: usize,
        profile_text: Option<String>,
        nested: Box<Operation>,
    },
    ParallelScan {
        relation: String,
        tuple_id: usize,
        profile_text: Option<String>,
        nested: Box<Operation>,
    },
    IndexScan {
        relation: String,
        tuple_id: usize,
        pattern: RangePattern,
        profile_text: Option<String>,
        nested: Box<Operation>,
    },
    ParallelIndexScan {
        relation: String,
        tuple_id: usize,
        pattern: RangePattern,
        profile_text: Option<String>,
        nested: Box<Operation>,
    },
    /// Bind the first tuple satisfying `condition`, then run `nested` at
    /// most once.
    IfExists {
        relation: String,
        tuple_id: usize,
        condition: Condition,
        profile_text: Option<String>,
        nested: Box<Operation>,
    },
    ParallelIfExists {
        relation: String,
        tuple_id: usize,
        condition: Condition,
        profile_text: Option<String>,
        nested: Box<Operation>,
    },
    IndexIfExists {
        relation: String,
        tuple_id: usize,
        pattern: RangePattern,
        condition: Condition,
        profile_text: Option<String>,
        nested: Box<Operation>,
    },
    ParallelIndexIfExists {
        relation: String,
        tuple_id: usize,
        pattern: RangePattern,
        condition: Condition,
        profile_text: Option<String>,
        nested: Box<Operation>,
    },
    /// Fold `expr` over the relation's rows passing `condition`, then bind
    /// the single-column result row to `tuple_id`. `expr` is `None` only
    /// for `Count`.
    Aggregate {
        relation: String,
        tuple_id: usize,
        aggregator: Aggregator,
        expr: Option<Box<Expr>>,
        condition: Condition,
        nested: Box<Operation>,
    },
    ParallelAggregate {
        relation: String,
        tuple_id: usize,
        aggregator: Aggregator,
        expr: Option<Box<Expr>>,
        condition: Condition,
        nested: Box<Operation>,
    },
    IndexAggregate {
        relation: String,
        tuple_id: usize,
        pattern: RangePattern,
        aggregator: Aggregator,
        expr: Option<Box<Expr>>,
        condition: Condition,
        nested: Box<Operation>,
    },
    ParallelIndexAggregate {
        relation: String,
        tuple_id: usize,
        pattern: RangePattern,
        aggregator: Aggregator,
        expr: Option<Box<Expr>>,
        condition: Condition,
        nested: Box<Operation>,
    },
    /// Dereference a record id and bind its tuple. A nil reference (0)
    /// succeeds without binding or running `nested`.
    UnpackRecord {
        expr: Expr,
        arity: usize,
        tuple_id: usize,
        nested: Box<Operation>,
    },
    /// `Range`/`URange`/`FRange`: emit `[from, to)` stepping by the
    /// optional third argument, binding each element to `tuple_id`.
    NestedIntrinsic {
        op: NestedIntrinsicOp,
        args: Vec<Expr>,
        tuple_id: usize,
        nested: Box<Operation>,
    },
    Filter {
        condition: Condition,
        profile_text: Option<String>,
        nested: Box<Operation>,
    },
    /// Terminate the enclosing scan when `condition` holds.
    Break {
        condition: Condition,
        nested: Box<Operation>,
    },
    Insert {
        relation: String,
        values: Vec<Expr>,
    },
    GuardedInsert {
        relation: String,
        values: Vec<Expr>,
        condition: Condition,
    },
    /// Requires a btree-with-delete relation; absent tuples are a no-op.
    Erase {
        relation: String,
        values: Vec<Expr>,
    },
    /// Append values to the subroutine return buffer; `None` appends 0.
    SubroutineReturn { values: Vec<Option<Expr>> },
}

// ============================================================================
// Statements
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// Short-circuits on the first failing child.
    Sequence(Vec<Statement>),
    /// Semantically a sequence; children must not observe an ordering.
    Parallel(Vec<Statement>),
    /// Run the child until it fails, tracking the iteration counter.
    Loop(Box<Statement>),
    /// Invert the condition: a true condition terminates the enclosing
    /// loop or sequence.
    Exit(Condition),
    /// One rule: view setup plus a nested operation tree.
    Query(Operation),
    /// Invoke a named subroutine tree.
    Call(String),
    Clear(String),
    Swap(String, String),
    /// Merge the target equivalence relation's classes into the source.
    MergeExtend { source: String, target: String },
    Assign { variable: String, value: Expr },
    IO { relation: String, directives: IoDirectives },
    LogSize { relation: String, message: String },
    LogTimer { message: String, nested: Box<Statement> },
    LogRelationTimer { relation: String, message: String, nested: Box<Statement> },
    /// Publish the statement description to the watch hook while the
    /// child runs.
    DebugInfo { message: String, nested: Box<Statement> },
    /// Walk an index counting total and duplicate keys under the given
    /// column set and constant bindings; records one profile event.
    EstimateJoinSize {
        relation: String,
        columns: Vec<usize>,
        constants: BTreeMap<usize, Expr>,
        recursive: bool,
    },
}

impl Statement {
    pub fn seq(children: Vec<Statement>) -> Statement {
        Statement::Sequence(children)
    }

    pub fn query(operation: Operation) -> Statement {
        Statement::Query(operation)
    }
}

// ============================================================================
// Programs
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub relations: Vec<RelationDecl>,
    pub main: Statement,
    pub subroutines: BTreeMap<String, Statement>,
}

impl Program {
    pub fn new(relations: Vec<RelationDecl>, main: Statement) -> Self {
        Program { relations, main, subroutines: BTreeMap::new() }
    }

    pub fn with_subroutine(mut self, name: impl Into<String>, body: Statement) -> Self {
        self.subroutines.insert(name.into(), body);
        self
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDecl> {
        self.relations.iter().find(|decl| decl.name == name)
    }

    /// Number of queries in the program (main plus subroutines).
    pub fn query_count(&self) -> usize {
        fn count(statement: &Statement) -> usize {
            match statement {
                Statement::Sequence(children) | Statement::Parallel(children) => {
                    children.iter().map(count).sum()
                }
                Statement::Loop(child)
                | Statement::LogTimer { nested: child, .. }
                | Statement::LogRelationTimer { nested: child, .. }
                | Statement::DebugInfo { nested: child, .. } => count(child),
                Statement::Query(_) => 1,
                _ => 0,
            }
        }
        count(&self.main) + self.subroutines.values().map(count).sum::<usize>()
    }
}

/// A RAM program plus the per-relation index advice the evaluator
/// materializes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationUnit {
    pub program: Program,
    pub clusters: BTreeMap<String, IndexCluster>,
}

impl TranslationUnit {
    pub fn new(program: Program, clusters: BTreeMap<String, IndexCluster>) -> Self {
        TranslationUnit { program, clusters }
    }

    /// Derive clusters by collecting every search signature the program
    /// issues against each relation. Stands in for an upstream index
    /// analysis when none is supplied.
    pub fn with_default_clusters(program: Program) -> Self {
        let mut signatures: BTreeMap<String, Vec<crate::index::SearchSignature>> = BTreeMap::new();
        collect_statement(&program.main, &mut signatures);
        for body in program.subroutines.values() {
            collect_statement(body, &mut signatures);
        }
        let clusters = program
            .relations
            .iter()
            .map(|decl| {
                let sigs = signatures.remove(&decl.name).unwrap_or_default();
                (
                    decl.name.clone(),
                    IndexCluster::covering(decl.arity, decl.aux_arity, sigs),
                )
            })
            .collect();
        TranslationUnit { program, clusters }
    }

    pub fn cluster(&self, relation: &str) -> Option<&IndexCluster> {
        self.clusters.get(relation)
    }
}

// ============================================================================
// Search-signature collection
// ============================================================================

use crate::index::SearchSignature;

fn pattern_signature(lower: &[Expr], upper: &[Expr]) -> SearchSignature {
    SearchSignature::from_columns((0..lower.len()).filter(|&i| {
        !lower[i].is_undefined() || upper.get(i).map_or(false, |e| !e.is_undefined())
    }))
}

fn note(signatures: &mut BTreeMap<String, Vec<SearchSignature>>, relation: &str, sig: SearchSignature) {
    signatures.entry(relation.to_string()).or_default().push(sig);
}

fn collect_condition(condition: &Condition, out: &mut BTreeMap<String, Vec<SearchSignature>>) {
    match condition {
        Condition::Conjunction(children) => {
            for child in children {
                collect_condition(child, out);
            }
        }
        Condition::Negation(inner) => collect_condition(inner, out),
        Condition::ExistenceCheck { relation, pattern } => {
            note(out, relation, pattern_signature(pattern, pattern));
        }
        Condition::ProvenanceExistenceCheck { relation, pattern } => {
            // The (rule, level) trailers are always unbounded.
            let payload = pattern.len().saturating_sub(2);
            let sig = SearchSignature::from_columns(
                (0..payload).filter(|&i| !pattern[i].is_undefined()),
            );
            note(out, relation, sig);
        }
        _ => {}
    }
}

fn collect_operation(operation: &Operation, out: &mut BTreeMap<String, Vec<SearchSignature>>) {
    match operation {
        Operation::Scan { nested, .. } | Operation::ParallelScan { nested, .. } => {
            collect_operation(nested, out)
        }
        Operation::IndexScan { relation, pattern, nested, .. }
        | Operation::ParallelIndexScan { relation, pattern, nested, .. } => {
            note(out, relation, pattern_signature(&pattern.lower, &pattern.upper));
            collect_operation(nested, out);
        }
        Operation::IfExists { condition, nested, .. }
        | Operation::ParallelIfExists { condition, nested, .. } => {
            collect_condition(condition, out);
            collect_operation(nested, out);
        }
        Operation::IndexIfExists { relation, pattern, condition, nested, .. }
        | Operation::ParallelIndexIfExists { relation, pattern, condition, nested, .. } => {
            note(out, relation, pattern_signature(&pattern.lower, &pattern.upper));
            collect_condition(condition, out);
            collect_operation(nested, out);
        }
        Operation::Aggregate { condition, nested, .. }
        | Operation::ParallelAggregate { condition, nested, .. } => {
            collect_condition(condition, out);
            collect_operation(nested, out);
        }
        Operation::IndexAggregate { relation, pattern, condition, nested, .. }
        | Operation::ParallelIndexAggregate { relation, pattern, condition, nested, .. } => {
            note(out, relation, pattern_signature(&pattern.lower, &pattern.upper));
            collect_condition(condition, out);
            collect_operation(nested, out);
        }
        Operation::UnpackRecord { nested, .. }
        | Operation::NestedIntrinsic { nested, .. } => collect_operation(nested, out),
        Operation::Filter { condition, nested, .. } => {
            collect_condition(condition, out);
            collect_operation(nested, out);
        }
        Operation::Break { condition, nested } => {
            collect_condition(condition, out);
            collect_operation(nested, out);
        }
        Operation::GuardedInsert { condition, .. } => collect_condition(condition, out),
        Operation::Insert { .. }
        | Operation::Erase { .. }
        | Operation::SubroutineReturn { .. } => {}
    }
}

fn collect_statement(statement: &Statement, out: &mut BTreeMap<String, Vec<SearchSignature>>) {
    match statement {
        Statement::Sequence(children) | Statement::Parallel(children) => {
            for child in children {
                collect_statement(child, out);
            }
        }
        Statement::Loop(child)
        | Statement::LogTimer { nested: child, .. }
        | Statement::LogRelationTimer { nested: child, .. }
        | Statement::DebugInfo { nested: child, .. } => collect_statement(child, out),
        Statement::Exit(condition) => collect_condition(condition, out),
        Statement::Query(operation) => collect_operation(operation, out),
        Statement::EstimateJoinSize { relation, columns, constants, .. } => {
            let sig = SearchSignature::from_columns(
                columns.iter().chain(constants.keys()).copied(),
            );
            note(out, relation, sig);
        }
        _ => {}
    }
}
