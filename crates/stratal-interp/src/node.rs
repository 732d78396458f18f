//! The executable shadow of a RAM program.
//!
//! Node generation walks the RAM tree exactly once and mirrors it into
//! this tree, resolving everything dispatch would otherwise re-derive per
//! visit: relation names become handle ids, existence and range probes
//! get view slots and pre-compiled search bounds, string constants are
//! interned, literal regex patterns are compiled, and functor names are
//! linked to their registered function pointers. Nodes are immutable
//! after generation and shared freely across worker threads.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use stratal_ram::{
    AggregateOp, ConstraintOp, Domain, IntrinsicOp, IoDirectives, NestedIntrinsicOp, TypeTag,
};

use crate::functor::{StatefulFn, StatelessFn};
use crate::tuple::Row;

/// Position of a relation's handle slot in the engine.
pub type RelId = usize;

// ============================================================================
// Search bounds
// ============================================================================

/// Pre-compiled recipe for materializing search-bound tuples.
///
/// `first`/`second` hold the constant skeleton (with min/max sentinels on
/// unbounded coordinates); `tuple_*` patch columns copied from the
/// context; `expr_*` patch columns needing sub-evaluation. Total
/// operations (insert, point existence) only use the `first` track.
pub struct SuperInstruction {
    pub first: Row,
    pub second: Row,
    /// `(column, tuple_id, element)` copies.
    pub tuple_first: Vec<(usize, usize, usize)>,
    pub tuple_second: Vec<(usize, usize, usize)>,
    /// `(column, expression)` evaluations.
    pub expr_first: Vec<(usize, Node)>,
    pub expr_second: Vec<(usize, Node)>,
}

impl SuperInstruction {
    pub fn arity(&self) -> usize {
        self.first.len()
    }
}

// ============================================================================
// View plans
// ============================================================================

/// One view to create: relation handle, index, and the context slot the
/// probes inside the query address.
#[derive(Debug, Clone)]
pub struct ViewSpec {
    pub relation: RelId,
    pub index_pos: usize,
    pub slot: usize,
}

/// The per-query view plan shared between the `Query` node and any
/// parallel operations under it. Generation seals it once the whole
/// query subtree is mirrored; afterwards it is read-only.
pub struct ViewPlan {
    data: OnceLock<ViewPlanData>,
}

pub struct ViewPlanData {
    /// Views the nested operation needs. Serial queries create them once;
    /// parallel queries leave creation to each worker.
    pub for_nested: Vec<ViewSpec>,
    pub is_parallel: bool,
}

impl ViewPlan {
    pub fn unsealed() -> Arc<ViewPlan> {
        Arc::new(ViewPlan { data: OnceLock::new() })
    }

    pub fn seal(&self, data: ViewPlanData) {
        if self.data.set(data).is_err() {
            panic!("view plan sealed twice");
        }
    }

    pub fn data(&self) -> &ViewPlanData {
        self.data.get().expect("view plan read before generation sealed it")
    }
}

// ============================================================================
// Resolved functors and aggregators
// ============================================================================

pub enum ResolvedFunctor {
    Stateless {
        arg_types: Vec<TypeTag>,
        return_type: TypeTag,
        func: StatelessFn,
    },
    Stateful {
        func: StatefulFn,
    },
}

pub enum ResolvedAggregator {
    Intrinsic(AggregateOp),
    /// A stateful functor folded as `res = f(sym, rec, res, val)`.
    Stateful { init: Box<Node>, func: StatefulFn },
}

/// The per-site pieces every aggregate variant shares.
pub struct AggregateSpec {
    pub aggregator: ResolvedAggregator,
    pub expr: Option<Box<Node>>,
    pub condition: Box<Node>,
}

// ============================================================================
// Nodes
// ============================================================================

pub enum Node {
    // ---- expressions ----
    NumericConstant(Domain),
    /// Pre-interned symbol id.
    StringConstant(Domain),
    /// Literal `MATCH` pattern, compiled at generation. `None` records a
    /// compile failure; probes then warn and take the failure default.
    RegexConstant {
        pattern: String,
        regex: Option<Regex>,
    },
    Variable(String),
    AutoIncrement,
    TupleElement {
        tuple_id: usize,
        element: usize,
    },
    Intrinsic {
        op: IntrinsicOp,
        args: Vec<Node>,
    },
    UserDefined {
        name: String,
        functor: ResolvedFunctor,
        args: Vec<Node>,
    },
    PackRecord(Vec<Node>),
    SubroutineArgument(usize),
    RelationSize {
        relation: RelId,
    },

    // ---- conditions ----
    True,
    False,
    Conjunction(Vec<Node>),
    Negation(Box<Node>),
    EmptinessCheck {
        relation: RelId,
    },
    ExistenceCheck {
        relation_name: String,
        is_temp: bool,
        view_slot: usize,
        /// No unbounded coordinate: a point probe instead of a range.
        total: bool,
        bounds: SuperInstruction,
    },
    ProvenanceExistenceCheck {
        view_slot: usize,
        bounds: SuperInstruction,
        /// Level bound; the probe passes when the first matching tuple's
        /// level column is `<=` this.
        level: Box<Node>,
    },
    Constraint {
        op: ConstraintOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },

    // ---- tuple operations ----
    Scan {
        relation: RelId,
        tuple_id: usize,
        profile_text: Option<String>,
        nested: Box<Node>,
    },
    ParallelScan {
        relation: RelId,
        tuple_id: usize,
        plan: Arc<ViewPlan>,
        nested: Box<Node>,
    },
    IndexScan {
        view_slot: usize,
        tuple_id: usize,
        bounds: SuperInstruction,
        profile_text: Option<String>,
        nested: Box<Node>,
    },
    ParallelIndexScan {
        relation: RelId,
        index_pos: usize,
        tuple_id: usize,
        bounds: SuperInstruction,
        plan: Arc<ViewPlan>,
        nested: Box<Node>,
    },
    IfExists {
        relation: RelId,
        tuple_id: usize,
        condition: Box<Node>,
        nested: Box<Node>,
    },
    ParallelIfExists {
        relation: RelId,
        tuple_id: usize,
        condition: Box<Node>,
        plan: Arc<ViewPlan>,
        nested: Box<Node>,
    },
    IndexIfExists {
        view_slot: usize,
        tuple_id: usize,
        bounds: SuperInstruction,
        condition: Box<Node>,
        nested: Box<Node>,
    },
    ParallelIndexIfExists {
        relation: RelId,
        index_pos: usize,
        tuple_id: usize,
        bounds: SuperInstruction,
        condition: Box<Node>,
        plan: Arc<ViewPlan>,
        nested: Box<Node>,
    },
    Aggregate {
        relation: RelId,
        tuple_id: usize,
        spec: AggregateSpec,
        nested: Box<Node>,
    },
    ParallelAggregate {
        relation: RelId,
        tuple_id: usize,
        spec: AggregateSpec,
        plan: Arc<ViewPlan>,
        nested: Box<Node>,
    },
    IndexAggregate {
        view_slot: usize,
        tuple_id: usize,
        bounds: SuperInstruction,
        spec: AggregateSpec,
        nested: Box<Node>,
    },
    ParallelIndexAggregate {
        view_slot: usize,
        tuple_id: usize,
        bounds: SuperInstruction,
        spec: AggregateSpec,
        plan: Arc<ViewPlan>,
        nested: Box<Node>,
    },
    UnpackRecord {
        expr: Box<Node>,
        arity: usize,
        tuple_id: usize,
        nested: Box<Node>,
    },
    NestedIntrinsic {
        op: NestedIntrinsicOp,
        args: Vec<Node>,
        tuple_id: usize,
        nested: Box<Node>,
    },
    Filter {
        condition: Box<Node>,
        profile_text: Option<String>,
        nested: Box<Node>,
    },
    Break {
        condition: Box<Node>,
        nested: Box<Node>,
    },
    Insert {
        relation: RelId,
        bounds: SuperInstruction,
    },
    GuardedInsert {
        relation: RelId,
        bounds: SuperInstruction,
        condition: Box<Node>,
    },
    Erase {
        relation: RelId,
        bounds: SuperInstruction,
    },
    SubroutineReturn(Vec<Option<Node>>),

    // ---- statements ----
    Sequence(Vec<Node>),
    Parallel(Vec<Node>),
    Loop(Box<Node>),
    Exit(Box<Node>),
    Query {
        /// Outer filter conditions needing no views; cheapest first-chance
        /// short circuit.
        outer_free: Vec<Node>,
        views_for_filter: Vec<ViewSpec>,
        /// Outer filter conditions probing through views.
        outer_with_views: Vec<Node>,
        plan: Arc<ViewPlan>,
        nested: Box<Node>,
    },
    Call {
        name: String,
    },
    Clear {
        relation: RelId,
    },
    Swap {
        source: RelId,
        target: RelId,
    },
    MergeExtend {
        source: RelId,
        target: RelId,
    },
    Assign {
        variable: String,
        value: Box<Node>,
    },
    Io {
        relation: RelId,
        directives: IoDirectives,
    },
    LogSize {
        relation: RelId,
        message: String,
    },
    LogTimer {
        message: String,
        nested: Box<Node>,
    },
    LogRelationTimer {
        relation: RelId,
        message: String,
        nested: Box<Node>,
    },
    DebugInfo {
        message: String,
        nested: Box<Node>,
    },
    EstimateJoinSize {
        relation: RelId,
        relation_name: String,
        index_pos: usize,
        key_columns: Vec<usize>,
        /// Constant requirements in original column space.
        constants: Vec<(usize, Domain)>,
        recursive: bool,
        /// Pre-rendered event text fragments.
        columns_desc: String,
        constants_desc: String,
    },
}

/// The generated program: the main tree, subroutine trees, and the slot
/// counts contexts must be sized with.
pub struct EngineProgram {
    pub main: Node,
    pub subroutines: std::collections::HashMap<String, Node>,
    pub tuple_slots: usize,
    pub view_slots: usize,
    /// Profile labels of every tuple operation, registered up front so
    /// frequency output covers rules that never fire.
    pub profile_labels: Vec<String>,
}
