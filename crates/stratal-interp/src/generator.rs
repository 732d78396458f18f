//! RAM-to-node generation.
//!
//! One walk over the RAM tree produces the executable shadow described in
//! [`crate::node`]. The walk resolves relation names against the engine's
//! handle slots, asks each relation's index advice for the order backing
//! every search, allocates context view slots, splits each query's outer
//! filter into view-free and view-dependent conditions, pre-computes
//! search-bound super-instructions, interns string constants, compiles
//! literal regex patterns, and links user-defined functor calls to their
//! registered implementations. Everything that can fail does so here;
//! dispatch afterwards is total.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use stratal_ram::{
    Aggregator, Condition, ConstraintOp, Domain, Expr, IndexCluster, Operation, Program,
    RangePattern, RelationDecl, Representation, SearchSignature, Statement, TranslationUnit,
};

use crate::error::EvalError;
use crate::functor::{Functor, FunctorRegistry};
use crate::node::{
    AggregateSpec, EngineProgram, Node, RelId, ResolvedAggregator, ResolvedFunctor,
    SuperInstruction, ViewPlan, ViewPlanData, ViewSpec,
};
use crate::symbol::SymbolTable;
use crate::tuple::Row;

/// Per-query bookkeeping while the query subtree is being mirrored.
struct QueryScope {
    plan: Arc<ViewPlan>,
    for_filter: Vec<ViewSpec>,
    for_nested: Vec<ViewSpec>,
    in_outer_filter: bool,
    is_parallel: bool,
}

pub struct NodeGenerator<'a> {
    relations: HashMap<&'a str, (RelId, &'a RelationDecl)>,
    clusters: &'a BTreeMap<String, IndexCluster>,
    functors: &'a FunctorRegistry,
    symbols: &'a SymbolTable,
    subroutine_names: HashSet<&'a str>,
    view_slots: usize,
    tuple_slots: usize,
    profile_labels: Vec<String>,
    query: Option<QueryScope>,
}

impl<'a> NodeGenerator<'a> {
    pub fn generate(
        unit: &'a TranslationUnit,
        relation_ids: &HashMap<String, RelId>,
        functors: &'a FunctorRegistry,
        symbols: &'a SymbolTable,
    ) -> Result<EngineProgram, EvalError> {
        let program: &Program = &unit.program;
        let mut relations = HashMap::new();
        for decl in &program.relations {
            let id = relation_ids[&decl.name];
            relations.insert(decl.name.as_str(), (id, decl));
        }
        let mut generator = NodeGenerator {
            relations,
            clusters: &unit.clusters,
            functors,
            symbols,
            subroutine_names: program.subroutines.keys().map(String::as_str).collect(),
            view_slots: 0,
            tuple_slots: 0,
            profile_labels: Vec::new(),
            query: None,
        };
        let mut subroutines = HashMap::new();
        for (name, body) in &program.subroutines {
            subroutines.insert(name.clone(), generator.statement(body)?);
        }
        let main = generator.statement(&program.main)?;
        Ok(EngineProgram {
            main,
            subroutines,
            tuple_slots: generator.tuple_slots,
            view_slots: generator.view_slots,
            profile_labels: generator.profile_labels,
        })
    }

    // ------------------------------------------------------------------
    // lookups
    // ------------------------------------------------------------------

    fn relation(&self, name: &str) -> Result<(RelId, &'a RelationDecl), EvalError> {
        self.relations
            .get(name)
            .copied()
            .ok_or_else(|| EvalError::UnknownRelation(name.to_string()))
    }

    fn cluster(&self, name: &str) -> Result<&'a IndexCluster, EvalError> {
        self.clusters
            .get(name)
            .ok_or_else(|| EvalError::UnknownRelation(name.to_string()))
    }

    fn index_for(&self, name: &str, signature: SearchSignature) -> Result<usize, EvalError> {
        self.cluster(name)?
            .select(signature)
            .ok_or_else(|| EvalError::NoIndexForSearch { relation: name.to_string(), signature })
    }

    fn note_tuple_id(&mut self, tuple_id: usize) {
        self.tuple_slots = self.tuple_slots.max(tuple_id + 1);
    }

    fn note_profile_text(&mut self, text: &Option<String>) {
        if let Some(text) = text {
            self.profile_labels.push(text.clone());
        }
    }

    /// Allocate a view over the index answering `signature`, registering
    /// it with the enclosing query's plan.
    fn make_view(&mut self, name: &str, signature: SearchSignature) -> Result<ViewSpec, EvalError> {
        let (relation, _) = self.relation(name)?;
        let index_pos = self.index_for(name, signature)?;
        let slot = self.view_slots;
        self.view_slots += 1;
        let spec = ViewSpec { relation, index_pos, slot };
        let scope = self
            .query
            .as_mut()
            .ok_or_else(|| EvalError::OutsideQuery(format!("view over `{name}`")))?;
        if scope.in_outer_filter {
            scope.for_filter.push(spec.clone());
        } else {
            scope.for_nested.push(spec.clone());
        }
        Ok(spec)
    }

    fn mark_parallel(&mut self, what: &str) -> Result<Arc<ViewPlan>, EvalError> {
        let scope = self
            .query
            .as_mut()
            .ok_or_else(|| EvalError::OutsideQuery(what.to_string()))?;
        scope.is_parallel = true;
        Ok(scope.plan.clone())
    }

    // ------------------------------------------------------------------
    // search bounds
    // ------------------------------------------------------------------

    fn signature_of(lower: &[Expr], upper: &[Expr]) -> SearchSignature {
        SearchSignature::from_columns(
            (0..lower.len()).filter(|&i| !lower[i].is_undefined() || !upper[i].is_undefined()),
        )
    }

    /// Compile one bound track: constants into the skeleton row, context
    /// copies and sub-expressions into their patch lists.
    fn bound_track(
        &mut self,
        pattern: &[Expr],
        sentinel: Domain,
        skeleton: &mut Row,
        tuple_patches: &mut Vec<(usize, usize, usize)>,
        expr_patches: &mut Vec<(usize, Node)>,
    ) -> Result<(), EvalError> {
        for (column, expr) in pattern.iter().enumerate() {
            match expr {
                Expr::Undefined => skeleton.push(sentinel),
                Expr::Number(value) => skeleton.push(*value),
                Expr::String(text) => skeleton.push(self.symbols.encode(text)),
                Expr::TupleElement { tuple_id, element } => {
                    self.note_tuple_id(*tuple_id);
                    skeleton.push(sentinel);
                    tuple_patches.push((column, *tuple_id, *element));
                }
                other => {
                    skeleton.push(sentinel);
                    expr_patches.push((column, self.expr(other)?));
                }
            }
        }
        Ok(())
    }

    fn bounds(&mut self, lower: &[Expr], upper: &[Expr]) -> Result<SuperInstruction, EvalError> {
        let mut first = Row::with_capacity(lower.len());
        let mut second = Row::with_capacity(upper.len());
        let mut tuple_first = Vec::new();
        let mut tuple_second = Vec::new();
        let mut expr_first = Vec::new();
        let mut expr_second = Vec::new();
        self.bound_track(lower, Domain::MIN, &mut first, &mut tuple_first, &mut expr_first)?;
        self.bound_track(upper, Domain::MAX, &mut second, &mut tuple_second, &mut expr_second)?;
        Ok(SuperInstruction { first, second, tuple_first, tuple_second, expr_first, expr_second })
    }

    /// Bounds for a total pattern (inserts, erases): every column must be
    /// a proper expression.
    fn total_bounds(
        &mut self,
        relation: &str,
        values: &[Expr],
    ) -> Result<SuperInstruction, EvalError> {
        let (_, decl) = self.relation(relation)?;
        if values.len() != decl.arity {
            return Err(EvalError::PatternArity {
                relation: relation.to_string(),
                expected: decl.arity,
                actual: values.len(),
            });
        }
        if values.iter().any(Expr::is_undefined) {
            return Err(EvalError::UndefinedOutsidePattern);
        }
        self.bounds(values, values)
    }

    fn range_bounds(
        &mut self,
        relation: &str,
        pattern: &RangePattern,
    ) -> Result<(SuperInstruction, SearchSignature), EvalError> {
        let (_, decl) = self.relation(relation)?;
        if pattern.lower.len() != decl.arity || pattern.upper.len() != decl.arity {
            return Err(EvalError::PatternArity {
                relation: relation.to_string(),
                expected: decl.arity,
                actual: pattern.lower.len(),
            });
        }
        let signature = Self::signature_of(&pattern.lower, &pattern.upper);
        Ok((self.bounds(&pattern.lower, &pattern.upper)?, signature))
    }

    // ------------------------------------------------------------------
    // expressions
    // ------------------------------------------------------------------

    fn expr(&mut self, expr: &Expr) -> Result<Node, EvalError> {
        Ok(match expr {
            Expr::Number(value) => Node::NumericConstant(*value),
            Expr::String(text) => Node::StringConstant(self.symbols.encode(text)),
            Expr::Variable(name) => Node::Variable(name.clone()),
            Expr::TupleElement { tuple_id, element } => {
                self.note_tuple_id(*tuple_id);
                Node::TupleElement { tuple_id: *tuple_id, element: *element }
            }
            Expr::AutoIncrement => Node::AutoIncrement,
            Expr::Intrinsic { op, args } => Node::Intrinsic {
                op: *op,
                args: args.iter().map(|a| self.expr(a)).collect::<Result<_, _>>()?,
            },
            Expr::UserDefined { name, args } => self.user_defined(name, args)?,
            Expr::PackRecord(args) => Node::PackRecord(
                args.iter().map(|a| self.expr(a)).collect::<Result<_, _>>()?,
            ),
            Expr::SubroutineArgument(position) => Node::SubroutineArgument(*position),
            Expr::RelationSize(name) => {
                let (relation, _) = self.relation(name)?;
                Node::RelationSize { relation }
            }
            Expr::Undefined => return Err(EvalError::UndefinedOutsidePattern),
        })
    }

    fn user_defined(&mut self, name: &str, args: &[Expr]) -> Result<Node, EvalError> {
        let functor = self
            .functors
            .resolve(name)
            .ok_or_else(|| EvalError::UnresolvedFunctor(name.to_string()))?;
        if functor.arity() != args.len() {
            return Err(EvalError::FunctorArity {
                name: name.to_string(),
                expected: functor.arity(),
                actual: args.len(),
            });
        }
        let resolved = match functor {
            Functor::Stateless { arg_types, return_type, func } => ResolvedFunctor::Stateless {
                arg_types: arg_types.clone(),
                return_type: *return_type,
                func: *func,
            },
            Functor::Stateful { func, .. } => ResolvedFunctor::Stateful { func: *func },
        };
        Ok(Node::UserDefined {
            name: name.to_string(),
            functor: resolved,
            args: args.iter().map(|a| self.expr(a)).collect::<Result<_, _>>()?,
        })
    }

    // ------------------------------------------------------------------
    // conditions
    // ------------------------------------------------------------------

    fn condition(&mut self, condition: &Condition) -> Result<Node, EvalError> {
        Ok(match condition {
            Condition::True => Node::True,
            Condition::False => Node::False,
            Condition::Conjunction(children) => Node::Conjunction(
                children.iter().map(|c| self.condition(c)).collect::<Result<_, _>>()?,
            ),
            Condition::Negation(inner) => Node::Negation(Box::new(self.condition(inner)?)),
            Condition::Constraint { op, lhs, rhs } => {
                let lhs = if matches!(op, ConstraintOp::Match | ConstraintOp::NotMatch) {
                    self.match_pattern(lhs)?
                } else {
                    self.expr(lhs)?
                };
                Node::Constraint { op: *op, lhs: Box::new(lhs), rhs: Box::new(self.expr(rhs)?) }
            }
            Condition::EmptinessCheck { relation } => {
                let (relation, _) = self.relation(relation)?;
                Node::EmptinessCheck { relation }
            }
            Condition::ExistenceCheck { relation, pattern } => {
                let (_, decl) = self.relation(relation)?;
                if pattern.len() != decl.arity {
                    return Err(EvalError::PatternArity {
                        relation: relation.clone(),
                        expected: decl.arity,
                        actual: pattern.len(),
                    });
                }
                let signature = Self::signature_of(pattern, pattern);
                let view = self.make_view(relation, signature)?;
                let total = pattern.iter().all(|e| !e.is_undefined());
                Node::ExistenceCheck {
                    relation_name: relation.clone(),
                    is_temp: decl.is_temp(),
                    view_slot: view.slot,
                    total,
                    bounds: self.bounds(pattern, pattern)?,
                }
            }
            Condition::ProvenanceExistenceCheck { relation, pattern } => {
                let (_, decl) = self.relation(relation)?;
                assert_eq!(
                    decl.representation,
                    Representation::Provenance,
                    "provenance existence check on non-provenance relation {}",
                    decl.name
                );
                if pattern.len() != decl.arity {
                    return Err(EvalError::PatternArity {
                        relation: relation.clone(),
                        expected: decl.arity,
                        actual: pattern.len(),
                    });
                }
                let payload = decl.arity - 2;
                // Payload columns bound per the pattern; the (rule, level)
                // trailers always scan their full range.
                let mut lower: Vec<Expr> = pattern[..payload].to_vec();
                lower.push(Expr::Undefined);
                lower.push(Expr::Undefined);
                let signature = Self::signature_of(&lower, &lower);
                let view = self.make_view(relation, signature)?;
                Node::ProvenanceExistenceCheck {
                    view_slot: view.slot,
                    bounds: self.bounds(&lower, &lower)?,
                    level: Box::new(self.expr(&pattern[decl.arity - 1])?),
                }
            }
        })
    }

    /// Left side of a `MATCH`: literal patterns compile once, everything
    /// else resolves through the regex cache at probe time.
    fn match_pattern(&mut self, lhs: &Expr) -> Result<Node, EvalError> {
        if let Expr::String(pattern) = lhs {
            let regex = crate::regex_cache::compile_full_match(pattern);
            if regex.is_none() {
                eprintln!("warning: wrong pattern provided for match(\"{pattern}\").");
            }
            return Ok(Node::RegexConstant { pattern: pattern.clone(), regex });
        }
        self.expr(lhs)
    }

    // ------------------------------------------------------------------
    // operations
    // ------------------------------------------------------------------

    fn aggregate_spec(
        &mut self,
        aggregator: &Aggregator,
        expr: &Option<Box<Expr>>,
        condition: &Condition,
    ) -> Result<AggregateSpec, EvalError> {
        let resolved = match aggregator {
            Aggregator::Intrinsic(op) => ResolvedAggregator::Intrinsic(*op),
            Aggregator::UserDefined { name, init } => {
                let functor = self
                    .functors
                    .resolve(name)
                    .ok_or_else(|| EvalError::UnresolvedFunctor(name.clone()))?;
                let Functor::Stateful { arity, func } = functor else {
                    return Err(EvalError::StatelessAggregator(name.clone()));
                };
                if *arity != 2 {
                    return Err(EvalError::FunctorArity {
                        name: name.clone(),
                        expected: 2,
                        actual: *arity,
                    });
                }
                ResolvedAggregator::Stateful { init: Box::new(self.expr(init)?), func: *func }
            }
        };
        Ok(AggregateSpec {
            aggregator: resolved,
            expr: match expr {
                Some(expr) => Some(Box::new(self.expr(expr)?)),
                None => None,
            },
            condition: Box::new(self.condition(condition)?),
        })
    }

    fn operation(&mut self, operation: &Operation) -> Result<Node, EvalError> {
        Ok(match operation {
            Operation::Scan { relation, tuple_id, profile_text, nested } => {
                let (relation, _) = self.relation(relation)?;
                self.note_tuple_id(*tuple_id);
                self.note_profile_text(profile_text);
                Node::Scan {
                    relation,
                    tuple_id: *tuple_id,
                    profile_text: profile_text.clone(),
                    nested: Box::new(self.operation(nested)?),
                }
            }
            Operation::ParallelScan { relation, tuple_id, nested, .. } => {
                let (relation, _) = self.relation(relation)?;
                self.note_tuple_id(*tuple_id);
                let plan = self.mark_parallel("parallel scan")?;
                Node::ParallelScan {
                    relation,
                    tuple_id: *tuple_id,
                    plan,
                    nested: Box::new(self.operation(nested)?),
                }
            }
            Operation::IndexScan { relation, tuple_id, pattern, profile_text, nested } => {
                let (bounds, signature) = self.range_bounds(relation, pattern)?;
                let view = self.make_view(relation, signature)?;
                self.note_tuple_id(*tuple_id);
                self.note_profile_text(profile_text);
                Node::IndexScan {
                    view_slot: view.slot,
                    tuple_id: *tuple_id,
                    bounds,
                    profile_text: profile_text.clone(),
                    nested: Box::new(self.operation(nested)?),
                }
            }
            Operation::ParallelIndexScan { relation, tuple_id, pattern, nested, .. } => {
                let (bounds, signature) = self.range_bounds(relation, pattern)?;
                let (rel_id, _) = self.relation(relation)?;
                let index_pos = self.index_for(relation, signature)?;
                self.note_tuple_id(*tuple_id);
                let plan = self.mark_parallel("parallel index scan")?;
                Node::ParallelIndexScan {
                    relation: rel_id,
                    index_pos,
                    tuple_id: *tuple_id,
                    bounds,
                    plan,
                    nested: Box::new(self.operation(nested)?),
                }
            }
            Operation::IfExists { relation, tuple_id, condition, nested, .. } => {
                let (relation, _) = self.relation(relation)?;
                self.note_tuple_id(*tuple_id);
                Node::IfExists {
                    relation,
                    tuple_id: *tuple_id,
                    condition: Box::new(self.condition(condition)?),
                    nested: Box::new(self.operation(nested)?),
                }
            }
            Operation::ParallelIfExists { relation, tuple_id, condition, nested, .. } => {
                let (relation, _) = self.relation(relation)?;
                self.note_tuple_id(*tuple_id);
                let plan = self.mark_parallel("parallel if-exists")?;
                Node::ParallelIfExists {
                    relation,
                    tuple_id: *tuple_id,
                    condition: Box::new(self.condition(condition)?),
                    plan,
                    nested: Box::new(self.operation(nested)?),
                }
            }
            Operation::IndexIfExists { relation, tuple_id, pattern, condition, nested, .. } => {
                let (bounds, signature) = self.range_bounds(relation, pattern)?;
                let view = self.make_view(relation, signature)?;
                self.note_tuple_id(*tuple_id);
                Node::IndexIfExists {
                    view_slot: view.slot,
                    tuple_id: *tuple_id,
                    bounds,
                    condition: Box::new(self.condition(condition)?),
                    nested: Box::new(self.operation(nested)?),
                }
            }
            Operation::ParallelIndexIfExists {
                relation, tuple_id, pattern, condition, nested, ..
            } => {
                let (bounds, signature) = self.range_bounds(relation, pattern)?;
                let (rel_id, _) = self.relation(relation)?;
                let index_pos = self.index_for(relation, signature)?;
                self.note_tuple_id(*tuple_id);
                let plan = self.mark_parallel("parallel index if-exists")?;
                Node::ParallelIndexIfExists {
                    relation: rel_id,
                    index_pos,
                    tuple_id: *tuple_id,
                    bounds,
                    condition: Box::new(self.condition(condition)?),
                    plan,
                    nested: Box::new(self.operation(nested)?),
                }
            }
            Operation::Aggregate { relation, tuple_id, aggregator, expr, condition, nested } => {
                let (relation, _) = self.relation(relation)?;
                self.note_tuple_id(*tuple_id);
                Node::Aggregate {
                    relation,
                    tuple_id: *tuple_id,
                    spec: self.aggregate_spec(aggregator, expr, condition)?,
                    nested: Box::new(self.operation(nested)?),
                }
            }
            Operation::ParallelAggregate {
                relation, tuple_id, aggregator, expr, condition, nested,
            } => {
                let (relation, _) = self.relation(relation)?;
                self.note_tuple_id(*tuple_id);
                let plan = self.mark_parallel("parallel aggregate")?;
                Node::ParallelAggregate {
                    relation,
                    tuple_id: *tuple_id,
                    spec: self.aggregate_spec(aggregator, expr, condition)?,
                    plan,
                    nested: Box::new(self.operation(nested)?),
                }
            }
            Operation::IndexAggregate {
                relation, tuple_id, pattern, aggregator, expr, condition, nested,
            } => {
                let (bounds, signature) = self.range_bounds(relation, pattern)?;
                let view = self.make_view(relation, signature)?;
                self.note_tuple_id(*tuple_id);
                Node::IndexAggregate {
                    view_slot: view.slot,
                    tuple_id: *tuple_id,
                    bounds,
                    spec: self.aggregate_spec(aggregator, expr, condition)?,
                    nested: Box::new(self.operation(nested)?),
                }
            }
            Operation::ParallelIndexAggregate {
                relation, tuple_id, pattern, aggregator, expr, condition, nested,
            } => {
                let (bounds, signature) = self.range_bounds(relation, pattern)?;
                let view = self.make_view(relation, signature)?;
                self.note_tuple_id(*tuple_id);
                let plan = self.mark_parallel("parallel index aggregate")?;
                Node::ParallelIndexAggregate {
                    view_slot: view.slot,
                    tuple_id: *tuple_id,
                    bounds,
                    spec: self.aggregate_spec(aggregator, expr, condition)?,
                    plan,
                    nested: Box::new(self.operation(nested)?),
                }
            }
            Operation::UnpackRecord { expr, arity, tuple_id, nested } => {
                self.note_tuple_id(*tuple_id);
                Node::UnpackRecord {
                    expr: Box::new(self.expr(expr)?),
                    arity: *arity,
                    tuple_id: *tuple_id,
                    nested: Box::new(self.operation(nested)?),
                }
            }
            Operation::NestedIntrinsic { op, args, tuple_id, nested } => {
                assert!(
                    (2..=3).contains(&args.len()),
                    "range emitter takes from/to and an optional step"
                );
                self.note_tuple_id(*tuple_id);
                Node::NestedIntrinsic {
                    op: *op,
                    args: args.iter().map(|a| self.expr(a)).collect::<Result<_, _>>()?,
                    tuple_id: *tuple_id,
                    nested: Box::new(self.operation(nested)?),
                }
            }
            Operation::Filter { condition, profile_text, nested } => {
                self.note_profile_text(profile_text);
                Node::Filter {
                    condition: Box::new(self.condition(condition)?),
                    profile_text: profile_text.clone(),
                    nested: Box::new(self.operation(nested)?),
                }
            }
            Operation::Break { condition, nested } => Node::Break {
                condition: Box::new(self.condition(condition)?),
                nested: Box::new(self.operation(nested)?),
            },
            Operation::Insert { relation, values } => {
                let (rel_id, _) = self.relation(relation)?;
                Node::Insert { relation: rel_id, bounds: self.total_bounds(relation, values)? }
            }
            Operation::GuardedInsert { relation, values, condition } => {
                let (rel_id, _) = self.relation(relation)?;
                Node::GuardedInsert {
                    relation: rel_id,
                    bounds: self.total_bounds(relation, values)?,
                    condition: Box::new(self.condition(condition)?),
                }
            }
            Operation::Erase { relation, values } => {
                let (rel_id, decl) = self.relation(relation)?;
                if decl.representation != Representation::BtreeDelete {
                    return Err(EvalError::EraseUnsupported(relation.clone()));
                }
                Node::Erase { relation: rel_id, bounds: self.total_bounds(relation, values)? }
            }
            Operation::SubroutineReturn { values } => Node::SubroutineReturn(
                values
                    .iter()
                    .map(|value| value.as_ref().map(|v| self.expr(v)).transpose())
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    // ------------------------------------------------------------------
    // statements
    // ------------------------------------------------------------------

    /// Flatten nested conjunctions into their terms.
    fn conjunctive_terms(condition: &Condition) -> Vec<&Condition> {
        match condition {
            Condition::Conjunction(children) => {
                children.iter().flat_map(Self::conjunctive_terms).collect()
            }
            other => vec![other],
        }
    }

    fn query(&mut self, operation: &Operation) -> Result<Node, EvalError> {
        let plan = ViewPlan::unsealed();
        let previous = self.query.replace(QueryScope {
            plan: plan.clone(),
            for_filter: Vec::new(),
            for_nested: Vec::new(),
            in_outer_filter: false,
            is_parallel: false,
        });

        // Hoist the outermost filter: its terms run before any tuple work,
        // view-free ones first so most failing queries never build a view.
        let mut outer_free = Vec::new();
        let mut outer_with_views = Vec::new();
        let inner = if let Operation::Filter { condition, nested, .. } = operation {
            for term in Self::conjunctive_terms(condition) {
                let scope = self.query.as_mut().expect("query scope just installed");
                scope.in_outer_filter = true;
                let views_before = scope.for_filter.len();
                let node = self.condition(term)?;
                let scope = self.query.as_mut().expect("query scope just installed");
                scope.in_outer_filter = false;
                if scope.for_filter.len() == views_before {
                    outer_free.push(node);
                } else {
                    outer_with_views.push(node);
                }
            }
            nested.as_ref()
        } else {
            operation
        };

        let nested = self.operation(inner)?;
        let scope = self.query.take().expect("query scope just installed");
        self.query = previous;
        plan.seal(ViewPlanData { for_nested: scope.for_nested, is_parallel: scope.is_parallel });
        Ok(Node::Query {
            outer_free,
            views_for_filter: scope.for_filter,
            outer_with_views,
            plan,
            nested: Box::new(nested),
        })
    }

    fn statement(&mut self, statement: &Statement) -> Result<Node, EvalError> {
        Ok(match statement {
            Statement::Sequence(children) => Node::Sequence(
                children.iter().map(|c| self.statement(c)).collect::<Result<_, _>>()?,
            ),
            Statement::Parallel(children) => Node::Parallel(
                children.iter().map(|c| self.statement(c)).collect::<Result<_, _>>()?,
            ),
            Statement::Loop(child) => Node::Loop(Box::new(self.statement(child)?)),
            Statement::Exit(condition) => Node::Exit(Box::new(self.condition(condition)?)),
            Statement::Query(operation) => self.query(operation)?,
            Statement::Call(name) => {
                if !self.subroutine_names.contains(name.as_str()) {
                    return Err(EvalError::UnknownSubroutine(name.clone()));
                }
                Node::Call { name: name.clone() }
            }
            Statement::Clear(name) => {
                let (relation, _) = self.relation(name)?;
                Node::Clear { relation }
            }
            Statement::Swap(source, target) => {
                let (source, source_decl) = self.relation(source)?;
                let (target, target_decl) = self.relation(target)?;
                assert_eq!(
                    source_decl.arity, target_decl.arity,
                    "swap of differently-shaped relations"
                );
                Node::Swap { source, target }
            }
            Statement::MergeExtend { source, target } => {
                let (source_id, source_decl) = self.relation(source)?;
                let (target_id, target_decl) = self.relation(target)?;
                if source_decl.representation != Representation::Equivalence
                    || target_decl.representation != Representation::Equivalence
                {
                    return Err(EvalError::MergeExtendUnsupported {
                        source_rel: source.clone(),
                        target: target.clone(),
                    });
                }
                Node::MergeExtend { source: source_id, target: target_id }
            }
            Statement::Assign { variable, value } => Node::Assign {
                variable: variable.clone(),
                value: Box::new(self.expr(value)?),
            },
            Statement::IO { relation, directives } => {
                let (relation, _) = self.relation(relation)?;
                Node::Io { relation, directives: directives.clone() }
            }
            Statement::LogSize { relation, message } => {
                let (relation, _) = self.relation(relation)?;
                Node::LogSize { relation, message: message.clone() }
            }
            Statement::LogTimer { message, nested } => Node::LogTimer {
                message: message.clone(),
                nested: Box::new(self.statement(nested)?),
            },
            Statement::LogRelationTimer { relation, message, nested } => {
                let (relation, _) = self.relation(relation)?;
                Node::LogRelationTimer {
                    relation,
                    message: message.clone(),
                    nested: Box::new(self.statement(nested)?),
                }
            }
            Statement::DebugInfo { message, nested } => Node::DebugInfo {
                message: message.clone(),
                nested: Box::new(self.statement(nested)?),
            },
            Statement::EstimateJoinSize { relation, columns, constants, recursive } => {
                self.estimate_join_size(relation, columns, constants, *recursive)?
            }
        })
    }

    fn estimate_join_size(
        &mut self,
        relation: &str,
        columns: &[usize],
        constants: &BTreeMap<usize, Expr>,
        recursive: bool,
    ) -> Result<Node, EvalError> {
        let (rel_id, _) = self.relation(relation)?;
        let signature =
            SearchSignature::from_columns(columns.iter().chain(constants.keys()).copied());
        let index_pos = self.index_for(relation, signature)?;

        let mut resolved = Vec::with_capacity(constants.len());
        let mut constants_desc = String::from("{");
        for (i, (&column, expr)) in constants.iter().enumerate() {
            let value = match expr {
                Expr::Number(value) => *value,
                Expr::String(text) => self.symbols.encode(text),
                _ => return Err(EvalError::EstimateConstant(relation.to_string())),
            };
            resolved.push((column, value));
            if i > 0 {
                constants_desc.push(',');
            }
            constants_desc.push_str(&format!("{column}->{value}"));
        }
        constants_desc.push('}');

        let columns_desc = format!(
            "[{}]",
            columns.iter().map(usize::to_string).collect::<Vec<_>>().join(",")
        );

        Ok(Node::EstimateJoinSize {
            relation: rel_id,
            relation_name: relation.to_string(),
            index_pos,
            key_columns: columns.to_vec(),
            constants: resolved,
            recursive,
            columns_desc,
            constants_desc,
        })
    }
}
