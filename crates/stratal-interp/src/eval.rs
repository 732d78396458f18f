//! Node dispatch.
//!
//! `execute` is total over node kinds and returns one domain word
//! carrying either an expression's value or an operation's success
//! (non-zero continues, zero breaks). Failure never unwinds: bad regexes
//! and out-of-range substrings warn and take their defined defaults, and
//! only reader/writer failures terminate the run.

use stratal_ram::domain::{self, as_float, as_unsigned, from_bool, from_float, from_unsigned, truthy};
use stratal_ram::{AggregateOp, ConstraintOp, Domain, IntrinsicOp, NestedIntrinsicOp, TypeTag};

use crate::context::Context;
use crate::engine::Engine;
use crate::error::fatal;
use crate::functor::NativeValue;
use crate::io::IoSession;
use crate::node::{AggregateSpec, Node, ResolvedAggregator, ResolvedFunctor, SuperInstruction};
use crate::parallel::fork_join;
use crate::tuple::Row;
use crate::watch::Watchdog;

/// Oversplit factor for parallel partitions: many more chunks than
/// workers smooths out skewed key distributions.
const PARTITION_OVERSPLIT: usize = 20;

impl Engine {
    pub(crate) fn execute(&self, node: &Node, ctxt: &mut Context) -> Domain {
        match node {
            // ---------------------------------------------------------- expressions
            Node::NumericConstant(value) => *value,
            Node::StringConstant(id) => *id,
            Node::RegexConstant { pattern, .. } => self.symbols().encode(pattern),
            Node::Variable(name) => ctxt.variable(name),
            Node::AutoIncrement => self.next_counter(),
            Node::TupleElement { tuple_id, element } => ctxt.element(*tuple_id, *element),
            Node::Intrinsic { op, args } => self.intrinsic(*op, args, ctxt),
            Node::UserDefined { name, functor, args } => {
                self.user_defined(name, functor, args, ctxt)
            }
            Node::PackRecord(args) => {
                let mut tuple = Row::with_capacity(args.len());
                for arg in args {
                    tuple.push(self.execute(arg, ctxt));
                }
                self.records().pack(&tuple)
            }
            Node::SubroutineArgument(position) => ctxt.argument(*position),
            Node::RelationSize { relation } => self.relation(*relation).len() as Domain,

            // ---------------------------------------------------------- conditions
            Node::True => 1,
            Node::False => 0,
            Node::Conjunction(children) => {
                for child in children {
                    if !truthy(self.execute(child, ctxt)) {
                        return 0;
                    }
                }
                1
            }
            Node::Negation(inner) => from_bool(!truthy(self.execute(inner, ctxt))),
            Node::EmptinessCheck { relation } => from_bool(self.relation(*relation).is_empty()),
            Node::ExistenceCheck { relation_name, is_temp, view_slot, total, bounds } => {
                if self.profiling() && !is_temp {
                    self.bump_read(relation_name);
                }
                if *total {
                    let tuple = self.point_tuple(bounds, ctxt);
                    from_bool(ctxt.view(*view_slot).contains(&tuple))
                } else {
                    let (low, high) = self.mirrored_range(bounds, ctxt);
                    from_bool(ctxt.view(*view_slot).contains_range(&low, &high))
                }
            }
            Node::ProvenanceExistenceCheck { view_slot, bounds, level } => {
                let (mut low, mut high) = self.mirrored_range(bounds, ctxt);
                let arity = bounds.arity();
                // The (rule, level) trailers always span their full range.
                low[arity - 2] = Domain::MIN;
                low[arity - 1] = Domain::MIN;
                high[arity - 2] = Domain::MAX;
                high[arity - 1] = Domain::MAX;
                match ctxt.view(*view_slot).first_in_range(&low, &high) {
                    None => 0,
                    Some(found) => {
                        from_bool(found[arity - 1] <= self.execute(level, ctxt))
                    }
                }
            }
            Node::Constraint { op, lhs, rhs } => self.constraint(*op, lhs, rhs, ctxt),

            // ---------------------------------------------------------- scans
            Node::Scan { relation, tuple_id, profile_text, nested } => {
                self.note_frequency(profile_text);
                let rel = self.relation(*relation);
                for row in rel.scan() {
                    ctxt.set_tuple(*tuple_id, row);
                    if !truthy(self.execute(nested, ctxt)) {
                        break;
                    }
                }
                1
            }
            Node::ParallelScan { relation, tuple_id, plan, nested } => {
                let rel = self.relation(*relation);
                let parts = rel.partition_scan(self.threads() * PARTITION_OVERSPLIT);
                let plan = plan.data();
                let parent: &Context = ctxt;
                fork_join(self.threads(), parts, |queue| {
                    let mut worker = parent.clone();
                    self.create_views(&plan.for_nested, &mut worker);
                    while let Some(part) = queue.next() {
                        for row in part {
                            worker.set_tuple(*tuple_id, row);
                            if !truthy(self.execute(nested, &mut worker)) {
                                break;
                            }
                        }
                    }
                });
                1
            }
            Node::IndexScan { view_slot, tuple_id, bounds, profile_text, nested } => {
                self.note_frequency(profile_text);
                let (low, high) = self.range_tuples(bounds, ctxt);
                let view = ctxt.view(*view_slot).clone();
                for row in view.range(&low, &high) {
                    ctxt.set_tuple(*tuple_id, row);
                    if !truthy(self.execute(nested, ctxt)) {
                        break;
                    }
                }
                1
            }
            Node::ParallelIndexScan { relation, index_pos, tuple_id, bounds, plan, nested } => {
                let (low, high) = self.range_tuples(bounds, ctxt);
                let rel = self.relation(*relation);
                let parts = rel.partition_range(
                    *index_pos,
                    &low,
                    &high,
                    self.threads() * PARTITION_OVERSPLIT,
                );
                let plan = plan.data();
                let parent: &Context = ctxt;
                fork_join(self.threads(), parts, |queue| {
                    let mut worker = parent.clone();
                    self.create_views(&plan.for_nested, &mut worker);
                    while let Some(part) = queue.next() {
                        for row in part {
                            worker.set_tuple(*tuple_id, row);
                            if !truthy(self.execute(nested, &mut worker)) {
                                break;
                            }
                        }
                    }
                });
                1
            }

            // ---------------------------------------------------------- if-exists
            Node::IfExists { relation, tuple_id, condition, nested } => {
                let rel = self.relation(*relation);
                for row in rel.scan() {
                    ctxt.set_tuple(*tuple_id, row);
                    if truthy(self.execute(condition, ctxt)) {
                        self.execute(nested, ctxt);
                        break;
                    }
                }
                1
            }
            Node::ParallelIfExists { relation, tuple_id, condition, plan, nested } => {
                let rel = self.relation(*relation);
                let parts = rel.partition_scan(self.threads() * PARTITION_OVERSPLIT);
                let plan = plan.data();
                let parent: &Context = ctxt;
                fork_join(self.threads(), parts, |queue| {
                    let mut worker = parent.clone();
                    self.create_views(&plan.for_nested, &mut worker);
                    while let Some(part) = queue.next() {
                        for row in part {
                            worker.set_tuple(*tuple_id, row);
                            if truthy(self.execute(condition, &mut worker)) {
                                self.execute(nested, &mut worker);
                                break;
                            }
                        }
                    }
                });
                1
            }
            Node::IndexIfExists { view_slot, tuple_id, bounds, condition, nested } => {
                let (low, high) = self.range_tuples(bounds, ctxt);
                let view = ctxt.view(*view_slot).clone();
                for row in view.range(&low, &high) {
                    ctxt.set_tuple(*tuple_id, row);
                    if truthy(self.execute(condition, ctxt)) {
                        self.execute(nested, ctxt);
                        break;
                    }
                }
                1
            }
            Node::ParallelIndexIfExists {
                relation, index_pos, tuple_id, bounds, condition, plan, nested,
            } => {
                let (low, high) = self.range_tuples(bounds, ctxt);
                let rel = self.relation(*relation);
                let parts = rel.partition_range(
                    *index_pos,
                    &low,
                    &high,
                    self.threads() * PARTITION_OVERSPLIT,
                );
                let plan = plan.data();
                let parent: &Context = ctxt;
                fork_join(self.threads(), parts, |queue| {
                    let mut worker = parent.clone();
                    self.create_views(&plan.for_nested, &mut worker);
                    while let Some(part) = queue.next() {
                        for row in part {
                            worker.set_tuple(*tuple_id, row);
                            if truthy(self.execute(condition, &mut worker)) {
                                self.execute(nested, &mut worker);
                                break;
                            }
                        }
                    }
                });
                1
            }

            // ---------------------------------------------------------- aggregates
            Node::Aggregate { relation, tuple_id, spec, nested } => {
                let rel = self.relation(*relation);
                self.aggregate(*tuple_id, spec, nested, rel.scan(), ctxt)
            }
            Node::ParallelAggregate { relation, tuple_id, spec, plan, nested } => {
                // A single accumulator admits no fan-out; run serially in
                // a worker-style context with its own views.
                let rel = self.relation(*relation);
                let mut worker = ctxt.clone();
                self.create_views(&plan.data().for_nested, &mut worker);
                self.aggregate(*tuple_id, spec, nested, rel.scan(), &mut worker)
            }
            Node::IndexAggregate { view_slot, tuple_id, bounds, spec, nested } => {
                let (low, high) = self.range_tuples(bounds, ctxt);
                let view = ctxt.view(*view_slot).clone();
                self.aggregate(*tuple_id, spec, nested, view.range(&low, &high), ctxt)
            }
            Node::ParallelIndexAggregate { view_slot, tuple_id, bounds, spec, plan, nested } => {
                let mut worker = ctxt.clone();
                self.create_views(&plan.data().for_nested, &mut worker);
                let (low, high) = self.range_tuples(bounds, &mut worker);
                let view = worker.view(*view_slot).clone();
                self.aggregate(*tuple_id, spec, nested, view.range(&low, &high), &mut worker)
            }

            // ---------------------------------------------------------- record traversal
            Node::UnpackRecord { expr, arity, tuple_id, nested } => {
                let reference = self.execute(expr, ctxt);
                // nil short-circuits to success without binding
                if reference == 0 {
                    return 1;
                }
                let tuple = self.records().unpack(reference, *arity);
                ctxt.set_tuple(*tuple_id, tuple);
                self.execute(nested, ctxt)
            }
            Node::NestedIntrinsic { op, args, tuple_id, nested } => {
                self.range_emitter(*op, args, *tuple_id, nested, ctxt)
            }

            // ---------------------------------------------------------- filters and writes
            Node::Filter { condition, profile_text, nested } => {
                self.note_frequency(profile_text);
                if truthy(self.execute(condition, ctxt)) {
                    self.execute(nested, ctxt)
                } else {
                    1
                }
            }
            Node::Break { condition, nested } => {
                if truthy(self.execute(condition, ctxt)) {
                    return 0;
                }
                self.execute(nested, ctxt)
            }
            Node::Insert { relation, bounds } => {
                let tuple = self.point_tuple(bounds, ctxt);
                self.relation(*relation).insert(&tuple);
                1
            }
            Node::GuardedInsert { relation, bounds, condition } => {
                if !truthy(self.execute(condition, ctxt)) {
                    return 1;
                }
                let tuple = self.point_tuple(bounds, ctxt);
                self.relation(*relation).insert(&tuple);
                1
            }
            Node::Erase { relation, bounds } => {
                let tuple = self.point_tuple(bounds, ctxt);
                self.relation(*relation).erase(&tuple);
                1
            }
            Node::SubroutineReturn(values) => {
                for value in values {
                    match value {
                        Some(node) => {
                            let value = self.execute(node, ctxt);
                            ctxt.add_return(value);
                        }
                        None => ctxt.add_return(0),
                    }
                }
                1
            }

            // ---------------------------------------------------------- control
            Node::Sequence(children) | Node::Parallel(children) => {
                for child in children {
                    if !truthy(self.execute(child, ctxt)) {
                        return 0;
                    }
                }
                1
            }
            Node::Loop(child) => {
                self.reset_iteration();
                while truthy(self.execute(child, ctxt)) {
                    self.increment_iteration();
                }
                self.reset_iteration();
                1
            }
            Node::Exit(condition) => from_bool(!truthy(self.execute(condition, ctxt))),
            Node::Query { outer_free, views_for_filter, outer_with_views, plan, nested } => {
                // View-free outer conditions first: most failing queries
                // never pay for view creation.
                for op in outer_free {
                    if !truthy(self.execute(op, ctxt)) {
                        return 1;
                    }
                }
                self.create_views(views_for_filter, ctxt);
                for op in outer_with_views {
                    if !truthy(self.execute(op, ctxt)) {
                        return 1;
                    }
                }
                let plan = plan.data();
                if !plan.is_parallel {
                    self.create_views(&plan.for_nested, ctxt);
                }
                self.execute(nested, ctxt);
                1
            }
            Node::Call { name } => {
                self.execute(self.subroutine(name), ctxt);
                1
            }
            Node::Clear { relation } => {
                self.relation(*relation).purge();
                1
            }
            Node::Swap { source, target } => {
                self.swap_relations(*source, *target);
                1
            }
            Node::MergeExtend { source, target } => {
                let source = self.relation(*source);
                let target = self.relation(*target);
                source.extend_and_insert(&target);
                1
            }
            Node::Assign { variable, value } => {
                let value = self.execute(value, ctxt);
                ctxt.set_variable(variable, value);
                1
            }
            Node::Io { relation, directives } => self.io_statement(*relation, directives),
            Node::LogSize { relation, message } => {
                if let Some(log) = self.profile_log() {
                    log.quantity_event(
                        message,
                        self.relation(*relation).len() as u64,
                        self.iteration(),
                    );
                }
                1
            }
            Node::LogTimer { message, nested } => {
                let start = std::time::Instant::now();
                let result = self.execute(nested, ctxt);
                if let Some(log) = self.profile_log() {
                    let micros = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
                    log.timing_event(message, micros, None, self.iteration());
                }
                result
            }
            Node::LogRelationTimer { relation, message, nested } => {
                let start = std::time::Instant::now();
                let result = self.execute(nested, ctxt);
                if let Some(log) = self.profile_log() {
                    let micros = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
                    let size = self.relation(*relation).len();
                    log.timing_event(message, micros, Some(size), self.iteration());
                }
                result
            }
            Node::DebugInfo { message, nested } => {
                Watchdog::instance().set_statement(message);
                self.execute(nested, ctxt)
            }
            Node::EstimateJoinSize {
                relation,
                relation_name,
                index_pos,
                key_columns,
                constants,
                recursive,
                columns_desc,
                constants_desc,
            } => self.estimate_join_size(
                *relation,
                relation_name,
                *index_pos,
                key_columns,
                constants,
                *recursive,
                columns_desc,
                constants_desc,
            ),
        }
    }

    // ------------------------------------------------------------------
    // search-bound materialization
    // ------------------------------------------------------------------

    /// Materialize a total pattern: constants, context copies, then
    /// sub-expressions.
    fn point_tuple(&self, bounds: &SuperInstruction, ctxt: &mut Context) -> Row {
        let mut tuple = bounds.first.clone();
        for &(column, tuple_id, element) in &bounds.tuple_first {
            tuple[column] = ctxt.element(tuple_id, element);
        }
        for (column, node) in &bounds.expr_first {
            tuple[*column] = self.execute(node, ctxt);
        }
        tuple
    }

    /// Materialize both tracks of a range pattern independently.
    fn range_tuples(&self, bounds: &SuperInstruction, ctxt: &mut Context) -> (Row, Row) {
        let mut low = bounds.first.clone();
        let mut high = bounds.second.clone();
        for &(column, tuple_id, element) in &bounds.tuple_first {
            low[column] = ctxt.element(tuple_id, element);
        }
        for &(column, tuple_id, element) in &bounds.tuple_second {
            high[column] = ctxt.element(tuple_id, element);
        }
        for (column, node) in &bounds.expr_first {
            low[*column] = self.execute(node, ctxt);
        }
        for (column, node) in &bounds.expr_second {
            high[*column] = self.execute(node, ctxt);
        }
        (low, high)
    }

    /// Materialize an equal-bounds range from the first track only: each
    /// patched column pins low and high to the same value, and each
    /// expression evaluates exactly once.
    fn mirrored_range(&self, bounds: &SuperInstruction, ctxt: &mut Context) -> (Row, Row) {
        let mut low = bounds.first.clone();
        let mut high = bounds.second.clone();
        for &(column, tuple_id, element) in &bounds.tuple_first {
            low[column] = ctxt.element(tuple_id, element);
            high[column] = low[column];
        }
        for (column, node) in &bounds.expr_first {
            low[*column] = self.execute(node, ctxt);
            high[*column] = low[*column];
        }
        (low, high)
    }

    fn note_frequency(&self, profile_text: &Option<String>) {
        if let Some(text) = profile_text {
            if self.profiling() && self.frequencies_enabled() {
                self.bump_frequency(text);
            }
        }
    }

    // ------------------------------------------------------------------
    // aggregation
    // ------------------------------------------------------------------

    fn aggregate(
        &self,
        tuple_id: usize,
        spec: &AggregateSpec,
        nested: &Node,
        rows: impl Iterator<Item = Row>,
        ctxt: &mut Context,
    ) -> Domain {
        let mut result = match &spec.aggregator {
            ResolvedAggregator::Intrinsic(op) => init_value(*op),
            ResolvedAggregator::Stateful { init, .. } => self.execute(init, ctxt),
        };
        // Reductions with a neutral element emit even over an empty
        // range; min/max only emit once a row passed the filter.
        let mut run_nested = match &spec.aggregator {
            ResolvedAggregator::Intrinsic(op) => matches!(
                op,
                AggregateOp::Count
                    | AggregateOp::Sum
                    | AggregateOp::USum
                    | AggregateOp::FSum
                    | AggregateOp::Mean
            ),
            ResolvedAggregator::Stateful { .. } => true,
        };
        let mut mean_sum = 0.0f64;
        let mut mean_count = 0.0f64;

        for row in rows {
            ctxt.set_tuple(tuple_id, row);
            if !truthy(self.execute(&spec.condition, ctxt)) {
                continue;
            }
            run_nested = true;

            if matches!(
                spec.aggregator,
                ResolvedAggregator::Intrinsic(AggregateOp::Count)
            ) {
                result = result.wrapping_add(1);
                continue;
            }

            let value = match &spec.expr {
                Some(expr) => self.execute(expr, ctxt),
                None => unreachable!("only COUNT aggregates without a target expression"),
            };

            match &spec.aggregator {
                ResolvedAggregator::Intrinsic(op) => match op {
                    AggregateOp::Min => result = result.min(value),
                    AggregateOp::UMin => {
                        result =
                            from_unsigned(as_unsigned(result).min(as_unsigned(value)))
                    }
                    AggregateOp::FMin => {
                        result = from_float(as_float(result).min(as_float(value)))
                    }
                    AggregateOp::Max => result = result.max(value),
                    AggregateOp::UMax => {
                        result =
                            from_unsigned(as_unsigned(result).max(as_unsigned(value)))
                    }
                    AggregateOp::FMax => {
                        result = from_float(as_float(result).max(as_float(value)))
                    }
                    AggregateOp::Sum => result = result.wrapping_add(value),
                    AggregateOp::USum => {
                        result = from_unsigned(
                            as_unsigned(result).wrapping_add(as_unsigned(value)),
                        )
                    }
                    AggregateOp::FSum => {
                        result = from_float(as_float(result) + as_float(value))
                    }
                    AggregateOp::Mean => {
                        mean_sum += as_float(value);
                        mean_count += 1.0;
                    }
                    AggregateOp::Count => unreachable!("count handled above"),
                },
                ResolvedAggregator::Stateful { func, .. } => {
                    result = func(self.symbols(), self.records(), &[result, value]);
                }
            }
        }

        if matches!(spec.aggregator, ResolvedAggregator::Intrinsic(AggregateOp::Mean))
            && mean_count != 0.0
        {
            result = from_float(mean_sum / mean_count);
        }

        ctxt.set_tuple(tuple_id, smallvec::smallvec![result]);
        if run_nested {
            self.execute(nested, ctxt)
        } else {
            1
        }
    }

    // ------------------------------------------------------------------
    // range emitters
    // ------------------------------------------------------------------

    fn range_emitter(
        &self,
        op: NestedIntrinsicOp,
        args: &[Node],
        tuple_id: usize,
        nested: &Node,
        ctxt: &mut Context,
    ) -> Domain {
        match op {
            NestedIntrinsicOp::Range => {
                let from = self.execute(&args[0], ctxt);
                let to = self.execute(&args[1], ctxt);
                let step = if args.len() == 3 {
                    self.execute(&args[2], ctxt)
                } else if from <= to {
                    1
                } else {
                    -1
                };
                let mut current = from;
                while (step > 0 && current < to) || (step < 0 && current > to) {
                    ctxt.set_tuple(tuple_id, smallvec::smallvec![current]);
                    self.execute(nested, ctxt);
                    current = current.wrapping_add(step);
                }
            }
            NestedIntrinsicOp::URange => {
                let from = as_unsigned(self.execute(&args[0], ctxt));
                let to = as_unsigned(self.execute(&args[1], ctxt));
                let step = if args.len() == 3 {
                    as_unsigned(self.execute(&args[2], ctxt))
                } else if from <= to {
                    1
                } else {
                    u64::MAX // two's-complement -1
                };
                let ascending = (step as i64) > 0;
                let mut current = from;
                while (ascending && current < to) || (!ascending && step != 0 && current > to) {
                    ctxt.set_tuple(tuple_id, smallvec::smallvec![from_unsigned(current)]);
                    self.execute(nested, ctxt);
                    current = current.wrapping_add(step);
                }
            }
            NestedIntrinsicOp::FRange => {
                let from = as_float(self.execute(&args[0], ctxt));
                let to = as_float(self.execute(&args[1], ctxt));
                let step = if args.len() == 3 {
                    as_float(self.execute(&args[2], ctxt))
                } else if from <= to {
                    1.0
                } else {
                    -1.0
                };
                let mut current = from;
                while (step > 0.0 && current < to) || (step < 0.0 && current > to) {
                    ctxt.set_tuple(tuple_id, smallvec::smallvec![from_float(current)]);
                    self.execute(nested, ctxt);
                    current += step;
                }
            }
        }
        1
    }

    // ------------------------------------------------------------------
    // constraints
    // ------------------------------------------------------------------

    fn constraint(&self, op: ConstraintOp, lhs: &Node, rhs: &Node, ctxt: &mut Context) -> Domain {
        use ConstraintOp::*;

        match op {
            Match | NotMatch => return self.match_constraint(op, lhs, rhs, ctxt),
            Contains | NotContains => {
                let pattern = self.symbols().decode(self.execute(lhs, ctxt));
                let text = self.symbols().decode(self.execute(rhs, ctxt));
                let found = text.contains(&pattern);
                return from_bool(if op == Contains { found } else { !found });
            }
            _ => {}
        }

        let left = self.execute(lhs, ctxt);
        let right = self.execute(rhs, ctxt);
        let holds = match op {
            Eq => left == right,
            Ne => left != right,
            FEq => as_float(left) == as_float(right),
            FNe => as_float(left) != as_float(right),
            Lt => left < right,
            Le => left <= right,
            Gt => left > right,
            Ge => left >= right,
            ULt => as_unsigned(left) < as_unsigned(right),
            ULe => as_unsigned(left) <= as_unsigned(right),
            UGt => as_unsigned(left) > as_unsigned(right),
            UGe => as_unsigned(left) >= as_unsigned(right),
            FLt => as_float(left) < as_float(right),
            FLe => as_float(left) <= as_float(right),
            FGt => as_float(left) > as_float(right),
            FGe => as_float(left) >= as_float(right),
            SLt => self.symbols().decode(left) < self.symbols().decode(right),
            SLe => self.symbols().decode(left) <= self.symbols().decode(right),
            SGt => self.symbols().decode(left) > self.symbols().decode(right),
            SGe => self.symbols().decode(left) >= self.symbols().decode(right),
            Match | NotMatch | Contains | NotContains => unreachable!("handled above"),
        };
        from_bool(holds)
    }

    fn match_constraint(
        &self,
        op: ConstraintOp,
        lhs: &Node,
        rhs: &Node,
        ctxt: &mut Context,
    ) -> Domain {
        let negated = op == ConstraintOp::NotMatch;
        let text = self.symbols().decode(self.execute(rhs, ctxt));

        let matched = if let Node::RegexConstant { regex, .. } = lhs {
            // Literal pattern, compiled (or found broken) at generation.
            match regex {
                Some(regex) => regex.is_match(&text),
                None => return from_bool(negated),
            }
        } else {
            let pattern = self.symbols().decode(self.execute(lhs, ctxt));
            match self.regexes().get_or_compile(&pattern) {
                Some(regex) => regex.is_match(&text),
                None => {
                    eprintln!(
                        "warning: wrong pattern provided for {}match(\"{pattern}\",\"{text}\").",
                        if negated { "!" } else { "" }
                    );
                    return from_bool(negated);
                }
            }
        };
        from_bool(matched != negated)
    }

    // ------------------------------------------------------------------
    // intrinsics
    // ------------------------------------------------------------------

    fn intrinsic(&self, op: IntrinsicOp, args: &[Node], ctxt: &mut Context) -> Domain {
        use IntrinsicOp::*;

        // Shorthands for evaluating a child under a type view.
        macro_rules! child {
            ($i:expr) => {
                self.execute(&args[$i], ctxt)
            };
        }
        macro_rules! uchild {
            ($i:expr) => {
                as_unsigned(self.execute(&args[$i], ctxt))
            };
        }
        macro_rules! fchild {
            ($i:expr) => {
                as_float(self.execute(&args[$i], ctxt))
            };
        }

        match op {
            // unary
            Ord | I2I | U2U | F2F | S2S => child!(0),
            StrLen => self.symbols().decode(child!(0)).len() as Domain,
            Neg => child!(0).wrapping_neg(),
            FNeg => from_float(-fchild!(0)),
            BNot => !child!(0),
            UBNot => from_unsigned(!uchild!(0)),
            LNot => from_bool(!truthy(child!(0))),
            ULNot => from_unsigned(u64::from(uchild!(0) == 0)),

            // conversions
            F2I => fchild!(0) as Domain,
            F2U => from_unsigned(fchild!(0) as u64),
            I2U => from_unsigned(child!(0) as u64),
            I2F => from_float(child!(0) as f64),
            U2I => uchild!(0) as Domain,
            U2F => from_float(uchild!(0) as f64),
            F2S => self.symbols().encode(&fchild!(0).to_string()),
            I2S => self.symbols().encode(&child!(0).to_string()),
            U2S => self.symbols().encode(&uchild!(0).to_string()),
            S2I => self.parse_symbol::<i64>(child!(0)),
            S2U => self.parse_symbol::<u64>(child!(0)),
            S2F => self.parse_symbol_float(child!(0)),

            // arithmetic
            Add => child!(0).wrapping_add(child!(1)),
            UAdd => from_unsigned(uchild!(0).wrapping_add(uchild!(1))),
            FAdd => from_float(fchild!(0) + fchild!(1)),
            Sub => child!(0).wrapping_sub(child!(1)),
            USub => from_unsigned(uchild!(0).wrapping_sub(uchild!(1))),
            FSub => from_float(fchild!(0) - fchild!(1)),
            Mul => child!(0).wrapping_mul(child!(1)),
            UMul => from_unsigned(uchild!(0).wrapping_mul(uchild!(1))),
            FMul => from_float(fchild!(0) * fchild!(1)),
            Div => child!(0).wrapping_div(child!(1)),
            UDiv => from_unsigned(uchild!(0) / uchild!(1)),
            FDiv => from_float(fchild!(0) / fchild!(1)),
            Exp => ((child!(0) as f64).powf(child!(1) as f64)) as Domain,
            UExp => from_unsigned(
                ((uchild!(0) as f64).powf(uchild!(1) as f64)) as u64,
            ),
            FExp => from_float(fchild!(0).powf(fchild!(1))),
            Mod => child!(0).wrapping_rem(child!(1)),
            UMod => from_unsigned(uchild!(0) % uchild!(1)),

            // bitwise
            BAnd => child!(0) & child!(1),
            UBAnd => from_unsigned(uchild!(0) & uchild!(1)),
            BOr => child!(0) | child!(1),
            UBOr => from_unsigned(uchild!(0) | uchild!(1)),
            BXor => child!(0) ^ child!(1),
            UBXor => from_unsigned(uchild!(0) ^ uchild!(1)),
            // Left shift of the signed view would be able to overflow, so
            // both flavors shift the unsigned view.
            BShiftL | UBShiftL => {
                from_unsigned(uchild!(0) << (uchild!(1) as u32 & domain::SHIFT_MASK))
            }
            BShiftR => child!(0) >> (child!(1) as u32 & domain::SHIFT_MASK),
            UBShiftR | BShiftRUnsigned | UBShiftRUnsigned => {
                from_unsigned(uchild!(0) >> (uchild!(1) as u32 & domain::SHIFT_MASK))
            }

            // logical
            LAnd | ULAnd => from_bool(truthy(child!(0)) && truthy(child!(1))),
            LOr | ULOr => from_bool(truthy(child!(0)) || truthy(child!(1))),
            LXor | ULXor => from_bool(truthy(child!(0)) != truthy(child!(1))),

            // n-ary folds
            Max => (1..args.len()).fold(child!(0), |acc, i| acc.max(child!(i))),
            Min => (1..args.len()).fold(child!(0), |acc, i| acc.min(child!(i))),
            UMax => from_unsigned((1..args.len()).fold(uchild!(0), |acc, i| acc.max(uchild!(i)))),
            UMin => from_unsigned((1..args.len()).fold(uchild!(0), |acc, i| acc.min(uchild!(i)))),
            FMax => from_float((1..args.len()).fold(fchild!(0), |acc, i| acc.max(fchild!(i)))),
            FMin => from_float((1..args.len()).fold(fchild!(0), |acc, i| acc.min(fchild!(i)))),
            SMax => self.fold_symbols(args, ctxt, |best, alt| alt > best),
            SMin => self.fold_symbols(args, ctxt, |best, alt| alt < best),
            Cat => {
                let mut out = String::new();
                for arg in args {
                    let value = self.execute(arg, ctxt);
                    out.push_str(&self.symbols().decode(value));
                }
                self.symbols().encode(&out)
            }

            // strings
            SubStr => {
                let text = self.symbols().decode(child!(0));
                let start = child!(1);
                let length = child!(2);
                self.symbols().encode(&substring(&text, start, length))
            }
            SSAdd => {
                let left = self.symbols().decode(child!(0));
                let right = self.symbols().decode(child!(1));
                self.symbols().encode(&(left + &right))
            }
        }
    }

    /// N-ary symbolic min/max: keep whichever symbol wins the
    /// lexicographic comparison.
    fn fold_symbols(
        &self,
        args: &[Node],
        ctxt: &mut Context,
        replace: impl Fn(&str, &str) -> bool,
    ) -> Domain {
        let mut best_id = self.execute(&args[0], ctxt);
        let mut best = self.symbols().decode(best_id);
        for arg in &args[1..] {
            let alt_id = self.execute(arg, ctxt);
            if alt_id == best_id {
                continue;
            }
            let alt = self.symbols().decode(alt_id);
            if replace(&best, &alt) {
                best = alt;
                best_id = alt_id;
            }
        }
        best_id
    }

    fn parse_symbol<T>(&self, id: Domain) -> Domain
    where
        T: std::str::FromStr + Into<ParsedWord>,
    {
        let text = self.symbols().decode(id);
        match text.trim().parse::<T>() {
            Ok(value) => value.into().0,
            Err(_) => {
                eprintln!("warning: cannot convert string \"{text}\" to a number.");
                0
            }
        }
    }

    fn parse_symbol_float(&self, id: Domain) -> Domain {
        let text = self.symbols().decode(id);
        match text.trim().parse::<f64>() {
            Ok(value) => from_float(value),
            Err(_) => {
                eprintln!("warning: cannot convert string \"{text}\" to a number.");
                0
            }
        }
    }

    // ------------------------------------------------------------------
    // user-defined functors
    // ------------------------------------------------------------------

    fn user_defined(
        &self,
        name: &str,
        functor: &ResolvedFunctor,
        args: &[Node],
        ctxt: &mut Context,
    ) -> Domain {
        match functor {
            ResolvedFunctor::Stateful { func } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.execute(arg, ctxt));
                }
                func(self.symbols(), self.records(), &values)
            }
            ResolvedFunctor::Stateless { arg_types, return_type, func } => {
                let mut values = Vec::with_capacity(args.len());
                for (arg, tag) in args.iter().zip(arg_types) {
                    let raw = self.execute(arg, ctxt);
                    values.push(match tag {
                        TypeTag::Signed => NativeValue::Signed(raw),
                        TypeTag::Unsigned => NativeValue::Unsigned(as_unsigned(raw)),
                        TypeTag::Float => NativeValue::Float(as_float(raw)),
                        TypeTag::Symbol => NativeValue::Symbol(self.symbols().decode(raw)),
                        TypeTag::Record | TypeTag::Adt => {
                            unreachable!("rejected when the functor was registered")
                        }
                    });
                }
                match (return_type, func(&values)) {
                    (TypeTag::Signed, NativeValue::Signed(value)) => value,
                    (TypeTag::Unsigned, NativeValue::Unsigned(value)) => from_unsigned(value),
                    (TypeTag::Float, NativeValue::Float(value)) => from_float(value),
                    (TypeTag::Symbol, NativeValue::Symbol(value)) => {
                        self.symbols().encode(&value)
                    }
                    (_, value) => panic!(
                        "user-defined operator `{name}` returned {value:?}, declared {return_type:?}"
                    ),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // io
    // ------------------------------------------------------------------

    fn io_statement(&self, relation: crate::node::RelId, directives: &stratal_ram::IoDirectives) -> Domain {
        let rel = self.relation(relation);
        let session = IoSession { symbols: self.symbols_arc(), records: self.records_arc() };
        let operation = directives.get("operation").map(String::as_str).unwrap_or("");
        match operation {
            "input" => {
                let outcome = self
                    .io()
                    .reader_for(directives, &session)
                    .and_then(|reader| reader.read_into(&rel));
                if let Err(err) = outcome {
                    fatal(format_args!("loading {} data: {err}", rel.name()));
                }
            }
            "output" | "printsize" => {
                let outcome = self
                    .io()
                    .writer_for(directives, &session)
                    .and_then(|writer| writer.write_all(&rel));
                if let Err(err) = outcome {
                    fatal(format_args!("writing {} data: {err}", rel.name()));
                }
            }
            other => {
                eprintln!("warning: unsupported i/o operation `{other}`");
            }
        }
        1
    }

    // ------------------------------------------------------------------
    // join-size estimation
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn estimate_join_size(
        &self,
        relation: crate::node::RelId,
        relation_name: &str,
        index_pos: usize,
        key_columns: &[usize],
        constants: &[(usize, Domain)],
        recursive: bool,
        columns_desc: &str,
        constants_desc: &str,
    ) -> Domain {
        let rel = self.relation(relation);
        let Some(index) = rel.index(index_pos) else {
            eprintln!("warning: join-size estimation skipped for `{relation_name}`");
            return 1;
        };
        let order = index.order();

        // Constants move into stored space; key columns are the order's
        // prefix by construction of the index advice.
        let stored_constants: Vec<(usize, Domain)> = constants
            .iter()
            .map(|&(column, value)| {
                let position = order
                    .position_of(column)
                    .expect("constant column within the relation's arity");
                (position, value)
            })
            .collect();
        let key_positions: Vec<usize> = (0..key_columns.len()).collect();
        let only_constants = key_columns
            .iter()
            .all(|column| constants.iter().any(|(c, _)| c == column));

        let mut total = 0.0f64;
        let mut duplicates = 0.0f64;
        let mut previous: Option<Row> = None;
        for stored in index.scan_stored() {
            if !stored_constants.iter().all(|&(position, value)| stored[position] == value) {
                continue;
            }
            if let Some(previous) = &previous {
                if key_positions.iter().all(|&position| stored[position] == previous[position]) {
                    duplicates += 1.0;
                }
            }
            previous = Some(stored);
            total += 1.0;
        }

        let join_size =
            if only_constants { total } else { total / f64::max(1.0, total - duplicates) };

        if let Some(log) = self.profile_log() {
            if recursive {
                let tag = format!(
                    "@recursive-estimate-join-size;{relation_name};{columns_desc};{constants_desc}"
                );
                log.recursive_count_event(&tag, join_size, self.iteration());
            } else {
                let tag = format!(
                    "@non-recursive-estimate-join-size;{relation_name};{columns_desc};{constants_desc}"
                );
                log.non_recursive_count_event(&tag, join_size);
            }
        }
        1
    }
}

// ----------------------------------------------------------------------
// helpers
// ----------------------------------------------------------------------

/// Marker wrapper so integer parses of either signedness funnel into the
/// domain word.
struct ParsedWord(Domain);

impl From<i64> for ParsedWord {
    fn from(value: i64) -> Self {
        ParsedWord(value)
    }
}

impl From<u64> for ParsedWord {
    fn from(value: u64) -> Self {
        ParsedWord(from_unsigned(value))
    }
}

/// `substr(text, start, length)` over characters; any out-of-range start
/// warns and yields the empty string.
fn substring(text: &str, start: Domain, length: Domain) -> String {
    let chars: Vec<char> = text.chars().collect();
    let Ok(start) = usize::try_from(start) else {
        eprintln!(
            "warning: wrong index position provided by substr(\"{text}\",{start},{length}) functor."
        );
        return String::new();
    };
    if start > chars.len() {
        eprintln!(
            "warning: wrong index position provided by substr(\"{text}\",{start},{length}) functor."
        );
        return String::new();
    }
    let take = match usize::try_from(length) {
        Ok(length) => length.min(chars.len() - start),
        // Negative lengths convert to "the rest of the string".
        Err(_) => chars.len() - start,
    };
    chars[start..start + take].iter().collect()
}

fn init_value(op: AggregateOp) -> Domain {
    match op {
        AggregateOp::Min => Domain::MAX,
        AggregateOp::UMin => from_unsigned(u64::MAX),
        AggregateOp::FMin => from_float(f64::MAX),
        AggregateOp::Max => Domain::MIN,
        AggregateOp::UMax => from_unsigned(u64::MIN),
        AggregateOp::FMax => from_float(f64::MIN),
        AggregateOp::Sum | AggregateOp::Count | AggregateOp::Mean => 0,
        AggregateOp::USum => from_unsigned(0),
        AggregateOp::FSum => from_float(0.0),
    }
}
