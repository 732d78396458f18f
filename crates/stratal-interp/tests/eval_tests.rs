//! End-to-end evaluator tests: whole RAM programs driven through the
//! engine, results read back out of the relations.

use std::collections::BTreeMap;
use std::sync::Arc;

use stratal_interp::{
    Engine, EngineConfig, FunctorRegistry, IoRegistry, NativeValue, ProfileEvent, ProfileLog,
    ProfileOptions, RecordTable, SymbolTable,
};
use stratal_ram::domain;
use stratal_ram::{
    AggregateOp, Aggregator, Condition, ConstraintOp, Domain, Expr, IntrinsicOp,
    NestedIntrinsicOp, Operation, Program, RangePattern, RelationDecl, Representation, Statement,
    TranslationUnit, TypeTag,
};

// ============================================================================
// Builders
// ============================================================================

fn te(tuple_id: usize, element: usize) -> Expr {
    Expr::tuple_element(tuple_id, element)
}

fn num(value: i64) -> Expr {
    Expr::Number(value)
}

fn scan(relation: &str, tuple_id: usize, nested: Operation) -> Operation {
    Operation::Scan {
        relation: relation.into(),
        tuple_id,
        profile_text: None,
        nested: Box::new(nested),
    }
}

fn insert(relation: &str, values: Vec<Expr>) -> Operation {
    Operation::Insert { relation: relation.into(), values }
}

fn filter(condition: Condition, nested: Operation) -> Operation {
    Operation::Filter { condition, profile_text: None, nested: Box::new(nested) }
}

fn engine(program: Program) -> Engine {
    engine_with(program, EngineConfig::default())
}

fn engine_with(program: Program, config: EngineConfig) -> Engine {
    Engine::new(TranslationUnit::with_default_clusters(program), config).unwrap()
}

fn preload(engine: &Engine, relation: &str, rows: &[&[i64]]) {
    let rel = engine.relation_by_name(relation).unwrap();
    for row in rows {
        rel.insert(row);
    }
}

fn rows(engine: &Engine, relation: &str) -> Vec<Vec<i64>> {
    let mut out: Vec<Vec<i64>> = engine
        .relation_by_name(relation)
        .unwrap()
        .scan()
        .map(|r| r.to_vec())
        .collect();
    out.sort();
    out
}

/// Run `Insert out(expr)` and hand back the produced word plus the engine
/// (for decoding symbols).
fn eval_expr(expr: Expr) -> (Domain, Engine) {
    let program = Program::new(
        vec![RelationDecl::btree("out", 1)],
        Statement::query(insert("out", vec![expr])),
    );
    let engine = engine(program);
    engine.execute_main().unwrap();
    let produced = rows(&engine, "out");
    assert_eq!(produced.len(), 1);
    (produced[0][0], engine)
}

fn in_memory_profile() -> (Arc<ProfileLog>, EngineConfig) {
    let log = Arc::new(ProfileLog::new());
    let config = EngineConfig {
        threads: 1,
        verbose: false,
        profile: Some(ProfileOptions {
            log: log.clone(),
            output: None,
            count_frequencies: true,
        }),
    };
    (log, config)
}

// ============================================================================
// Fixed point: transitive closure
// ============================================================================

fn transitive_closure_program() -> Program {
    let relations = vec![
        RelationDecl::btree("edge", 2),
        RelationDecl::btree("tc", 2),
        RelationDecl::btree("delta", 2),
        RelationDecl::btree("new", 2),
    ];
    let copy_edges = |target: &str| {
        Statement::query(scan("edge", 0, insert(target, vec![te(0, 0), te(0, 1)])))
    };
    let derive = Statement::query(scan(
        "delta",
        0,
        Operation::IndexScan {
            relation: "edge".into(),
            tuple_id: 1,
            pattern: RangePattern::point(2, [(0, te(0, 1))]),
            profile_text: Some("tc-step".into()),
            nested: Box::new(filter(
                Condition::negate(Condition::ExistenceCheck {
                    relation: "tc".into(),
                    pattern: vec![te(0, 0), te(1, 1)],
                }),
                insert("new", vec![te(0, 0), te(1, 1)]),
            )),
        },
    ));
    let main = Statement::seq(vec![
        copy_edges("tc"),
        copy_edges("delta"),
        Statement::Loop(Box::new(Statement::seq(vec![
            Statement::LogSize { relation: "tc".into(), message: "@loop;tc".into() },
            derive,
            Statement::Exit(Condition::empty("new")),
            Statement::query(scan("new", 0, insert("tc", vec![te(0, 0), te(0, 1)]))),
            Statement::Swap("delta".into(), "new".into()),
            Statement::Clear("new".into()),
        ]))),
    ]);
    Program::new(relations, main)
}

#[test]
fn transitive_closure_reaches_fixed_point() {
    let engine = engine(transitive_closure_program());
    preload(&engine, "edge", &[&[1, 2], &[2, 3], &[3, 4]]);
    engine.execute_main().unwrap();
    assert_eq!(
        rows(&engine, "tc"),
        vec![
            vec![1, 2],
            vec![1, 3],
            vec![1, 4],
            vec![2, 3],
            vec![2, 4],
            vec![3, 4],
        ]
    );
    assert_eq!(engine.iteration(), 0, "iteration counter resets after the loop");
}

#[test]
fn transitive_closure_observes_three_iterations() {
    let (log, config) = in_memory_profile();
    let engine = engine_with(transitive_closure_program(), config);
    preload(&engine, "edge", &[&[1, 2], &[2, 3], &[3, 4]]);
    engine.execute_main().unwrap();

    let mut iterations: Vec<usize> = log
        .events()
        .into_iter()
        .filter_map(|event| match event {
            ProfileEvent::Quantity { tag, iteration, .. } if tag == "@loop;tc" => Some(iteration),
            _ => None,
        })
        .collect();
    iterations.sort();
    assert_eq!(iterations, vec![0, 1, 2]);
}

#[test]
fn profiling_records_rule_frequencies_and_reads() {
    let (log, config) = in_memory_profile();
    let engine = engine_with(transitive_closure_program(), config);
    preload(&engine, "edge", &[&[1, 2], &[2, 3], &[3, 4]]);
    engine.execute_main().unwrap();

    let events = log.events();
    let step_hits: u64 = events
        .iter()
        .filter_map(|event| match event {
            ProfileEvent::Quantity { tag, value, .. } if tag == "tc-step" => Some(*value),
            _ => None,
        })
        .sum();
    assert!(step_hits > 0, "the recursive rule fired at least once");
    assert!(
        events.iter().any(|event| matches!(
            event,
            ProfileEvent::Quantity { tag, .. } if tag == "@relation-reads;tc"
        )),
        "existence probes count as relation reads"
    );
    assert!(events
        .iter()
        .any(|event| matches!(event, ProfileEvent::Config { key, .. } if key == "ruleCount")));
}

// ============================================================================
// Aggregation
// ============================================================================

fn aggregate_program(
    aggregator: Aggregator,
    expr: Option<Expr>,
    condition: Condition,
) -> Program {
    Program::new(
        vec![RelationDecl::btree("s", 1), RelationDecl::btree("r", 1)],
        Statement::query(Operation::Aggregate {
            relation: "s".into(),
            tuple_id: 0,
            aggregator,
            expr: expr.map(Box::new),
            condition,
            nested: Box::new(insert("r", vec![te(0, 0)])),
        }),
    )
}

#[test]
fn sum_over_filtered_rows() {
    let program = aggregate_program(
        Aggregator::Intrinsic(AggregateOp::Sum),
        Some(te(0, 0)),
        Condition::compare(ConstraintOp::Gt, te(0, 0), num(2)),
    );
    let engine = engine(program);
    preload(&engine, "s", &[&[1], &[2], &[3], &[4], &[5]]);
    engine.execute_main().unwrap();
    assert_eq!(rows(&engine, "r"), vec![vec![12]]);
}

#[test]
fn min_over_empty_relation_skips_nested() {
    let program = aggregate_program(
        Aggregator::Intrinsic(AggregateOp::Min),
        Some(te(0, 0)),
        Condition::True,
    );
    let engine = engine(program);
    engine.execute_main().unwrap();
    assert_eq!(rows(&engine, "r"), Vec::<Vec<i64>>::new());
}

#[test]
fn min_over_rows_emits_once() {
    let program = aggregate_program(
        Aggregator::Intrinsic(AggregateOp::Min),
        Some(te(0, 0)),
        Condition::True,
    );
    let engine = engine(program);
    preload(&engine, "s", &[&[9], &[3], &[7]]);
    engine.execute_main().unwrap();
    assert_eq!(rows(&engine, "r"), vec![vec![3]]);
}

#[test]
fn count_runs_nested_even_when_empty() {
    let program = aggregate_program(Aggregator::Intrinsic(AggregateOp::Count), None, Condition::True);
    let engine = engine(program);
    engine.execute_main().unwrap();
    assert_eq!(rows(&engine, "r"), vec![vec![0]]);
}

#[test]
fn mean_accumulates_as_float() {
    let program = aggregate_program(
        Aggregator::Intrinsic(AggregateOp::Mean),
        Some(Expr::intrinsic(IntrinsicOp::I2F, vec![te(0, 0)])),
        Condition::True,
    );
    let engine = engine(program);
    preload(&engine, "s", &[&[1], &[2], &[3], &[4]]);
    engine.execute_main().unwrap();
    let produced = rows(&engine, "r");
    assert_eq!(produced.len(), 1);
    assert_eq!(domain::as_float(produced[0][0]), 2.5);
}

#[test]
fn index_aggregate_folds_a_range() {
    let program = Program::new(
        vec![RelationDecl::btree("s", 1), RelationDecl::btree("r", 1)],
        Statement::query(Operation::IndexAggregate {
            relation: "s".into(),
            tuple_id: 0,
            pattern: RangePattern { lower: vec![num(2)], upper: vec![num(4)] },
            aggregator: Aggregator::Intrinsic(AggregateOp::Sum),
            expr: Some(Box::new(te(0, 0))),
            condition: Condition::True,
            nested: Box::new(insert("r", vec![te(0, 0)])),
        }),
    );
    let engine = engine(program);
    preload(&engine, "s", &[&[1], &[2], &[3], &[4], &[5]]);
    engine.execute_main().unwrap();
    assert_eq!(rows(&engine, "r"), vec![vec![9]]);
}

#[test]
fn user_defined_aggregator_folds_statefully() {
    fn take_max(_: &SymbolTable, _: &RecordTable, args: &[Domain]) -> Domain {
        args[0].max(args[1])
    }
    let mut functors = FunctorRegistry::new();
    functors.register_stateful("take_max", 2, take_max);

    let program = aggregate_program(
        Aggregator::UserDefined { name: "take_max".into(), init: num(i64::MIN) },
        Some(te(0, 0)),
        Condition::True,
    );
    let engine = Engine::with_collaborators(
        TranslationUnit::with_default_clusters(program),
        EngineConfig::default(),
        functors,
        IoRegistry::with_defaults(),
    )
    .unwrap();
    preload(&engine, "s", &[&[3], &[9], &[4]]);
    engine.execute_main().unwrap();
    assert_eq!(rows(&engine, "r"), vec![vec![9]]);
}

// ============================================================================
// Parallel scans
// ============================================================================

#[test]
fn parallel_scan_is_deterministic_across_thread_counts() {
    let program = |relations: Vec<RelationDecl>| {
        Program::new(
            relations,
            Statement::query(Operation::ParallelScan {
                relation: "a".into(),
                tuple_id: 0,
                profile_text: None,
                nested: Box::new(insert("b", vec![te(0, 0)])),
            }),
        )
    };
    let mut reference: Option<Vec<Vec<i64>>> = None;
    for threads in [1, 2, 4] {
        let relations = vec![RelationDecl::btree("a", 1), RelationDecl::btree("b", 1)];
        let engine = engine_with(
            program(relations),
            EngineConfig { threads, ..EngineConfig::default() },
        );
        let a = engine.relation_by_name("a").unwrap();
        for i in 1..=1000i64 {
            a.insert(&[i]);
        }
        engine.execute_main().unwrap();
        let b = rows(&engine, "b");
        assert_eq!(b.len(), 1000, "threads={threads}: no duplicates, no losses");
        match &reference {
            None => reference = Some(b),
            Some(expected) => assert_eq!(&b, expected, "threads={threads}"),
        }
    }
}

#[test]
fn parallel_index_scan_honors_bounds() {
    let program = Program::new(
        vec![RelationDecl::btree("a", 2), RelationDecl::btree("b", 1)],
        Statement::query(Operation::ParallelIndexScan {
            relation: "a".into(),
            tuple_id: 0,
            pattern: RangePattern::point(2, [(0, num(1))]),
            profile_text: None,
            nested: Box::new(insert("b", vec![te(0, 1)])),
        }),
    );
    let engine = engine_with(program, EngineConfig { threads: 4, ..EngineConfig::default() });
    preload(&engine, "a", &[&[1, 10], &[1, 11], &[2, 20], &[3, 30]]);
    engine.execute_main().unwrap();
    assert_eq!(rows(&engine, "b"), vec![vec![10], vec![11]]);
}

#[test]
fn parallel_scan_with_nested_existence_checks() {
    // Workers must build their own views for the nested probe.
    let program = Program::new(
        vec![
            RelationDecl::btree("a", 1),
            RelationDecl::btree("allow", 1),
            RelationDecl::btree("b", 1),
        ],
        Statement::query(Operation::ParallelScan {
            relation: "a".into(),
            tuple_id: 0,
            profile_text: None,
            nested: Box::new(filter(
                Condition::ExistenceCheck { relation: "allow".into(), pattern: vec![te(0, 0)] },
                insert("b", vec![te(0, 0)]),
            )),
        }),
    );
    let engine = engine_with(program, EngineConfig { threads: 4, ..EngineConfig::default() });
    let a = engine.relation_by_name("a").unwrap();
    for i in 0..500i64 {
        a.insert(&[i]);
    }
    preload(&engine, "allow", &[&[3], &[77], &[400]]);
    engine.execute_main().unwrap();
    assert_eq!(rows(&engine, "b"), vec![vec![3], vec![77], vec![400]]);
}

// ============================================================================
// Provenance
// ============================================================================

fn provenance_program(level_bound: i64) -> Program {
    let relations = vec![
        RelationDecl::with_representation("prov", 4, Representation::Provenance),
        RelationDecl::btree("out", 1),
    ];
    let main = Statement::query(filter(
        Condition::ProvenanceExistenceCheck {
            relation: "prov".into(),
            pattern: vec![num(1), num(2), Expr::Undefined, num(level_bound)],
        },
        insert("out", vec![num(1)]),
    ));
    Program::new(relations, main)
}

#[test]
fn provenance_existence_respects_the_level_bound() {
    for (bound, expected) in [(5, vec![vec![1]]), (2, Vec::<Vec<i64>>::new())] {
        let engine = engine(provenance_program(bound));
        preload(&engine, "prov", &[&[1, 2, 0, 3]]);
        engine.execute_main().unwrap();
        assert_eq!(rows(&engine, "out"), expected, "level bound {bound}");
    }
}

// ============================================================================
// Swap
// ============================================================================

#[test]
fn swap_is_visible_through_prior_handles() {
    let program = Program::new(
        vec![RelationDecl::btree("r1", 1), RelationDecl::btree("r2", 1)],
        Statement::Swap("r1".into(), "r2".into()),
    );
    let engine = engine(program);
    preload(&engine, "r1", &[&[1]]);
    preload(&engine, "r2", &[&[2]]);

    let handle = engine.relation_handle("r1").unwrap();
    engine.execute_main().unwrap();
    assert!(handle.get().contains(&[2]), "pre-swap handle observes swapped contents");
    assert_eq!(rows(&engine, "r1"), vec![vec![2]]);
    assert_eq!(rows(&engine, "r2"), vec![vec![1]]);
}

#[test]
fn double_swap_is_the_identity() {
    let swap = Statement::Swap("r1".into(), "r2".into());
    let program = Program::new(
        vec![RelationDecl::btree("r1", 1), RelationDecl::btree("r2", 1)],
        Statement::seq(vec![swap.clone(), swap]),
    );
    let engine = engine(program);
    preload(&engine, "r1", &[&[1]]);
    preload(&engine, "r2", &[&[2]]);
    engine.execute_main().unwrap();
    assert_eq!(rows(&engine, "r1"), vec![vec![1]]);
    assert_eq!(rows(&engine, "r2"), vec![vec![2]]);
}

// ============================================================================
// Tuple operations
// ============================================================================

#[test]
fn break_terminates_the_enclosing_scan() {
    let program = Program::new(
        vec![RelationDecl::btree("s", 1), RelationDecl::btree("out", 1)],
        Statement::query(scan(
            "s",
            0,
            Operation::Break {
                condition: Condition::compare(ConstraintOp::Eq, te(0, 0), num(3)),
                nested: Box::new(insert("out", vec![te(0, 0)])),
            },
        )),
    );
    let engine = engine(program);
    preload(&engine, "s", &[&[1], &[2], &[3], &[4], &[5]]);
    engine.execute_main().unwrap();
    assert_eq!(rows(&engine, "out"), vec![vec![1], vec![2]]);
}

#[test]
fn if_exists_binds_at_most_one_tuple() {
    let program = Program::new(
        vec![RelationDecl::btree("s", 1), RelationDecl::btree("out", 1)],
        Statement::query(Operation::IfExists {
            relation: "s".into(),
            tuple_id: 0,
            condition: Condition::compare(ConstraintOp::Gt, te(0, 0), num(2)),
            profile_text: None,
            nested: Box::new(insert("out", vec![te(0, 0)])),
        }),
    );
    let engine = engine(program);
    preload(&engine, "s", &[&[1], &[3], &[4]]);
    engine.execute_main().unwrap();
    assert_eq!(rows(&engine, "out"), vec![vec![3]]);
}

#[test]
fn guarded_insert_short_circuits_on_a_false_guard() {
    let program = Program::new(
        vec![RelationDecl::btree("out", 1)],
        Statement::seq(vec![
            Statement::query(Operation::GuardedInsert {
                relation: "out".into(),
                values: vec![num(1)],
                condition: Condition::False,
            }),
            Statement::query(Operation::GuardedInsert {
                relation: "out".into(),
                values: vec![num(2)],
                condition: Condition::True,
            }),
        ]),
    );
    let engine = engine(program);
    engine.execute_main().unwrap();
    assert_eq!(rows(&engine, "out"), vec![vec![2]]);
}

#[test]
fn erase_removes_from_btree_delete_relations() {
    let program = Program::new(
        vec![RelationDecl::with_representation("s", 1, Representation::BtreeDelete)],
        Statement::query(Operation::Erase { relation: "s".into(), values: vec![num(1)] }),
    );
    let engine = engine(program);
    preload(&engine, "s", &[&[1], &[2]]);
    engine.execute_main().unwrap();
    assert_eq!(rows(&engine, "s"), vec![vec![2]]);
}

#[test]
fn unpack_of_nil_succeeds_without_binding() {
    let program = Program::new(
        vec![RelationDecl::btree("out", 1)],
        Statement::query(Operation::UnpackRecord {
            expr: num(0),
            arity: 2,
            tuple_id: 0,
            nested: Box::new(insert("out", vec![te(0, 0)])),
        }),
    );
    let engine = engine(program);
    engine.execute_main().unwrap();
    assert_eq!(rows(&engine, "out"), Vec::<Vec<i64>>::new());
}

#[test]
fn pack_then_unpack_binds_the_tuple() {
    let program = Program::new(
        vec![RelationDecl::btree("out", 2)],
        Statement::query(Operation::UnpackRecord {
            expr: Expr::PackRecord(vec![num(10), num(20)]),
            arity: 2,
            tuple_id: 0,
            nested: Box::new(insert("out", vec![te(0, 0), te(0, 1)])),
        }),
    );
    let engine = engine(program);
    engine.execute_main().unwrap();
    assert_eq!(rows(&engine, "out"), vec![vec![10, 20]]);
}

#[test]
fn range_emitter_yields_the_half_open_interval() {
    let program = Program::new(
        vec![RelationDecl::btree("out", 1)],
        Statement::query(Operation::NestedIntrinsic {
            op: NestedIntrinsicOp::Range,
            args: vec![num(0), num(5)],
            tuple_id: 0,
            nested: Box::new(insert("out", vec![te(0, 0)])),
        }),
    );
    let engine = engine(program);
    engine.execute_main().unwrap();
    assert_eq!(rows(&engine, "out"), vec![vec![0], vec![1], vec![2], vec![3], vec![4]]);
}

#[test]
fn range_emitter_steps_and_descends() {
    let program = Program::new(
        vec![RelationDecl::btree("out", 1)],
        Statement::seq(vec![
            Statement::query(Operation::NestedIntrinsic {
                op: NestedIntrinsicOp::Range,
                args: vec![num(0), num(10), num(4)],
                tuple_id: 0,
                nested: Box::new(insert("out", vec![te(0, 0)])),
            }),
            Statement::query(Operation::NestedIntrinsic {
                op: NestedIntrinsicOp::Range,
                args: vec![num(-1), num(-4)],
                tuple_id: 0,
                nested: Box::new(insert("out", vec![te(0, 0)])),
            }),
        ]),
    );
    let engine = engine(program);
    engine.execute_main().unwrap();
    assert_eq!(
        rows(&engine, "out"),
        vec![vec![-3], vec![-2], vec![-1], vec![0], vec![4], vec![8]]
    );
}

// ============================================================================
// Expressions and constraints
// ============================================================================

#[test]
fn auto_increment_is_monotonic() {
    let program = Program::new(
        vec![RelationDecl::btree("out", 1)],
        Statement::seq(vec![
            Statement::query(insert("out", vec![Expr::AutoIncrement])),
            Statement::query(insert("out", vec![Expr::AutoIncrement])),
        ]),
    );
    let engine = engine(program);
    engine.execute_main().unwrap();
    assert_eq!(rows(&engine, "out"), vec![vec![0], vec![1]]);
}

#[test]
fn assigned_variables_are_readable() {
    let program = Program::new(
        vec![RelationDecl::btree("out", 1)],
        Statement::seq(vec![
            Statement::Assign { variable: "x".into(), value: num(41) },
            Statement::query(insert(
                "out",
                vec![Expr::intrinsic(IntrinsicOp::Add, vec![Expr::Variable("x".into()), num(1)])],
            )),
        ]),
    );
    let engine = engine(program);
    engine.execute_main().unwrap();
    assert_eq!(rows(&engine, "out"), vec![vec![42]]);
}

#[test]
fn left_shift_masks_the_count() {
    let (value, _) = eval_expr(Expr::intrinsic(IntrinsicOp::BShiftL, vec![num(1), num(66)]));
    assert_eq!(value, 4);
}

#[test]
fn arithmetic_wraps_instead_of_trapping() {
    let (value, _) = eval_expr(Expr::intrinsic(IntrinsicOp::Add, vec![num(i64::MAX), num(1)]));
    assert_eq!(value, i64::MIN);
}

#[test]
fn substr_out_of_range_yields_the_empty_string() {
    let (value, engine) = eval_expr(Expr::intrinsic(
        IntrinsicOp::SubStr,
        vec![Expr::string("hello"), num(-1), num(2)],
    ));
    assert_eq!(engine.symbols().decode(value), "");
}

#[test]
fn substr_in_range_slices() {
    let (value, engine) = eval_expr(Expr::intrinsic(
        IntrinsicOp::SubStr,
        vec![Expr::string("hello"), num(1), num(3)],
    ));
    assert_eq!(engine.symbols().decode(value), "ell");
}

#[test]
fn cat_concatenates_n_ary() {
    let (value, engine) = eval_expr(Expr::intrinsic(
        IntrinsicOp::Cat,
        vec![Expr::string("a"), Expr::string("b"), Expr::string("c")],
    ));
    assert_eq!(engine.symbols().decode(value), "abc");
}

#[test]
fn numeric_string_conversions_roundtrip() {
    let (value, _) = eval_expr(Expr::intrinsic(
        IntrinsicOp::S2I,
        vec![Expr::intrinsic(IntrinsicOp::I2S, vec![num(-42)])],
    ));
    assert_eq!(value, -42);

    let (value, _) = eval_expr(Expr::intrinsic(
        IntrinsicOp::S2F,
        vec![Expr::intrinsic(IntrinsicOp::F2S, vec![Expr::Number(domain::from_float(1.5))])],
    ));
    assert_eq!(domain::as_float(value), 1.5);
}

#[test]
fn float_conversions_follow_the_word_views() {
    let (value, _) = eval_expr(Expr::intrinsic(
        IntrinsicOp::I2F,
        vec![num(3)],
    ));
    assert_eq!(domain::as_float(value), 3.0);
    let (value, _) = eval_expr(Expr::intrinsic(
        IntrinsicOp::F2I,
        vec![Expr::Number(domain::from_float(-2.9))],
    ));
    assert_eq!(value, -2, "float to signed truncates toward zero");
}

#[test]
fn symbolic_min_max_compare_lexicographically() {
    let (value, engine) = eval_expr(Expr::intrinsic(
        IntrinsicOp::SMax,
        vec![Expr::string("pear"), Expr::string("apple"), Expr::string("plum")],
    ));
    assert_eq!(engine.symbols().decode(value), "plum");
    let (value, engine) = eval_expr(Expr::intrinsic(
        IntrinsicOp::SMin,
        vec![Expr::string("pear"), Expr::string("apple"), Expr::string("plum")],
    ));
    assert_eq!(engine.symbols().decode(value), "apple");
}

fn constraint_program(condition: Condition) -> Program {
    Program::new(
        vec![RelationDecl::btree("out", 1)],
        Statement::query(filter(condition, insert("out", vec![num(1)]))),
    )
}

fn holds(condition: Condition) -> bool {
    let engine = engine(constraint_program(condition));
    engine.execute_main().unwrap();
    !rows(&engine, "out").is_empty()
}

#[test]
fn match_applies_the_whole_pattern() {
    assert!(holds(Condition::compare(
        ConstraintOp::Match,
        Expr::string("h.*o"),
        Expr::string("hello"),
    )));
    assert!(!holds(Condition::compare(
        ConstraintOp::Match,
        Expr::string("ell"),
        Expr::string("hello"),
    )));
    assert!(holds(Condition::compare(
        ConstraintOp::NotMatch,
        Expr::string("ell"),
        Expr::string("hello"),
    )));
}

#[test]
fn broken_patterns_warn_and_take_defaults() {
    assert!(!holds(Condition::compare(
        ConstraintOp::Match,
        Expr::string("(unclosed"),
        Expr::string("hello"),
    )));
    assert!(holds(Condition::compare(
        ConstraintOp::NotMatch,
        Expr::string("(unclosed"),
        Expr::string("hello"),
    )));
}

#[test]
fn dynamic_patterns_resolve_through_the_cache() {
    let program = Program::new(
        vec![RelationDecl::btree("out", 1)],
        Statement::seq(vec![
            Statement::Assign { variable: "pat".into(), value: Expr::string("a+b") },
            Statement::query(filter(
                Condition::compare(
                    ConstraintOp::Match,
                    Expr::Variable("pat".into()),
                    Expr::string("aaab"),
                ),
                insert("out", vec![num(1)]),
            )),
        ]),
    );
    let engine = engine(program);
    engine.execute_main().unwrap();
    assert_eq!(rows(&engine, "out"), vec![vec![1]]);
}

#[test]
fn contains_is_substring_search() {
    assert!(holds(Condition::compare(
        ConstraintOp::Contains,
        Expr::string("ell"),
        Expr::string("hello"),
    )));
    assert!(holds(Condition::compare(
        ConstraintOp::NotContains,
        Expr::string("xyz"),
        Expr::string("hello"),
    )));
}

#[test]
fn unsigned_comparison_uses_the_unsigned_view() {
    // -1 reinterprets as the largest unsigned word.
    assert!(holds(Condition::compare(ConstraintOp::UGt, num(-1), num(1))));
    assert!(!holds(Condition::compare(ConstraintOp::Gt, num(-1), num(1))));
}

// ============================================================================
// Relation-valued expressions
// ============================================================================

#[test]
fn emptiness_and_size_expressions() {
    let program = Program::new(
        vec![RelationDecl::btree("a", 1), RelationDecl::btree("out", 1)],
        Statement::query(filter(
            Condition::negate(Condition::empty("a")),
            insert("out", vec![Expr::RelationSize("a".into())]),
        )),
    );
    let engine = engine(program);
    preload(&engine, "a", &[&[10], &[20], &[30]]);
    engine.execute_main().unwrap();
    assert_eq!(rows(&engine, "out"), vec![vec![3]]);
}

// ============================================================================
// User-defined functors
// ============================================================================

#[test]
fn stateless_functors_marshal_symbols() {
    fn shout(values: &[NativeValue]) -> NativeValue {
        let NativeValue::Symbol(text) = &values[0] else {
            unreachable!("declared to take a symbol");
        };
        NativeValue::Symbol(format!("{text}!"))
    }
    let mut functors = FunctorRegistry::new();
    functors
        .register_stateless("shout", vec![TypeTag::Symbol], TypeTag::Symbol, shout)
        .unwrap();

    let program = Program::new(
        vec![RelationDecl::btree("out", 1)],
        Statement::query(insert(
            "out",
            vec![Expr::UserDefined { name: "shout".into(), args: vec![Expr::string("hi")] }],
        )),
    );
    let engine = Engine::with_collaborators(
        TranslationUnit::with_default_clusters(program),
        EngineConfig::default(),
        functors,
        IoRegistry::with_defaults(),
    )
    .unwrap();
    engine.execute_main().unwrap();
    let produced = rows(&engine, "out");
    assert_eq!(engine.symbols().decode(produced[0][0]), "hi!");
}

#[test]
fn stateful_functors_see_the_tables() {
    fn pack_pair(_: &SymbolTable, records: &RecordTable, args: &[Domain]) -> Domain {
        records.pack(&[args[0], args[1]])
    }
    let mut functors = FunctorRegistry::new();
    functors.register_stateful("pack_pair", 2, pack_pair);

    let program = Program::new(
        vec![RelationDecl::btree("out", 2)],
        Statement::query(Operation::UnpackRecord {
            expr: Expr::UserDefined { name: "pack_pair".into(), args: vec![num(4), num(5)] },
            arity: 2,
            tuple_id: 0,
            nested: Box::new(insert("out", vec![te(0, 0), te(0, 1)])),
        }),
    );
    let engine = Engine::with_collaborators(
        TranslationUnit::with_default_clusters(program),
        EngineConfig::default(),
        functors,
        IoRegistry::with_defaults(),
    )
    .unwrap();
    engine.execute_main().unwrap();
    assert_eq!(rows(&engine, "out"), vec![vec![4, 5]]);
}

#[test]
fn unresolved_functors_fail_at_generation() {
    let program = Program::new(
        vec![RelationDecl::btree("out", 1)],
        Statement::query(insert(
            "out",
            vec![Expr::UserDefined { name: "missing".into(), args: vec![] }],
        )),
    );
    let result = Engine::new(TranslationUnit::with_default_clusters(program), EngineConfig::default());
    assert!(result.is_err());
}

// ============================================================================
// Subroutines
// ============================================================================

#[test]
fn subroutines_return_values_in_order() {
    let body = Statement::query(Operation::SubroutineReturn {
        values: vec![
            Some(Expr::intrinsic(IntrinsicOp::Add, vec![Expr::SubroutineArgument(0), num(1)])),
            None,
        ],
    });
    let program = Program::new(vec![RelationDecl::btree("out", 1)], Statement::seq(vec![]))
        .with_subroutine("answer", body);
    let engine = engine(program);
    let mut returns = Vec::new();
    engine.execute_subroutine("answer", &[41], &mut returns).unwrap();
    assert_eq!(returns, vec![42, 0]);
}

#[test]
fn call_runs_a_named_subroutine() {
    let program = Program::new(
        vec![RelationDecl::btree("r", 1)],
        Statement::seq(vec![Statement::Call("seed".into())]),
    )
    .with_subroutine("seed", Statement::query(insert("r", vec![num(7)])));
    let engine = engine(program);
    engine.execute_main().unwrap();
    assert_eq!(rows(&engine, "r"), vec![vec![7]]);
}

// ============================================================================
// Equivalence statements
// ============================================================================

#[test]
fn merge_extend_through_the_program() {
    let program = Program::new(
        vec![
            RelationDecl::with_representation("eqa", 2, Representation::Equivalence),
            RelationDecl::with_representation("eqb", 2, Representation::Equivalence),
        ],
        Statement::MergeExtend { source: "eqa".into(), target: "eqb".into() },
    );
    let engine = engine(program);
    preload(&engine, "eqa", &[&[1, 2]]);
    preload(&engine, "eqb", &[&[2, 3]]);
    engine.execute_main().unwrap();
    let eqa = engine.relation_by_name("eqa").unwrap();
    assert!(eqa.contains(&[1, 3]));
}

// ============================================================================
// Join-size estimation
// ============================================================================

#[test]
fn estimate_join_size_records_an_event() {
    let (log, config) = in_memory_profile();
    let program = Program::new(
        vec![RelationDecl::btree("r", 2)],
        Statement::EstimateJoinSize {
            relation: "r".into(),
            columns: vec![0],
            constants: BTreeMap::new(),
            recursive: false,
        },
    );
    let engine = engine_with(program, config);
    preload(&engine, "r", &[&[1, 1], &[1, 2], &[2, 1]]);
    engine.execute_main().unwrap();

    let estimate = log.events().into_iter().find_map(|event| match event {
        ProfileEvent::NonRecursiveCount { tag, value } => Some((tag, value)),
        _ => None,
    });
    let (tag, value) = estimate.expect("estimation event recorded");
    assert!(tag.starts_with("@non-recursive-estimate-join-size;r;"));
    // 3 tuples, 1 duplicate key under column 0: 3 / (3 - 1).
    assert_eq!(value, 1.5);
}
