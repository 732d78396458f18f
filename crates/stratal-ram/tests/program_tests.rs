//! Program construction and index-advice derivation tests.

use stratal_ram::{
    ColumnOrder, Condition, Expr, Operation, Program, RangePattern, RelationDecl,
    SearchSignature, Statement, TranslationUnit,
};

fn scan_insert() -> Operation {
    Operation::Scan {
        relation: "edge".into(),
        tuple_id: 0,
        profile_text: None,
        nested: Box::new(Operation::IndexScan {
            relation: "edge".into(),
            tuple_id: 1,
            pattern: RangePattern::point(2, [(1, Expr::tuple_element(0, 1))]),
            profile_text: None,
            nested: Box::new(Operation::Insert {
                relation: "out".into(),
                values: vec![Expr::tuple_element(0, 0), Expr::tuple_element(1, 0)],
            }),
        }),
    }
}

#[test]
fn default_clusters_cover_program_searches() {
    let program = Program::new(
        vec![RelationDecl::btree("edge", 2), RelationDecl::btree("out", 2)],
        Statement::query(scan_insert()),
    );
    let unit = TranslationUnit::with_default_clusters(program);

    let edge = unit.cluster("edge").unwrap();
    let sig = SearchSignature::from_columns([1]);
    let pos = edge.select(sig).expect("the column-1 probe is covered");
    assert_eq!(edge.orders[pos], ColumnOrder(vec![1, 0]));

    // The insert-only relation keeps just the identity order.
    let out = unit.cluster("out").unwrap();
    assert_eq!(out.orders.len(), 1);
}

#[test]
fn existence_checks_contribute_signatures() {
    let condition = Condition::ExistenceCheck {
        relation: "r".into(),
        pattern: vec![Expr::Undefined, Expr::Number(1), Expr::Undefined],
    };
    let program = Program::new(
        vec![RelationDecl::btree("r", 3), RelationDecl::btree("out", 1)],
        Statement::query(Operation::Filter {
            condition,
            profile_text: None,
            nested: Box::new(Operation::Insert {
                relation: "out".into(),
                values: vec![Expr::Number(1)],
            }),
        }),
    );
    let unit = TranslationUnit::with_default_clusters(program);
    let cluster = unit.cluster("r").unwrap();
    let pos = cluster.select(SearchSignature::from_columns([1])).unwrap();
    assert_eq!(cluster.orders[pos].0[0], 1);
}

#[test]
fn query_count_spans_subroutines() {
    let query = || {
        Statement::query(Operation::Insert { relation: "out".into(), values: vec![Expr::Number(1)] })
    };
    let program = Program::new(
        vec![RelationDecl::btree("out", 1)],
        Statement::seq(vec![query(), Statement::Loop(Box::new(query()))]),
    )
    .with_subroutine("extra", query());
    assert_eq!(program.query_count(), 3);
}

#[test]
fn programs_roundtrip_through_serde() {
    let program = Program::new(
        vec![RelationDecl::btree("edge", 2), RelationDecl::btree("out", 2)],
        Statement::query(scan_insert()),
    );
    let unit = TranslationUnit::with_default_clusters(program);
    let json = serde_json::to_string(&unit).unwrap();
    let back: TranslationUnit = serde_json::from_str(&json).unwrap();
    assert_eq!(back.program.relations.len(), 2);
    assert_eq!(back.program.main, unit.program.main);
    assert_eq!(back.cluster("edge").unwrap().orders, unit.cluster("edge").unwrap().orders);
}
