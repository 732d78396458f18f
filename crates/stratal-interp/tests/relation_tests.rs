//! Relation and index substrate tests.

use stratal_interp::relation::{Relation, RelationCell};
use stratal_ram::{
    ColumnOrder, IndexCluster, RelationDecl, Representation, SearchSignature,
};

fn two_index_cluster() -> IndexCluster {
    IndexCluster::covering(2, 0, [SearchSignature::from_columns([1])])
}

fn btree(name: &str, arity: usize) -> Relation {
    Relation::new(RelationDecl::btree(name, arity), IndexCluster::single(arity))
}

// ============================================================================
// Index agreement
// ============================================================================

#[test]
fn every_index_sees_every_tuple() {
    let rel = Relation::new(RelationDecl::btree("r", 2), two_index_cluster());
    assert_eq!(rel.index_count(), 2);

    for (a, b) in [(3, 1), (1, 2), (2, 2), (0, 9)] {
        assert!(rel.insert(&[a, b]));
    }
    assert!(!rel.insert(&[1, 2]), "duplicate insert adds nothing");

    let mut through_primary: Vec<Vec<i64>> =
        rel.index(0).unwrap().scan().map(|r| r.to_vec()).collect();
    let mut through_secondary: Vec<Vec<i64>> =
        rel.index(1).unwrap().scan().map(|r| r.to_vec()).collect();
    through_primary.sort();
    through_secondary.sort();
    assert_eq!(through_primary, through_secondary);
    assert_eq!(through_primary.len(), 4);
}

#[test]
fn insert_is_visible_through_secondary_before_returning() {
    let rel = Relation::new(RelationDecl::btree("r", 2), two_index_cluster());
    rel.insert(&[5, 7]);
    assert!(rel.index(1).unwrap().contains(&[5, 7]));
    assert!(rel.contains_via(1, &[5, 7]));
}

#[test]
fn purge_resets_every_index() {
    let rel = Relation::new(RelationDecl::btree("r", 2), two_index_cluster());
    rel.insert(&[1, 2]);
    rel.insert(&[3, 4]);
    rel.purge();
    assert_eq!(rel.len(), 0);
    assert!(rel.is_empty());
    assert_eq!(rel.index(0).unwrap().scan().count(), 0);
    assert_eq!(rel.index(1).unwrap().scan().count(), 0);
}

#[test]
fn concurrent_inserts_stay_consistent() {
    let rel = Relation::new(RelationDecl::btree("r", 2), two_index_cluster());
    std::thread::scope(|scope| {
        for t in 0..4i64 {
            let rel = &rel;
            scope.spawn(move || {
                for i in 0..250i64 {
                    rel.insert(&[i, t]);
                    // overlapping rows from every thread
                    rel.insert(&[i, 0]);
                }
            });
        }
    });
    assert_eq!(rel.len(), 1000);
    let mut a: Vec<Vec<i64>> = rel.index(0).unwrap().scan().map(|r| r.to_vec()).collect();
    let mut b: Vec<Vec<i64>> = rel.index(1).unwrap().scan().map(|r| r.to_vec()).collect();
    a.sort();
    b.sort();
    assert_eq!(a, b);
}

// ============================================================================
// Erase
// ============================================================================

#[test]
fn btree_delete_supports_erase() {
    let rel = Relation::new(
        RelationDecl::with_representation("r", 1, Representation::BtreeDelete),
        IndexCluster::single(1),
    );
    rel.insert(&[1]);
    rel.insert(&[2]);
    assert!(rel.erase(&[1]));
    assert!(!rel.erase(&[1]), "absent tuples erase as a no-op");
    assert_eq!(rel.len(), 1);
    assert!(rel.contains(&[2]));
}

// ============================================================================
// Equivalence
// ============================================================================

#[test]
fn equivalence_closes_over_inserted_pairs() {
    let rel = Relation::new(
        RelationDecl::with_representation("eq", 2, Representation::Equivalence),
        IndexCluster::single(2),
    );
    rel.insert(&[1, 2]);
    rel.insert(&[2, 3]);

    // {1,2,3} in one class: 9 pairs, reflexive and symmetric included.
    assert_eq!(rel.len(), 9);
    assert!(rel.contains(&[1, 1]));
    assert!(rel.contains(&[3, 1]));
    assert!(!rel.contains(&[1, 4]));

    let pairs: Vec<Vec<i64>> = rel.scan().map(|r| r.to_vec()).collect();
    assert_eq!(pairs.len(), 9);
    assert!(pairs.windows(2).all(|w| w[0] < w[1]), "closure pairs scan in order");
}

#[test]
fn equivalence_range_binds_the_first_column() {
    let rel = Relation::new(
        RelationDecl::with_representation("eq", 2, Representation::Equivalence),
        IndexCluster::single(2),
    );
    rel.insert(&[1, 2]);
    rel.insert(&[7, 8]);
    let rows: Vec<Vec<i64>> = rel
        .range(0, &[1, i64::MIN], &[1, i64::MAX])
        .map(|r| r.to_vec())
        .collect();
    assert_eq!(rows, vec![vec![1, 1], vec![1, 2]]);
}

#[test]
fn merge_extend_absorbs_the_target_classes() {
    let mk = || {
        Relation::new(
            RelationDecl::with_representation("eq", 2, Representation::Equivalence),
            IndexCluster::single(2),
        )
    };
    let source = mk();
    let target = mk();
    source.insert(&[1, 2]);
    target.insert(&[2, 3]);
    target.insert(&[10, 11]);

    source.extend_and_insert(&target);
    assert!(source.contains(&[1, 3]), "classes sharing members merge");
    assert!(source.contains(&[10, 11]));
    assert!(!source.contains(&[1, 10]));
}

// ============================================================================
// Provenance layout
// ============================================================================

#[test]
fn provenance_advice_keeps_trailers_last() {
    let decl = RelationDecl::with_representation("prov", 4, Representation::Provenance);
    assert_eq!(decl.aux_arity, 2);
    assert_eq!(decl.attribute_names[2], "@rule_number");
    assert_eq!(decl.attribute_names[3], "@level_number");

    let cluster =
        IndexCluster::covering(4, 2, [SearchSignature::from_columns([1])]);
    for order in &cluster.orders {
        assert_eq!(&order.0[2..], &[2, 3], "aux columns stay trailing in {order:?}");
    }
}

// ============================================================================
// Handle slots
// ============================================================================

#[test]
fn swap_exchanges_slot_contents() {
    let a = RelationCell::new(btree("a", 1));
    let b = RelationCell::new(btree("b", 1));
    a.get().insert(&[1]);
    b.get().insert(&[2]);

    RelationCell::swap(&a, &b);
    assert!(a.get().contains(&[2]));
    assert!(b.get().contains(&[1]));

    // Swapping twice is the identity.
    RelationCell::swap(&a, &b);
    assert!(a.get().contains(&[1]));
    assert!(b.get().contains(&[2]));
}

#[test]
fn range_through_custom_order_uses_its_prefix() {
    let cluster = IndexCluster {
        orders: vec![ColumnOrder::identity(2), ColumnOrder(vec![1, 0])],
        selections: [(SearchSignature::from_columns([1]), 1)].into_iter().collect(),
    };
    let rel = Relation::new(RelationDecl::btree("r", 2), cluster);
    rel.insert(&[1, 5]);
    rel.insert(&[2, 5]);
    rel.insert(&[3, 6]);

    let pos = rel.select_index(SearchSignature::from_columns([1])).unwrap();
    assert_eq!(pos, 1);
    let rows: Vec<Vec<i64>> = rel
        .range(pos, &[i64::MIN, 5], &[i64::MAX, 5])
        .map(|r| r.to_vec())
        .collect();
    assert_eq!(rows.len(), 2);
    assert!(rows.contains(&vec![1, 5]) && rows.contains(&vec![2, 5]));
}
