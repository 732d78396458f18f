//! Property tests for the interning tables and the index substrate.

use std::collections::BTreeSet;

use proptest::prelude::*;
use stratal_interp::relation::Relation;
use stratal_interp::{RecordTable, SymbolTable};
use stratal_ram::{ColumnOrder, IndexCluster, RelationDecl, SearchSignature};

fn small_rows() -> impl Strategy<Value = Vec<(i64, i64)>> {
    proptest::collection::vec((-50i64..50, -50i64..50), 0..200)
}

proptest! {
    #[test]
    fn symbol_roundtrip(words in proptest::collection::vec(".{0,12}", 0..50)) {
        let table = SymbolTable::new();
        for word in &words {
            let id = table.encode(word);
            prop_assert_eq!(table.decode(id), word.clone());
            prop_assert_eq!(table.encode(word), id);
        }
    }

    #[test]
    fn record_roundtrip(tuples in proptest::collection::vec(
        proptest::collection::vec(any::<i64>(), 0..5),
        0..50,
    )) {
        let table = RecordTable::new();
        for tuple in &tuples {
            let id = table.pack(tuple);
            prop_assert_ne!(id, 0);
            let unpacked = table.unpack(id, tuple.len());
            prop_assert_eq!(unpacked.as_slice(), tuple.as_slice());
        }
    }

    /// Every pair of indexes of a relation scans the same tuple set.
    #[test]
    fn index_orders_agree(rows in small_rows()) {
        let cluster = IndexCluster {
            orders: vec![ColumnOrder::identity(2), ColumnOrder(vec![1, 0])],
            selections: [(SearchSignature::from_columns([1]), 1)].into_iter().collect(),
        };
        let rel = Relation::new(RelationDecl::btree("r", 2), cluster);
        for &(a, b) in &rows {
            rel.insert(&[a, b]);
        }
        let primary: BTreeSet<Vec<i64>> =
            rel.index(0).unwrap().scan().map(|r| r.to_vec()).collect();
        let secondary: BTreeSet<Vec<i64>> =
            rel.index(1).unwrap().scan().map(|r| r.to_vec()).collect();
        prop_assert_eq!(&primary, &secondary);

        let expected: BTreeSet<Vec<i64>> =
            rows.iter().map(|&(a, b)| vec![a, b]).collect();
        prop_assert_eq!(primary, expected);
    }

    /// Partitioned scans cover the relation exactly, whatever the split.
    #[test]
    fn partitions_cover_exactly(rows in small_rows(), parts in 1usize..40) {
        let rel = Relation::new(RelationDecl::btree("r", 2), IndexCluster::single(2));
        for &(a, b) in &rows {
            rel.insert(&[a, b]);
        }
        let whole: Vec<Vec<i64>> = rel.scan().map(|r| r.to_vec()).collect();
        let mut chunked: Vec<Vec<i64>> = Vec::new();
        for part in rel.partition_scan(parts) {
            chunked.extend(part.map(|r| r.to_vec()));
        }
        prop_assert_eq!(chunked, whole);
    }

    /// A range scan equals the filtered full scan.
    #[test]
    fn range_matches_filtered_scan(rows in small_rows(), probe in -50i64..50) {
        let rel = Relation::new(RelationDecl::btree("r", 2), IndexCluster::single(2));
        for &(a, b) in &rows {
            rel.insert(&[a, b]);
        }
        let ranged: Vec<Vec<i64>> = rel
            .range(0, &[probe, i64::MIN], &[probe, i64::MAX])
            .map(|r| r.to_vec())
            .collect();
        let filtered: Vec<Vec<i64>> = rel
            .scan()
            .filter(|r| r[0] == probe)
            .map(|r| r.to_vec())
            .collect();
        prop_assert_eq!(ranged, filtered);
    }
}
