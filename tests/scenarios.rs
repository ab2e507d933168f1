use std::collections::HashSet;

use assert_matches::assert_matches;

use kira_pathmap::align::{SampleAlignment, align};
use kira_pathmap::annotate::{CollisionPolicy, reannotate};
use kira_pathmap::conversion::{ConversionRecord, ConversionTable, MatchFlag, normalize};
use kira_pathmap::coverage::{MinCoverage, filter_by_coverage};
use kira_pathmap::domain::{ChebiId, CompoundName, MoleculeId, PathwayId, SampleId};
use kira_pathmap::error::KiraError;
use kira_pathmap::matrix::{AbundanceMatrix, ColumnKey};
use kira_pathmap::pathways::{PathwayDatabase, read_gmt};

fn sids(values: &[&str]) -> Vec<SampleId> {
    values.iter().map(|v| v.parse().unwrap()).collect()
}

fn names(values: &[&str]) -> Vec<CompoundName> {
    values.iter().map(|v| v.parse().unwrap()).collect()
}

fn chebi(values: &[u64]) -> Vec<ChebiId> {
    values.iter().map(|v| ChebiId::new(*v).unwrap()).collect()
}

fn molecules(values: &[&str]) -> Vec<MoleculeId> {
    values.iter().map(|v| v.parse().unwrap()).collect()
}

fn pid(value: &str) -> PathwayId {
    value.parse().unwrap()
}

fn record(query: &str, resolved: Option<&str>, flag: &str) -> ConversionRecord {
    ConversionRecord::new(
        query.parse().unwrap(),
        resolved.map(str::to_string),
        MatchFlag::parse(flag),
    )
}

fn matrix<K: ColumnKey>(samples: &[&str], columns: Vec<K>) -> AbundanceMatrix<K> {
    let values = (0..samples.len())
        .map(|row| {
            (0..columns.len())
                .map(|col| Some((row * 10 + col) as f64))
                .collect()
        })
        .collect();
    AbundanceMatrix::new(sids(samples), columns, values).unwrap()
}

fn scenario_database() -> PathwayDatabase {
    read_gmt("P1\tFirst\t17234\t422\t999\nP2\tSecond\t17234\n".as_bytes()).unwrap()
}

#[test]
fn reannotation_keeps_only_resolved_columns() {
    let input = matrix(&["S1", "S2"], names(&["glucose", "lactate", "unknownXYZ"]));
    let table = ConversionTable::new(vec![
        record("glucose", Some("17234"), "1"),
        record("lactate", Some("422"), "1"),
        record("unknownXYZ", None, "0"),
    ]);

    let result = reannotate(&input, &normalize(&table), CollisionPolicy::KeepFirst).unwrap();
    assert_eq!(result.matrix.columns(), chebi(&[17234, 422]).as_slice());
    assert_eq!(result.dropped, vec!["unknownXYZ".to_string()]);
    assert_eq!(result.matrix.samples(), input.samples());
    assert_eq!(
        result.matrix.get(&"S2".parse().unwrap(), &ChebiId::new(422).unwrap()),
        Some(11.0)
    );
}

#[test]
fn reannotated_columns_are_confirmed_targets() {
    let input = matrix(&["S1"], names(&["a", "b", "c", "d"]));
    let table = ConversionTable::new(vec![
        record("a", Some("100"), "1"),
        record("b", Some("200"), "2"),
        record("c", Some("not-an-id"), "1"),
        record("d", Some("100"), "1"),
    ]);
    let normalized = normalize(&table);
    let targets: HashSet<ChebiId> = normalized.records().iter().map(|r| r.chebi).collect();

    let result = reannotate(&input, &normalized, CollisionPolicy::Sum).unwrap();
    let columns: HashSet<ChebiId> = result.matrix.columns().iter().copied().collect();
    assert_eq!(columns.len(), result.matrix.n_columns());
    assert!(columns.is_subset(&targets));
    assert_eq!(result.collisions.len(), 1);
    assert_eq!(result.collisions[0].sources, vec!["a".to_string(), "d".to_string()]);
}

#[test]
fn reannotation_is_idempotent() {
    let input = matrix(&["S1", "S2"], names(&["glucose", "lactate", "dextrose"]));
    let table = ConversionTable::new(vec![
        record("glucose", Some("17234"), "1"),
        record("lactate", Some("CHEBI:422"), "1"),
        record("dextrose", Some("17234.0"), "1"),
    ]);
    let normalized = normalize(&table);

    let once = reannotate(&input, &normalized, CollisionPolicy::Mean).unwrap();
    let twice = reannotate(&once.matrix, &normalized, CollisionPolicy::Mean).unwrap();
    assert_eq!(once.matrix, twice.matrix);
    assert!(twice.collisions.is_empty());
    assert!(twice.dropped.is_empty());
}

#[test]
fn normalised_records_are_confirmed_integers() {
    let table = ConversionTable::new(vec![
        record("a", Some("17234"), "1"),
        record("b", Some("CHEBI:abc"), "1"),
        record("c", None, "1"),
        record("d", Some("422"), "0"),
        record("e", Some("-5"), "1"),
    ]);
    let normalized = normalize(&table);
    assert_eq!(normalized.len(), 1);
    assert_eq!(normalized.records()[0].chebi.get(), 17234);
    assert_eq!(normalized.malformed(), 2);
    assert_eq!(normalized.unconfirmed(), 1);
}

#[test]
fn coverage_filter_keeps_pathways_at_threshold() {
    let db = scenario_database();
    let columns = molecules(&["17234", "422"]);

    let filtered = filter_by_coverage(&db, &columns, MinCoverage::new(2).unwrap());
    assert_eq!(filtered.ids().cloned().collect::<Vec<_>>(), vec![pid("P1")]);
}

#[test]
fn coverage_filter_is_monotone_in_k() {
    let db = scenario_database();
    let columns = molecules(&["17234", "422"]);

    let loose = filter_by_coverage(&db, &columns, MinCoverage::new(1).unwrap());
    let strict = filter_by_coverage(&db, &columns, MinCoverage::new(2).unwrap());
    assert!(strict.ids().all(|id| loose.contains(id)));
    assert!(strict.len() <= loose.len());
}

#[test]
fn coverage_one_keeps_every_touched_pathway() {
    let db = read_gmt("P1\tFirst\t17234\nP2\tSecond\t422\nP3\tThird\t999\n".as_bytes()).unwrap();
    let columns = molecules(&["17234", "422"]);

    let filtered = filter_by_coverage(&db, &columns, MinCoverage::new(1).unwrap());
    assert_eq!(filtered.len(), 2);
    assert!(!filtered.contains(&pid("P3")));
}

#[test]
fn coverage_above_largest_pathway_is_empty() {
    let db = scenario_database();
    let columns = molecules(&["17234", "422", "999"]);

    let filtered = filter_by_coverage(&db, &columns, MinCoverage::new(4).unwrap());
    assert!(filtered.is_empty());
    assert_eq!(db.len(), 2);
}

#[test]
fn filtered_pathways_are_unchanged() {
    let db = scenario_database();
    let columns = molecules(&["17234", "422"]);

    let filtered = filter_by_coverage(&db, &columns, MinCoverage::new(1).unwrap());
    for (id, pathway) in &filtered {
        assert_eq!(db.get(id), Some(pathway));
    }
}

#[test]
fn alignment_restricts_to_common_samples() {
    let first = matrix(&["A", "B", "C"], vec!["x".to_string()]);
    let second = matrix(&["D", "C", "B"], vec!["y".to_string()]);

    let (alignment, aligned) = align(&[first, second]).unwrap();
    assert_eq!(alignment.samples(), sids(&["B", "C"]).as_slice());
    assert_eq!(aligned[0].samples(), sids(&["B", "C"]).as_slice());
    assert_eq!(aligned[1].samples(), sids(&["C", "B"]).as_slice());
    assert_eq!(aligned[1].get(&"C".parse().unwrap(), &"y".to_string()), Some(10.0));
}

#[test]
fn alignment_is_commutative_as_a_set() {
    let a = sids(&["A", "B", "C", "E"]);
    let b = sids(&["E", "C", "D"]);
    let c = sids(&["C", "E", "F"]);

    let forward = SampleAlignment::from_layers(&[a.as_slice(), b.as_slice(), c.as_slice()]).unwrap();
    let backward = SampleAlignment::from_layers(&[c.as_slice(), b.as_slice(), a.as_slice()]).unwrap();
    let as_set = |alignment: &SampleAlignment| -> HashSet<SampleId> {
        alignment.samples().iter().cloned().collect()
    };
    assert_eq!(as_set(&forward), as_set(&backward));
    assert_eq!(forward.len(), 2);
}

#[test]
fn disjoint_layers_fail_to_align() {
    let first = matrix(&["A", "B"], vec!["x".to_string()]);
    let second = matrix(&["C", "D"], vec!["y".to_string()]);

    let err = align(&[first, second]).unwrap_err();
    assert_matches!(err, KiraError::NoCommonSamples { layers: 2 });
}
