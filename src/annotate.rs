use std::collections::{HashMap, HashSet};
use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::conversion::NormalizedTable;
use crate::domain::{ChebiId, CompoundName};
use crate::error::KiraError;
use crate::matrix::{AbundanceMatrix, ColumnKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CollisionPolicy {
    #[default]
    KeepFirst,
    Sum,
    Mean,
}

impl fmt::Display for CollisionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollisionPolicy::KeepFirst => f.write_str("keep-first"),
            CollisionPolicy::Sum => f.write_str("sum"),
            CollisionPolicy::Mean => f.write_str("mean"),
        }
    }
}

pub struct ChebiLookup<'a> {
    by_name: HashMap<&'a CompoundName, ChebiId>,
    targets: HashSet<ChebiId>,
}

impl<'a> ChebiLookup<'a> {
    pub fn new(table: &'a NormalizedTable) -> Self {
        let by_name = table.lookup();
        let targets = by_name.values().copied().collect();
        Self { by_name, targets }
    }
}

pub trait ResolveColumn: ColumnKey {
    fn resolve_chebi(&self, lookup: &ChebiLookup<'_>) -> Option<ChebiId>;
}

impl ResolveColumn for CompoundName {
    fn resolve_chebi(&self, lookup: &ChebiLookup<'_>) -> Option<ChebiId> {
        lookup.by_name.get(self).copied()
    }
}

/// Already annotated columns survive when the table maps something onto
/// them, so annotating twice with one table is a no-op.
impl ResolveColumn for ChebiId {
    fn resolve_chebi(&self, lookup: &ChebiLookup<'_>) -> Option<ChebiId> {
        lookup.targets.contains(self).then_some(*self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collision {
    pub chebi: ChebiId,
    pub sources: Vec<String>,
    pub policy: CollisionPolicy,
}

#[derive(Debug, Clone)]
pub struct Reannotation {
    pub matrix: AbundanceMatrix<ChebiId>,
    pub dropped: Vec<String>,
    pub collisions: Vec<Collision>,
}

pub fn reannotate<K: ResolveColumn>(
    matrix: &AbundanceMatrix<K>,
    table: &NormalizedTable,
    policy: CollisionPolicy,
) -> Result<Reannotation, KiraError> {
    let lookup = ChebiLookup::new(table);

    let mut groups: Vec<(ChebiId, Vec<usize>)> = Vec::new();
    let mut group_of: HashMap<ChebiId, usize> = HashMap::new();
    let mut dropped = Vec::new();
    for (idx, column) in matrix.columns().iter().enumerate() {
        match column.resolve_chebi(&lookup) {
            Some(chebi) => match group_of.get(&chebi) {
                Some(group) => groups[*group].1.push(idx),
                None => {
                    group_of.insert(chebi, groups.len());
                    groups.push((chebi, vec![idx]));
                }
            },
            None => dropped.push(column.to_string()),
        }
    }

    let collisions: Vec<Collision> = groups
        .iter()
        .filter(|(_, sources)| sources.len() > 1)
        .map(|(chebi, sources)| Collision {
            chebi: *chebi,
            sources: sources
                .iter()
                .map(|idx| matrix.columns()[*idx].to_string())
                .collect(),
            policy,
        })
        .collect();
    for collision in &collisions {
        warn!(
            chebi = %collision.chebi,
            sources = ?collision.sources,
            policy = %policy,
            "several columns map to one ChEBI id"
        );
    }

    let values: Vec<Vec<Option<f64>>> = matrix
        .rows()
        .iter()
        .map(|row| {
            groups
                .iter()
                .map(|(_, sources)| merge_cells(sources.iter().map(|idx| row[*idx]), policy))
                .collect()
        })
        .collect();
    let columns: Vec<ChebiId> = groups.iter().map(|(chebi, _)| *chebi).collect();
    let annotated = AbundanceMatrix::new(matrix.samples().to_vec(), columns, values)?;

    info!(
        kept = annotated.n_columns(),
        dropped = dropped.len(),
        collisions = collisions.len(),
        "re-annotated matrix"
    );
    Ok(Reannotation {
        matrix: annotated,
        dropped,
        collisions,
    })
}

fn merge_cells<I>(mut cells: I, policy: CollisionPolicy) -> Option<f64>
where
    I: Iterator<Item = Option<f64>>,
{
    match policy {
        CollisionPolicy::KeepFirst => cells.next().flatten(),
        CollisionPolicy::Sum | CollisionPolicy::Mean => {
            let present: Vec<f64> = cells.flatten().collect();
            if present.is_empty() {
                return None;
            }
            let sum: f64 = present.iter().sum();
            match policy {
                CollisionPolicy::Mean => Some(sum / present.len() as f64),
                _ => Some(sum),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::{ConversionRecord, ConversionTable, MatchFlag, normalize};
    use crate::domain::SampleId;

    fn table(pairs: &[(&str, Option<&str>)]) -> NormalizedTable {
        normalize(&ConversionTable::new(
            pairs
                .iter()
                .map(|(name, id)| {
                    ConversionRecord::new(
                        name.parse().unwrap(),
                        id.map(str::to_string),
                        if id.is_some() {
                            MatchFlag::Exact
                        } else {
                            MatchFlag::Unmatched
                        },
                    )
                })
                .collect(),
        ))
    }

    fn matrix(columns: &[&str], rows: Vec<Vec<Option<f64>>>) -> AbundanceMatrix<CompoundName> {
        let samples = (0..rows.len())
            .map(|i| format!("S{i}").parse::<SampleId>().unwrap())
            .collect();
        let columns = columns.iter().map(|c| c.parse().unwrap()).collect();
        AbundanceMatrix::new(samples, columns, rows).unwrap()
    }

    #[test]
    fn keep_first_on_collision() {
        let table = table(&[("a", Some("1")), ("b", Some("1"))]);
        let m = matrix(&["a", "b"], vec![vec![None, Some(2.0)], vec![Some(3.0), Some(4.0)]]);
        let out = reannotate(&m, &table, CollisionPolicy::KeepFirst).unwrap();
        assert_eq!(out.matrix.n_columns(), 1);
        assert_eq!(out.matrix.column_values(0), vec![None, Some(3.0)]);
        assert_eq!(out.collisions.len(), 1);
        assert_eq!(out.collisions[0].sources, vec!["a", "b"]);
    }

    #[test]
    fn sum_and_mean_skip_missing() {
        let table = table(&[("a", Some("1")), ("b", Some("1"))]);
        let m = matrix(
            &["a", "b"],
            vec![vec![None, Some(2.0)], vec![Some(3.0), Some(5.0)], vec![None, None]],
        );
        let sum = reannotate(&m, &table, CollisionPolicy::Sum).unwrap();
        assert_eq!(sum.matrix.column_values(0), vec![Some(2.0), Some(8.0), None]);
        let mean = reannotate(&m, &table, CollisionPolicy::Mean).unwrap();
        assert_eq!(mean.matrix.column_values(0), vec![Some(2.0), Some(4.0), None]);
    }

    #[test]
    fn annotating_twice_changes_nothing() {
        let table = table(&[("glucose", Some("17234")), ("lactate", Some("422"))]);
        let m = matrix(&["glucose", "lactate"], vec![vec![Some(1.0), Some(2.0)]]);
        let once = reannotate(&m, &table, CollisionPolicy::KeepFirst).unwrap();
        let twice = reannotate(&once.matrix, &table, CollisionPolicy::KeepFirst).unwrap();
        assert_eq!(once.matrix, twice.matrix);
        assert!(twice.dropped.is_empty());
    }
}
