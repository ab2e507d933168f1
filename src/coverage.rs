use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{MoleculeId, PathwayId};
use crate::error::KiraError;
use crate::pathways::PathwayDatabase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MinCoverage(usize);

impl MinCoverage {
    pub fn new(k: i64) -> Result<Self, KiraError> {
        if k <= 0 {
            return Err(KiraError::InvalidMinCoverage(k));
        }
        usize::try_from(k)
            .map(Self)
            .map_err(|_| KiraError::InvalidMinCoverage(k))
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

impl Default for MinCoverage {
    fn default() -> Self {
        Self(3)
    }
}

impl fmt::Display for MinCoverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn pathway_coverage<'a, I>(db: &PathwayDatabase, columns: I) -> BTreeMap<PathwayId, usize>
where
    I: IntoIterator<Item = &'a MoleculeId>,
{
    let present: HashSet<&MoleculeId> = columns.into_iter().collect();
    db.iter()
        .map(|(id, pathway)| {
            let covered = pathway
                .members
                .iter()
                .filter(|member| present.contains(member))
                .count();
            (id.clone(), covered)
        })
        .collect()
}

pub fn filter_by_coverage<'a, I>(db: &PathwayDatabase, columns: I, k: MinCoverage) -> PathwayDatabase
where
    I: IntoIterator<Item = &'a MoleculeId>,
{
    let coverage = pathway_coverage(db, columns);
    let filtered = db.filter(|id, _| coverage.get(id).copied().unwrap_or(0) >= k.get());
    if filtered.is_empty() {
        warn!(
            min_coverage = k.get(),
            pathways = db.len(),
            largest = db.largest_pathway(),
            "no pathway reaches the minimum coverage"
        );
    } else {
        info!(
            min_coverage = k.get(),
            kept = filtered.len(),
            total = db.len(),
            "filtered pathways by coverage"
        );
    }
    filtered
}

/// Coverage over the union of several layers' columns, counting each
/// molecule once.
pub fn multi_omics_coverage<'a, L, I>(db: &PathwayDatabase, layers: L) -> BTreeMap<PathwayId, usize>
where
    L: IntoIterator<Item = I>,
    I: IntoIterator<Item = &'a MoleculeId>,
{
    let all: HashSet<&MoleculeId> = layers.into_iter().flatten().collect();
    pathway_coverage(db, all)
}
