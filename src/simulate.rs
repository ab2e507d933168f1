use std::collections::BTreeSet;

use clap::ValueEnum;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::align::{SampleAlignment, align};
use crate::domain::{MoleculeId, PathwayId};
use crate::error::KiraError;
use crate::matrix::{AbundanceMatrix, SampleMetadata};
use crate::pathways::PathwayDatabase;

pub const LABEL_COLUMN: &str = "Group";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EffectType {
    Constant,
    #[default]
    Var,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InputScale {
    #[default]
    Log,
    Zscore,
}

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub effect_sizes: Vec<f64>,
    pub effect_type: EffectType,
    pub scale: InputScale,
}

#[derive(Debug, Clone)]
pub struct Simulation {
    pub alignment: SampleAlignment,
    pub labels: Vec<usize>,
    pub enriched: BTreeSet<MoleculeId>,
    pub layers: Vec<AbundanceMatrix<MoleculeId>>,
}

impl Simulation {
    pub fn metadata(&self) -> Result<SampleMetadata, KiraError> {
        SampleMetadata::from_column(
            LABEL_COLUMN,
            self.alignment.samples().to_vec(),
            self.labels.iter().map(usize::to_string).collect(),
        )
    }
}

pub fn permuted_labels<R: Rng + ?Sized>(n_samples: usize, n_clusters: usize, rng: &mut R) -> Vec<usize> {
    if n_clusters == 0 {
        return Vec::new();
    }
    let mut labels: Vec<usize> = (0..n_samples).map(|idx| idx % n_clusters).collect();
    labels.shuffle(rng);
    labels
}

pub fn simulate<R: Rng + ?Sized>(
    layers: &[AbundanceMatrix<MoleculeId>],
    database: &PathwayDatabase,
    enriched_paths: &[PathwayId],
    options: &SimulationOptions,
    rng: &mut R,
) -> Result<Simulation, KiraError> {
    if options.effect_sizes.is_empty() {
        return Err(KiraError::InvalidSimulation(
            "at least one effect size is required".to_string(),
        ));
    }
    if let Some(effect) = options.effect_sizes.iter().find(|e| !e.is_finite()) {
        return Err(KiraError::InvalidSimulation(format!(
            "effect size {effect} is not finite"
        )));
    }

    let mut enriched = BTreeSet::new();
    for id in enriched_paths {
        let pathway = database
            .get(id)
            .ok_or_else(|| KiraError::UnknownPathway(id.to_string()))?;
        enriched.extend(pathway.members.iter().cloned());
    }

    let (alignment, aligned) = align(layers)?;
    let labels = permuted_labels(alignment.len(), options.effect_sizes.len(), rng);

    let mut shifted_columns = 0usize;
    let mut layers = Vec::with_capacity(aligned.len());
    for matrix in aligned {
        let (shifted, count) = enrich_layer(matrix, &enriched, &labels, options)?;
        shifted_columns += count;
        layers.push(shifted);
    }
    info!(
        samples = alignment.len(),
        clusters = options.effect_sizes.len(),
        enriched_molecules = enriched.len(),
        shifted_columns,
        "simulated pathway enrichment"
    );

    Ok(Simulation {
        alignment,
        labels,
        enriched,
        layers,
    })
}

fn enrich_layer(
    matrix: AbundanceMatrix<MoleculeId>,
    enriched: &BTreeSet<MoleculeId>,
    labels: &[usize],
    options: &SimulationOptions,
) -> Result<(AbundanceMatrix<MoleculeId>, usize), KiraError> {
    let targets: Vec<usize> = matrix
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, column)| enriched.contains(*column))
        .map(|(idx, _)| idx)
        .collect();
    let mut values = matrix.rows().to_vec();
    let mut shifted = 0usize;

    for col in targets {
        let scale = match options.effect_type {
            EffectType::Constant => 1.0,
            EffectType::Var => match sample_sd(&matrix.column_values(col)) {
                Some(sd) => 1.0 / sd,
                None => {
                    warn!(column = %matrix.columns()[col], "no spread to scale effect, column left unchanged");
                    continue;
                }
            },
        };
        for (row, label) in values.iter_mut().zip(labels) {
            let effect = options.effect_sizes[*label] * scale;
            if let Some(value) = row[col].as_mut() {
                match options.scale {
                    InputScale::Log => *value += effect,
                    InputScale::Zscore => *value *= 1.0 + effect,
                }
            }
        }
        shifted += 1;
    }

    let matrix = AbundanceMatrix::new(matrix.samples().to_vec(), matrix.columns().to_vec(), values)?;
    Ok((matrix, shifted))
}

fn sample_sd(values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.len() < 2 {
        return None;
    }
    let n = present.len() as f64;
    let mean = present.iter().sum::<f64>() / n;
    let variance = present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let sd = variance.sqrt();
    (sd.is_finite() && sd > 0.0).then_some(sd)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::pathways::read_gmt;

    #[test]
    fn labels_are_balanced_permutations() {
        let mut rng = StdRng::seed_from_u64(7);
        let labels = permuted_labels(7, 3, &mut rng);
        let counts: Vec<usize> = (0..3)
            .map(|cluster| labels.iter().filter(|l| **l == cluster).count())
            .collect();
        assert_eq!(counts, vec![3, 2, 2]);
    }

    #[test]
    fn same_seed_same_labels() {
        let first = permuted_labels(20, 4, &mut StdRng::seed_from_u64(42));
        let second = permuted_labels(20, 4, &mut StdRng::seed_from_u64(42));
        assert_eq!(first, second);
    }

    #[test]
    fn sample_sd_needs_two_values() {
        assert_eq!(sample_sd(&[Some(1.0), None]), None);
        assert_eq!(sample_sd(&[Some(2.0), Some(2.0)]), None);
        assert_eq!(sample_sd(&[Some(1.0), Some(3.0)]), Some(2f64.sqrt()));
    }

    #[test]
    fn empty_effects_are_rejected() {
        let options = SimulationOptions {
            effect_sizes: Vec::new(),
            effect_type: EffectType::Constant,
            scale: InputScale::Log,
        };
        let db = read_gmt("P1\tOne\t1\n".as_bytes()).unwrap();
        let err = simulate(&[], &db, &[], &options, &mut StdRng::seed_from_u64(1)).unwrap_err();
        assert_matches!(err, KiraError::InvalidSimulation(_));
    }
}
