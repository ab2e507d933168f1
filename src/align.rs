use std::collections::HashSet;

use serde::Serialize;
use tracing::info;

use crate::domain::SampleId;
use crate::error::KiraError;
use crate::matrix::{AbundanceMatrix, ColumnKey, SampleMetadata};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleAlignment {
    samples: Vec<SampleId>,
}

impl SampleAlignment {
    pub fn from_layers(layers: &[&[SampleId]]) -> Result<Self, KiraError> {
        let (first, rest) = layers.split_first().ok_or(KiraError::NoLayers)?;
        let others: Vec<HashSet<&SampleId>> =
            rest.iter().map(|layer| layer.iter().collect()).collect();
        let samples: Vec<SampleId> = first
            .iter()
            .filter(|sample| others.iter().all(|layer| layer.contains(sample)))
            .cloned()
            .collect();
        if samples.is_empty() {
            return Err(KiraError::NoCommonSamples {
                layers: layers.len(),
            });
        }
        info!(
            layers = layers.len(),
            common = samples.len(),
            "aligned samples across layers"
        );
        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[SampleId] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn restrict<K: ColumnKey>(&self, matrix: &AbundanceMatrix<K>) -> AbundanceMatrix<K> {
        matrix.select_samples(&self.sample_set())
    }

    pub fn restrict_metadata(&self, metadata: &SampleMetadata) -> SampleMetadata {
        metadata.select_samples(&self.sample_set())
    }

    fn sample_set(&self) -> HashSet<&SampleId> {
        self.samples.iter().collect()
    }
}

pub fn align<K: ColumnKey>(
    matrices: &[AbundanceMatrix<K>],
) -> Result<(SampleAlignment, Vec<AbundanceMatrix<K>>), KiraError> {
    let layers: Vec<&[SampleId]> = matrices.iter().map(|m| m.samples()).collect();
    let alignment = SampleAlignment::from_layers(&layers)?;
    let aligned = matrices.iter().map(|m| alignment.restrict(m)).collect();
    Ok((alignment, aligned))
}
