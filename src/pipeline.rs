use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::info;

use crate::align::SampleAlignment;
use crate::annotate::{Collision, reannotate};
use crate::config::{ColumnIdentifiers, LayerRequest, ResolvedConfig};
use crate::conversion::{ConversionTable, normalize};
use crate::coverage::{MinCoverage, filter_by_coverage, pathway_coverage};
use crate::domain::{ChebiId, CompoundName, MoleculeId, OmicsType, PathwayId, SampleId};
use crate::error::KiraError;
use crate::matrix::{AbundanceMatrix, Labels, SampleMetadata, TableLayout, read_table, write_table};
use crate::pathways::{LoadOptions, LoadSource, PathwayDatabase, PathwayLoader, PathwayProvider};
use crate::resolver::{NameResolver, TableResolver, build_conversion_table};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub organism: String,
    pub min_coverage: MinCoverage,
    pub layers: Vec<LayerSummary>,
    pub pathways: PathwaySummary,
    pub aligned_samples: Vec<SampleId>,
    pub labels: Option<LabelSummary>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerSummary {
    pub name: String,
    pub omics: OmicsType,
    pub samples: usize,
    pub input_columns: usize,
    pub annotated_columns: usize,
    pub dropped: Vec<String>,
    pub collisions: Vec<Collision>,
    pub unconfirmed: usize,
    pub malformed: usize,
    pub pathways_covered: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PathwaySummary {
    pub sources: Vec<PathwaySource>,
    pub loaded: usize,
    pub kept: usize,
    pub coverage: BTreeMap<PathwayId, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PathwaySource {
    pub omics: OmicsType,
    pub source: LoadSource,
    pub cache_path: String,
    pub pathways: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LabelSummary {
    pub column: String,
    pub layer: String,
    pub samples: Vec<SampleId>,
    #[serde(flatten)]
    pub labels: Labels,
}

#[derive(Debug, Clone)]
pub struct AnnotatedLayer {
    pub name: String,
    pub omics: OmicsType,
    pub matrix: AbundanceMatrix<MoleculeId>,
    pub metadata: SampleMetadata,
    pub conversion: Option<ConversionTable>,
    pub input_columns: usize,
    pub dropped: Vec<String>,
    pub collisions: Vec<Collision>,
    pub unconfirmed: usize,
    pub malformed: usize,
}

pub struct Pipeline<R: NameResolver, P: PathwayProvider> {
    resolver: R,
    loader: PathwayLoader<P>,
}

impl<R: NameResolver, P: PathwayProvider> Pipeline<R, P> {
    pub fn new(resolver: R, loader: PathwayLoader<P>) -> Self {
        Self { resolver, loader }
    }

    pub fn store(&self) -> &Store {
        self.loader.store()
    }

    pub fn run(
        &self,
        config: &ResolvedConfig,
        sink: &dyn ProgressSink,
    ) -> Result<PipelineResult, KiraError> {
        let start = Instant::now();

        let layers = config
            .layers
            .iter()
            .map(|request| self.annotate_layer(request, config, sink))
            .collect::<Result<Vec<_>, KiraError>>()?;

        let omics: BTreeSet<OmicsType> = layers.iter().map(|layer| layer.omics).collect();
        let mut database = PathwayDatabase::default();
        let mut sources = Vec::new();
        for omics in omics {
            let loaded = self.loader.load(
                &config.organism,
                omics,
                LoadOptions {
                    download_latest: config.download_latest,
                },
            )?;
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Pathways; omics={omics} source={} pathways={}",
                    source_label(loaded.source),
                    loaded.database.len()
                ),
                elapsed: Some(start.elapsed()),
            });
            sources.push(PathwaySource {
                omics,
                source: loaded.source,
                cache_path: loaded.cache_path.to_string(),
                pathways: loaded.database.len(),
            });
            database = database.merge(&loaded.database);
        }

        let filtered = filter_by_coverage(
            &database,
            layers.iter().flat_map(|layer| layer.matrix.columns()),
            config.min_coverage,
        );
        let coverage = pathway_coverage(
            &filtered,
            layers.iter().flat_map(|layer| layer.matrix.columns()),
        );
        sink.event(ProgressEvent {
            message: format!(
                "phase=Coverage; k={} kept={} total={}",
                config.min_coverage,
                filtered.len(),
                database.len()
            ),
            elapsed: Some(start.elapsed()),
        });

        let samples: Vec<&[SampleId]> = layers.iter().map(|layer| layer.matrix.samples()).collect();
        let alignment = SampleAlignment::from_layers(&samples)?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Align; layers={} samples={}",
                layers.len(),
                alignment.len()
            ),
            elapsed: Some(start.elapsed()),
        });

        let labels = match config.label_column.as_deref() {
            Some(column) => Some(label_summary(&layers, &alignment, column)?),
            None => None,
        };

        let output_dir = Utf8PathBuf::from_path_buf(config.output_dir.clone()).map_err(|path| {
            KiraError::Filesystem(format!("output directory is not UTF-8: {}", path.display()))
        })?;
        let mut outputs = Vec::new();
        for layer in &layers {
            let matrix = alignment.restrict(&layer.matrix);
            let metadata = alignment.restrict_metadata(&layer.metadata);
            let request = config
                .layers
                .iter()
                .find(|request| request.name == layer.name);
            let layout = TableLayout {
                delimiter: b',',
                sample_column: request.and_then(|r| r.layout.sample_column.clone()),
                metadata_columns: metadata.columns().to_vec(),
            };
            let mut buffer = Vec::new();
            write_table(&mut buffer, &matrix, Some(&metadata), &layout)?;
            let path = output_dir.join(format!("{}.annotated.csv", layer.name));
            Store::write_bytes_atomic(&path, &buffer)?;
            outputs.push(path.to_string());

            if let Some(conversion) = &layer.conversion {
                let mut buffer = Vec::new();
                conversion.write_csv(&mut buffer)?;
                let path = output_dir.join(format!("{}.conversion.csv", layer.name));
                Store::write_bytes_atomic(&path, &buffer)?;
                outputs.push(path.to_string());
            }
        }
        let gmt_path = output_dir.join("pathways.filtered.gmt");
        Store::write_bytes_atomic(&gmt_path, &filtered.to_gmt_bytes()?)?;
        outputs.push(gmt_path.to_string());

        let summaries = layers
            .iter()
            .map(|layer| LayerSummary {
                name: layer.name.clone(),
                omics: layer.omics,
                samples: layer.matrix.n_samples(),
                input_columns: layer.input_columns,
                annotated_columns: layer.matrix.n_columns(),
                dropped: layer.dropped.clone(),
                collisions: layer.collisions.clone(),
                unconfirmed: layer.unconfirmed,
                malformed: layer.malformed,
                pathways_covered: pathway_coverage(&filtered, layer.matrix.columns())
                    .values()
                    .filter(|covered| **covered >= config.min_coverage.get())
                    .count(),
            })
            .collect();

        let mut result = PipelineResult {
            organism: config.organism.to_string(),
            min_coverage: config.min_coverage,
            layers: summaries,
            pathways: PathwaySummary {
                sources,
                loaded: database.len(),
                kept: filtered.len(),
                coverage,
            },
            aligned_samples: alignment.samples().to_vec(),
            labels,
            outputs,
        };
        let summary_path = output_dir.join("summary.json");
        result.outputs.push(summary_path.to_string());
        let content = serde_json::to_vec_pretty(&result)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Store::write_bytes_atomic(&summary_path, &content)?;

        sink.event(ProgressEvent {
            message: format!("phase=Write; dir={output_dir} files={}", result.outputs.len()),
            elapsed: Some(start.elapsed()),
        });
        info!(
            layers = result.layers.len(),
            pathways = result.pathways.kept,
            samples = result.aligned_samples.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "pipeline finished"
        );
        Ok(result)
    }

    pub fn annotate_layer(
        &self,
        request: &LayerRequest,
        config: &ResolvedConfig,
        sink: &dyn ProgressSink,
    ) -> Result<AnnotatedLayer, KiraError> {
        let table = read_table(&request.path, &request.layout)?;
        let input_columns = table.matrix.n_columns();
        sink.event(ProgressEvent {
            message: format!(
                "phase=Read; layer={} samples={} columns={input_columns}",
                request.name,
                table.matrix.n_samples()
            ),
            elapsed: None,
        });

        let mut layer = AnnotatedLayer {
            name: request.name.clone(),
            omics: request.omics,
            matrix: AbundanceMatrix::default(),
            metadata: table.metadata,
            conversion: None,
            input_columns,
            dropped: Vec::new(),
            collisions: Vec::new(),
            unconfirmed: 0,
            malformed: 0,
        };

        match request.identifiers {
            ColumnIdentifiers::Names => {
                let matrix = table.matrix.try_map_columns(|column| column.parse::<CompoundName>())?;
                let conversion = match &request.conversion_table {
                    Some(path) => {
                        let stored = read_conversion_table(path)?;
                        build_conversion_table(
                            &TableResolver::new(&stored),
                            matrix.columns(),
                            config.input_type,
                        )?
                    }
                    None => {
                        build_conversion_table(&self.resolver, matrix.columns(), config.input_type)?
                    }
                };
                sink.event(ProgressEvent {
                    message: format!(
                        "phase=Resolve; layer={} queries={}",
                        request.name,
                        conversion.len()
                    ),
                    elapsed: None,
                });
                let normalized = normalize(&conversion);
                let annotated = reannotate(&matrix, &normalized, config.collision_policy)?;
                sink.event(ProgressEvent {
                    message: format!(
                        "phase=Annotate; layer={} kept={} dropped={} collisions={}",
                        request.name,
                        annotated.matrix.n_columns(),
                        annotated.dropped.len(),
                        annotated.collisions.len()
                    ),
                    elapsed: None,
                });
                layer.unconfirmed = normalized.unconfirmed();
                layer.malformed = normalized.malformed();
                layer.dropped = annotated.dropped;
                layer.collisions = annotated.collisions;
                layer.conversion = Some(conversion);
                layer.matrix = annotated.matrix.try_map_columns(|id| Ok(MoleculeId::from(*id)))?;
            }
            ColumnIdentifiers::Chebi => {
                layer.matrix = table
                    .matrix
                    .try_map_columns(|column| column.parse::<ChebiId>().map(MoleculeId::from))?;
            }
            ColumnIdentifiers::Uniprot => {
                layer.matrix = table
                    .matrix
                    .try_map_columns(|column| MoleculeId::parse_as(column, OmicsType::Proteomics))?;
            }
        }
        Ok(layer)
    }
}

pub fn read_conversion_table(path: &Path) -> Result<ConversionTable, KiraError> {
    let file = File::open(path).map_err(|err| KiraError::TableRead {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    ConversionTable::read_csv(BufReader::new(file))
}

fn label_summary(
    layers: &[AnnotatedLayer],
    alignment: &SampleAlignment,
    column: &str,
) -> Result<LabelSummary, KiraError> {
    let layer = layers
        .iter()
        .find(|layer| layer.metadata.columns().iter().any(|c| c == column))
        .ok_or_else(|| KiraError::MissingColumn(column.to_string()))?;
    let metadata = alignment.restrict_metadata(&layer.metadata);
    Ok(LabelSummary {
        column: column.to_string(),
        layer: layer.name.clone(),
        samples: metadata.samples().to_vec(),
        labels: metadata.factorize(column)?,
    })
}

fn source_label(source: LoadSource) -> &'static str {
    match source {
        LoadSource::Cache => "cache",
        LoadSource::Download => "download",
    }
}
