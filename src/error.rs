use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid compound name: {0:?}")]
    InvalidCompoundName(String),

    #[error("invalid ChEBI id: {0}")]
    InvalidChebiId(String),

    #[error("invalid UniProt accession: {0}")]
    InvalidUniprotAccession(String),

    #[error("invalid sample id: {0:?}")]
    InvalidSampleId(String),

    #[error("invalid pathway id: {0:?}")]
    InvalidPathwayId(String),

    #[error("invalid organism: {0:?}")]
    InvalidOrganism(String),

    #[error("invalid identifier input type: {0}")]
    InvalidInputType(String),

    #[error("invalid omics layer specifier: {0}")]
    InvalidLayerSpecifier(String),

    #[error("minimum coverage must be at least 1, got {0}")]
    InvalidMinCoverage(i64),

    #[error("no compound names supplied for resolution")]
    EmptyQuery,

    #[error("name resolution request failed: {0}")]
    ResolutionHttp(String),

    #[error("name resolution service returned status {status}: {message}")]
    ResolutionStatus { status: u16, message: String },

    #[error("name resolution failed: {0}")]
    ResolutionFailure(String),

    #[error("malformed conversion table: {0}")]
    ConversionParse(String),

    #[error("pathway database request failed: {0}")]
    PathwayHttp(String),

    #[error("pathway database returned status {status}: {message}")]
    PathwayStatus { status: u16, message: String },

    #[error("no pathways found for organism {organism} ({omics})")]
    NoPathwaysForOrganism { organism: String, omics: String },

    #[error("malformed pathway database line {line}: {message}")]
    PathwayParse { line: usize, message: String },

    #[error("failed to read table {path}: {message}")]
    TableRead { path: PathBuf, message: String },

    #[error("failed to write table {path}: {message}")]
    TableWrite { path: PathBuf, message: String },

    #[error("column not found in table: {0}")]
    MissingColumn(String),

    #[error("duplicate sample id: {0}")]
    DuplicateSample(String),

    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("malformed value {value:?} at sample {sample}, column {column}")]
    MalformedValue {
        sample: String,
        column: String,
        value: String,
    },

    #[error("row has {found} values but {expected} columns were declared")]
    ShapeMismatch { expected: usize, found: usize },

    #[error("no omics layers supplied for alignment")]
    NoLayers,

    #[error("no common samples across {layers} omics layers")]
    NoCommonSamples { layers: usize },

    #[error("pathway not found in database: {0}")]
    UnknownPathway(String),

    #[error("invalid simulation settings: {0}")]
    InvalidSimulation(String),

    #[error("missing config file kira-pathmap.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
