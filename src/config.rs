use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::annotate::CollisionPolicy;
use crate::coverage::MinCoverage;
use crate::domain::{InputType, OmicsType, Organism};
use crate::error::KiraError;
use crate::matrix::TableLayout;

pub const DEFAULT_CONFIG_FILE: &str = "kira-pathmap.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub organism: Option<String>,
    #[serde(default)]
    pub min_coverage: Option<i64>,
    #[serde(default)]
    pub collision_policy: Option<CollisionPolicy>,
    #[serde(default)]
    pub input_type: Option<InputType>,
    #[serde(default)]
    pub download_latest: bool,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub label_column: Option<String>,
    #[serde(default)]
    pub layers: Vec<LayerEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum LayerEntry {
    Shorthand(String),
    Detailed(LayerEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LayerEntryObject {
    pub path: String,
    pub omics: OmicsType,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub identifiers: Option<ColumnIdentifiers>,
    #[serde(default)]
    pub sample_column: Option<String>,
    #[serde(default)]
    pub metadata_columns: Vec<String>,
    #[serde(default)]
    pub delimiter: Option<String>,
    #[serde(default)]
    pub conversion_table: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnIdentifiers {
    Names,
    Chebi,
    Uniprot,
}

impl ColumnIdentifiers {
    pub fn default_for(omics: OmicsType) -> Self {
        match omics {
            OmicsType::Metabolomics => ColumnIdentifiers::Names,
            OmicsType::Proteomics => ColumnIdentifiers::Uniprot,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LayerRequest {
    pub name: String,
    pub path: PathBuf,
    pub omics: OmicsType,
    pub identifiers: ColumnIdentifiers,
    pub layout: TableLayout,
    pub conversion_table: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub organism: Organism,
    pub min_coverage: MinCoverage,
    pub collision_policy: CollisionPolicy,
    pub input_type: InputType,
    pub download_latest: bool,
    pub output_dir: PathBuf,
    pub label_column: Option<String>,
    pub layers: Vec<LayerRequest>,
}

impl FromStr for LayerRequest {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_shorthand(value)
    }
}

impl LayerRequest {
    pub fn with_columns(mut self, sample_column: Option<String>, metadata_columns: &[String]) -> Self {
        if sample_column.is_some() {
            self.layout.sample_column = sample_column;
        }
        self.layout.metadata_columns = metadata_columns.to_vec();
        self
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(KiraError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let organism = match config.organism {
            Some(value) => value.parse()?,
            None => Organism::default(),
        };
        let min_coverage = match config.min_coverage {
            Some(k) => MinCoverage::new(k)?,
            None => MinCoverage::default(),
        };

        let layers = config
            .layers
            .into_iter()
            .map(|entry| match entry {
                LayerEntry::Shorthand(value) => parse_shorthand(&value),
                LayerEntry::Detailed(obj) => resolve_detailed(obj),
            })
            .collect::<Result<Vec<_>, KiraError>>()?;
        if layers.is_empty() {
            return Err(KiraError::InvalidConfig(
                "at least one omics layer is required".to_string(),
            ));
        }
        let mut names = HashSet::new();
        for layer in &layers {
            if !names.insert(layer.name.as_str()) {
                return Err(KiraError::InvalidConfig(format!(
                    "duplicate layer name: {}",
                    layer.name
                )));
            }
        }

        Ok(ResolvedConfig {
            schema_version,
            organism,
            min_coverage,
            collision_policy: config.collision_policy.unwrap_or_default(),
            input_type: config.input_type.unwrap_or_default(),
            download_latest: config.download_latest,
            output_dir: PathBuf::from(config.output_dir.as_deref().unwrap_or("pathmap-out")),
            label_column: config.label_column,
            layers,
        })
    }
}

fn parse_shorthand(value: &str) -> Result<LayerRequest, KiraError> {
    let (omics, path) = value
        .split_once(':')
        .ok_or_else(|| KiraError::InvalidLayerSpecifier(value.to_string()))?;
    let omics: OmicsType = omics.parse()?;
    let path = PathBuf::from(path.trim());
    if path.as_os_str().is_empty() {
        return Err(KiraError::InvalidLayerSpecifier(value.to_string()));
    }
    Ok(LayerRequest {
        name: layer_name(&path, omics),
        layout: TableLayout::for_path(&path),
        path,
        omics,
        identifiers: ColumnIdentifiers::default_for(omics),
        conversion_table: None,
    })
}

fn resolve_detailed(obj: LayerEntryObject) -> Result<LayerRequest, KiraError> {
    let path = PathBuf::from(&obj.path);
    let mut layout = TableLayout::for_path(&path);
    if let Some(delimiter) = obj.delimiter.as_deref() {
        layout.delimiter = parse_delimiter(delimiter)?;
    }
    layout.sample_column = obj.sample_column;
    layout.metadata_columns = obj.metadata_columns;

    let identifiers = obj
        .identifiers
        .unwrap_or_else(|| ColumnIdentifiers::default_for(obj.omics));
    let compatible = matches!(
        (obj.omics, identifiers),
        (OmicsType::Metabolomics, ColumnIdentifiers::Names | ColumnIdentifiers::Chebi)
            | (OmicsType::Proteomics, ColumnIdentifiers::Uniprot)
    );
    if !compatible {
        return Err(KiraError::InvalidConfig(format!(
            "{} layer {} cannot use {identifiers:?} identifiers",
            obj.omics, obj.path
        )));
    }

    Ok(LayerRequest {
        name: obj.name.unwrap_or_else(|| layer_name(&path, obj.omics)),
        path,
        omics: obj.omics,
        identifiers,
        layout,
        conversion_table: obj.conversion_table.map(PathBuf::from),
    })
}

fn layer_name(path: &std::path::Path, omics: OmicsType) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.split('.').next())
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| omics.to_string())
}

fn parse_delimiter(value: &str) -> Result<u8, KiraError> {
    match value {
        "\t" | "\\t" | "tab" => Ok(b'\t'),
        "," | "comma" => Ok(b','),
        ";" => Ok(b';'),
        other if other.len() == 1 && other.is_ascii() => Ok(other.as_bytes()[0]),
        other => Err(KiraError::InvalidConfig(format!("unsupported delimiter {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_config_shorthand() {
        let config = Config {
            layers: vec![
                LayerEntry::Shorthand("metabolomics:data/metabolites.csv".to_string()),
                LayerEntry::Shorthand("proteomics:data/proteins.tsv".to_string()),
            ],
            ..Config::default()
        };

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.organism.as_str(), "Homo sapiens");
        assert_eq!(resolved.min_coverage.get(), 3);
        assert_eq!(resolved.collision_policy, CollisionPolicy::KeepFirst);
        assert_eq!(resolved.layers[0].name, "metabolites");
        assert_eq!(resolved.layers[0].identifiers, ColumnIdentifiers::Names);
        assert_eq!(resolved.layers[1].layout.delimiter, b'\t');
        assert_eq!(resolved.layers[1].identifiers, ColumnIdentifiers::Uniprot);
    }

    #[test]
    fn rejects_zero_coverage() {
        let config = Config {
            min_coverage: Some(0),
            layers: vec![LayerEntry::Shorthand("metabolomics:a.csv".to_string())],
            ..Config::default()
        };
        let err = ConfigLoader::resolve_config(config).unwrap_err();
        assert_matches!(err, KiraError::InvalidMinCoverage(0));
    }

    #[test]
    fn rejects_mismatched_identifiers() {
        let config: Config = serde_json::from_str(
            r#"{"layers": [{"path": "p.csv", "omics": "proteomics", "identifiers": "chebi"}]}"#,
        )
        .unwrap();
        let err = ConfigLoader::resolve_config(config).unwrap_err();
        assert_matches!(err, KiraError::InvalidConfig(_));
    }
}
