use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::time::Duration;

use camino::Utf8PathBuf;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{MoleculeId, OmicsType, Organism, PathwayId};
use crate::error::KiraError;
use crate::store::{PathwayMetadata, Store};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pathway {
    pub name: String,
    pub members: BTreeSet<MoleculeId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PathwayDatabase {
    pathways: BTreeMap<PathwayId, Pathway>,
}

impl PathwayDatabase {
    pub fn new(pathways: BTreeMap<PathwayId, Pathway>) -> Self {
        Self { pathways }
    }

    pub fn len(&self) -> usize {
        self.pathways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pathways.is_empty()
    }

    pub fn get(&self, id: &PathwayId) -> Option<&Pathway> {
        self.pathways.get(id)
    }

    pub fn contains(&self, id: &PathwayId) -> bool {
        self.pathways.contains_key(id)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, PathwayId, Pathway> {
        self.pathways.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &PathwayId> {
        self.pathways.keys()
    }

    pub fn largest_pathway(&self) -> usize {
        self.pathways
            .values()
            .map(|p| p.members.len())
            .max()
            .unwrap_or(0)
    }

    pub fn filter<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(&PathwayId, &Pathway) -> bool,
    {
        Self {
            pathways: self
                .pathways
                .iter()
                .filter(|(id, pathway)| keep(id, pathway))
                .map(|(id, pathway)| (id.clone(), pathway.clone()))
                .collect(),
        }
    }

    pub fn merge(&self, other: &PathwayDatabase) -> Self {
        let mut pathways = self.pathways.clone();
        for (id, pathway) in &other.pathways {
            pathways
                .entry(id.clone())
                .and_modify(|existing| existing.members.extend(pathway.members.iter().cloned()))
                .or_insert_with(|| pathway.clone());
        }
        Self { pathways }
    }

    pub fn from_path(path: &Path, organism: &Organism, omics: OmicsType) -> Result<Self, KiraError> {
        let file = File::open(path).map_err(|err| KiraError::TableRead {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        let reader = BufReader::new(file);
        if path.extension().map(|ext| ext == "gmt").unwrap_or(false) {
            read_gmt(reader)
        } else {
            parse_reactome(reader, organism, omics)
        }
    }

    pub fn write_gmt<W: Write>(&self, mut writer: W) -> Result<(), KiraError> {
        for (id, pathway) in &self.pathways {
            let mut line = format!("{id}\t{}", pathway.name);
            for member in &pathway.members {
                line.push('\t');
                line.push_str(&member.to_string());
            }
            line.push('\n');
            writer
                .write_all(line.as_bytes())
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }

    pub fn to_gmt_bytes(&self) -> Result<Vec<u8>, KiraError> {
        let mut buffer = Vec::new();
        self.write_gmt(&mut buffer)?;
        Ok(buffer)
    }
}

impl<'a> IntoIterator for &'a PathwayDatabase {
    type Item = (&'a PathwayId, &'a Pathway);
    type IntoIter = btree_map::Iter<'a, PathwayId, Pathway>;

    fn into_iter(self) -> Self::IntoIter {
        self.pathways.iter()
    }
}

/// Parses a Reactome `*2Reactome_All_Levels.txt` export:
/// `member, pathway id, url, pathway name, evidence, species`, tab separated.
/// Only rows for `organism` are kept; members that are not valid identifiers
/// for `omics` are skipped.
pub fn parse_reactome<R: BufRead>(
    reader: R,
    organism: &Organism,
    omics: OmicsType,
) -> Result<PathwayDatabase, KiraError> {
    let mut pathways: BTreeMap<PathwayId, Pathway> = BTreeMap::new();
    let mut skipped = 0usize;
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|err| KiraError::PathwayParse {
            line: idx + 1,
            message: err.to_string(),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 6 {
            return Err(KiraError::PathwayParse {
                line: idx + 1,
                message: format!("expected 6 tab-separated fields, found {}", fields.len()),
            });
        }
        if !organism.matches(fields[5]) {
            continue;
        }
        let Ok(member) = MoleculeId::parse_as(fields[0], omics) else {
            skipped += 1;
            continue;
        };
        let id: PathwayId = fields[1].parse().map_err(|_| KiraError::PathwayParse {
            line: idx + 1,
            message: "empty pathway id".to_string(),
        })?;
        pathways
            .entry(id)
            .or_insert_with(|| Pathway {
                name: fields[3].trim().to_string(),
                members: BTreeSet::new(),
            })
            .members
            .insert(member);
    }
    if skipped > 0 {
        debug!(skipped, omics = %omics, "skipped unparseable pathway members");
    }
    Ok(PathwayDatabase { pathways })
}

pub fn read_gmt<R: BufRead>(reader: R) -> Result<PathwayDatabase, KiraError> {
    let mut pathways = BTreeMap::new();
    for (idx, line) in reader.lines().enumerate() {
        let parse_err = |message: String| KiraError::PathwayParse {
            line: idx + 1,
            message,
        };
        let line = line.map_err(|err| parse_err(err.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let id: PathwayId = fields
            .next()
            .unwrap_or_default()
            .parse()
            .map_err(|_| parse_err("empty pathway id".to_string()))?;
        let name = fields
            .next()
            .ok_or_else(|| parse_err("missing pathway name".to_string()))?
            .trim()
            .to_string();
        let members = fields
            .filter(|field| !field.trim().is_empty())
            .map(|field| field.parse::<MoleculeId>())
            .collect::<Result<BTreeSet<_>, KiraError>>()
            .map_err(|err| parse_err(err.to_string()))?;
        pathways.insert(id, Pathway { name, members });
    }
    Ok(PathwayDatabase { pathways })
}

pub trait PathwayProvider {
    fn download(&self, omics: OmicsType) -> Result<Vec<u8>, KiraError>;

    fn source_url(&self, omics: OmicsType) -> String;
}

#[derive(Clone)]
pub struct ReactomeHttpClient {
    client: Client,
    base_url: String,
}

impl ReactomeHttpClient {
    pub fn new() -> Result<Self, KiraError> {
        Self::with_base_url("https://reactome.org/download/current")
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-pathmap/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::PathwayHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| KiraError::PathwayHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl PathwayProvider for ReactomeHttpClient {
    fn download(&self, omics: OmicsType) -> Result<Vec<u8>, KiraError> {
        let url = self.source_url(omics);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| KiraError::PathwayHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "pathway database request failed".to_string());
            return Err(KiraError::PathwayStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| KiraError::PathwayHttp(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn source_url(&self, omics: OmicsType) -> String {
        let file = match omics {
            OmicsType::Metabolomics => "ChEBI2Reactome_All_Levels.txt",
            OmicsType::Proteomics => "UniProt2Reactome_All_Levels.txt",
        };
        format!("{}/{file}", self.base_url)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    pub download_latest: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadSource {
    Cache,
    Download,
}

#[derive(Debug, Clone)]
pub struct LoadedPathways {
    pub database: PathwayDatabase,
    pub source: LoadSource,
    pub cache_path: Utf8PathBuf,
}

pub struct PathwayLoader<P: PathwayProvider> {
    store: Store,
    provider: P,
}

impl<P: PathwayProvider> PathwayLoader<P> {
    pub fn new(store: Store, provider: P) -> Self {
        Self { store, provider }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn cached(&self, organism: &Organism, omics: OmicsType) -> Option<Utf8PathBuf> {
        let path = self.store.pathway_cache_path(organism, omics);
        path.as_std_path().exists().then_some(path)
    }

    pub fn list_cached(&self) -> Result<Vec<PathwayMetadata>, KiraError> {
        self.store.list_pathway_metadata()
    }

    pub fn load(
        &self,
        organism: &Organism,
        omics: OmicsType,
        options: LoadOptions,
    ) -> Result<LoadedPathways, KiraError> {
        let cache_path = self.store.pathway_cache_path(organism, omics);

        if !options.download_latest && cache_path.as_std_path().exists() {
            let file = File::open(cache_path.as_std_path())
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
            let database = read_gmt(BufReader::new(file))?;
            info!(
                organism = %organism,
                omics = %omics,
                pathways = database.len(),
                "pathway database served from cache"
            );
            return Ok(LoadedPathways {
                database,
                source: LoadSource::Cache,
                cache_path,
            });
        }

        let start = std::time::Instant::now();
        let raw = self.provider.download(omics)?;
        let database = parse_reactome(raw.as_slice(), organism, omics)?;
        if database.is_empty() {
            return Err(KiraError::NoPathwaysForOrganism {
                organism: organism.to_string(),
                omics: omics.to_string(),
            });
        }

        self.store.ensure_cache_root()?;
        Store::write_bytes_atomic(&cache_path, &database.to_gmt_bytes()?)?;
        let metadata = PathwayMetadata {
            source: self.provider.source_url(omics),
            organism: organism.to_string(),
            omics,
            pathways: database.len(),
            downloaded_at: chrono::Utc::now().to_rfc3339(),
            tool: format!("kira-pathmap/{}", env!("CARGO_PKG_VERSION")),
            resolved_path: cache_path.to_string(),
        };
        Store::write_metadata(&self.store.pathway_metadata_path(organism, omics), &metadata)?;
        info!(
            organism = %organism,
            omics = %omics,
            pathways = database.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "pathway database downloaded"
        );

        Ok(LoadedPathways {
            database,
            source: LoadSource::Download,
            cache_path,
        })
    }
}
