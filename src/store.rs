use std::fs;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tempfile::Builder;

use crate::domain::{OmicsType, Organism};
use crate::error::KiraError;

#[derive(Debug, Clone)]
pub struct Store {
    cache_root: Utf8PathBuf,
}

impl Store {
    pub fn new() -> Result<Self, KiraError> {
        let cache_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("kira-pathmap")).ok()
            })
            .ok_or_else(|| {
                KiraError::Filesystem("unable to resolve cache directory".to_string())
            })?;
        Ok(Self { cache_root })
    }

    pub fn new_with_root(cache_root: Utf8PathBuf) -> Self {
        Self { cache_root }
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn pathway_cache_path(&self, organism: &Organism, omics: OmicsType) -> Utf8PathBuf {
        self.cache_root
            .join("pathways")
            .join("reactome")
            .join(organism.slug())
            .join(format!("{omics}.gmt"))
    }

    pub fn pathway_metadata_path(&self, organism: &Organism, omics: OmicsType) -> Utf8PathBuf {
        self.cache_root
            .join("metadata")
            .join("pathways")
            .join(format!("{}-{omics}.json", organism.slug()))
    }

    pub fn ensure_cache_root(&self) -> Result<(), KiraError> {
        fs::create_dir_all(self.cache_root.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    pub fn clear_cache(&self) -> Result<(), KiraError> {
        if self.cache_root.as_std_path().exists() {
            fs::remove_dir_all(self.cache_root.as_std_path())
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }

    pub fn write_metadata(path: &Utf8Path, metadata: &PathwayMetadata) -> Result<(), KiraError> {
        let content = serde_json::to_vec_pretty(metadata)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
        let parent = path
            .parent()
            .ok_or_else(|| KiraError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let temp = Builder::new()
            .prefix("kira-pathmap")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn list_pathway_metadata(&self) -> Result<Vec<PathwayMetadata>, KiraError> {
        let metadata_root = self.cache_root.join("metadata").join("pathways");
        if !metadata_root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for path in walk_dir(metadata_root.as_std_path())? {
            if path.is_file() && path.extension().map(|ext| ext == "json").unwrap_or(false) {
                let content = fs::read_to_string(&path)
                    .map_err(|err| KiraError::Filesystem(err.to_string()))?;
                let metadata: PathwayMetadata = serde_json::from_str(&content)
                    .map_err(|err| KiraError::Filesystem(err.to_string()))?;
                entries.push(metadata);
            }
        }
        entries.sort_by(|a, b| (&a.organism, a.omics).cmp(&(&b.organism, b.omics)));
        Ok(entries)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathwayMetadata {
    pub source: String,
    pub organism: String,
    pub omics: OmicsType,
    pub pathways: usize,
    pub downloaded_at: String,
    pub tool: String,
    pub resolved_path: String,
}

fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, KiraError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    Ok(items)
}
