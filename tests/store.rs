use camino::Utf8PathBuf;

use kira_pathmap::domain::{OmicsType, Organism};
use kira_pathmap::store::{PathwayMetadata, Store};

#[test]
fn layout_paths() {
    let store = Store::new().unwrap();
    let organism: Organism = "Mus musculus".parse().unwrap();

    let gmt = store.pathway_cache_path(&organism, OmicsType::Proteomics);
    assert!(gmt.starts_with(store.cache_root()));
    assert!(gmt.ends_with("pathways/reactome/mus_musculus/proteomics.gmt"));

    let meta = store.pathway_metadata_path(&organism, OmicsType::Metabolomics);
    assert!(meta.to_string().contains("metadata/pathways/"));
}

#[test]
fn list_metadata_sorted_and_clear() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("cache")).unwrap();
    let store = Store::new_with_root(root);

    for (organism, omics) in [
        ("Mus musculus", OmicsType::Metabolomics),
        ("Homo sapiens", OmicsType::Proteomics),
        ("Homo sapiens", OmicsType::Metabolomics),
    ] {
        let organism: Organism = organism.parse().unwrap();
        let metadata = PathwayMetadata {
            source: "https://reactome.org/download/current".to_string(),
            organism: organism.to_string(),
            omics,
            pathways: 1,
            downloaded_at: "2026-01-01T00:00:00+00:00".to_string(),
            tool: "kira-pathmap/test".to_string(),
            resolved_path: store.pathway_cache_path(&organism, omics).to_string(),
        };
        Store::write_metadata(&store.pathway_metadata_path(&organism, omics), &metadata).unwrap();
    }

    let listed = store.list_pathway_metadata().unwrap();
    let keys: Vec<(&str, OmicsType)> = listed
        .iter()
        .map(|entry| (entry.organism.as_str(), entry.omics))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("Homo sapiens", OmicsType::Metabolomics),
            ("Homo sapiens", OmicsType::Proteomics),
            ("Mus musculus", OmicsType::Metabolomics),
        ]
    );

    store.clear_cache().unwrap();
    assert!(store.list_pathway_metadata().unwrap().is_empty());
}
