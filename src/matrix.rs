use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::hash::Hash;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use serde::Serialize;

use crate::domain::SampleId;
use crate::error::KiraError;

const MISSING_TOKENS: [&str; 6] = ["", "na", "nan", "null", "none", "n/a"];

pub trait ColumnKey: Clone + Eq + Hash + fmt::Display {}

impl<T: Clone + Eq + Hash + fmt::Display> ColumnKey for T {}

#[derive(Debug, Clone, PartialEq)]
pub struct AbundanceMatrix<K> {
    samples: Vec<SampleId>,
    columns: Vec<K>,
    values: Vec<Vec<Option<f64>>>,
}

impl<K> Default for AbundanceMatrix<K> {
    fn default() -> Self {
        Self {
            samples: Vec::new(),
            columns: Vec::new(),
            values: Vec::new(),
        }
    }
}

impl<K: ColumnKey> AbundanceMatrix<K> {
    pub fn new(
        samples: Vec<SampleId>,
        columns: Vec<K>,
        values: Vec<Vec<Option<f64>>>,
    ) -> Result<Self, KiraError> {
        if values.len() != samples.len() {
            return Err(KiraError::ShapeMismatch {
                expected: samples.len(),
                found: values.len(),
            });
        }
        if let Some(row) = values.iter().find(|row| row.len() != columns.len()) {
            return Err(KiraError::ShapeMismatch {
                expected: columns.len(),
                found: row.len(),
            });
        }
        let mut seen = HashSet::with_capacity(samples.len());
        for sample in &samples {
            if !seen.insert(sample) {
                return Err(KiraError::DuplicateSample(sample.to_string()));
            }
        }
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column) {
                return Err(KiraError::DuplicateColumn(column.to_string()));
            }
        }
        Ok(Self {
            samples,
            columns,
            values,
        })
    }

    pub fn samples(&self) -> &[SampleId] {
        &self.samples
    }

    pub fn columns(&self) -> &[K] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Option<f64>>] {
        &self.values
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, key: &K) -> Option<usize> {
        self.columns.iter().position(|column| column == key)
    }

    pub fn get(&self, sample: &SampleId, column: &K) -> Option<f64> {
        let row = self.samples.iter().position(|s| s == sample)?;
        let col = self.column_index(column)?;
        self.values[row][col]
    }

    pub fn column_values(&self, index: usize) -> Vec<Option<f64>> {
        self.values.iter().map(|row| row[index]).collect()
    }

    pub fn try_map_columns<L, F>(self, mut map: F) -> Result<AbundanceMatrix<L>, KiraError>
    where
        L: ColumnKey,
        F: FnMut(&K) -> Result<L, KiraError>,
    {
        let columns = self
            .columns
            .iter()
            .map(&mut map)
            .collect::<Result<Vec<_>, KiraError>>()?;
        AbundanceMatrix::new(self.samples, columns, self.values)
    }

    pub fn select_samples(&self, keep: &HashSet<&SampleId>) -> Self {
        let (samples, values) = self
            .samples
            .iter()
            .zip(&self.values)
            .filter(|(sample, _)| keep.contains(sample))
            .map(|(sample, row)| (sample.clone(), row.clone()))
            .unzip();
        Self {
            samples,
            columns: self.columns.clone(),
            values,
        }
    }

    /// Per-column z-scores using the population standard deviation. Missing
    /// cells are ignored for the statistics and stay missing; constant
    /// columns become zero.
    pub fn standardized(&self) -> Self {
        let mut values = self.values.clone();
        for col in 0..self.columns.len() {
            let present: Vec<f64> = self.values.iter().filter_map(|row| row[col]).collect();
            if present.is_empty() {
                continue;
            }
            let n = present.len() as f64;
            let mean = present.iter().sum::<f64>() / n;
            let variance = present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let scale = if variance > 0.0 { variance.sqrt() } else { 1.0 };
            for row in values.iter_mut() {
                if let Some(value) = row[col].as_mut() {
                    *value = (*value - mean) / scale;
                }
            }
        }
        Self {
            samples: self.samples.clone(),
            columns: self.columns.clone(),
            values,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SampleMetadata {
    samples: Vec<SampleId>,
    columns: Vec<String>,
    values: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Labels {
    pub levels: Vec<String>,
    pub codes: Vec<usize>,
}

impl SampleMetadata {
    pub fn from_column(column: &str, samples: Vec<SampleId>, values: Vec<String>) -> Result<Self, KiraError> {
        if values.len() != samples.len() {
            return Err(KiraError::ShapeMismatch {
                expected: samples.len(),
                found: values.len(),
            });
        }
        Ok(Self {
            samples,
            columns: vec![column.to_string()],
            values: values.into_iter().map(|value| vec![value]).collect(),
        })
    }

    pub fn samples(&self) -> &[SampleId] {
        &self.samples
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.values.iter().map(|row| row[idx].as_str()).collect())
    }

    pub fn select_samples(&self, keep: &HashSet<&SampleId>) -> Self {
        let (samples, values) = self
            .samples
            .iter()
            .zip(&self.values)
            .filter(|(sample, _)| keep.contains(sample))
            .map(|(sample, row)| (sample.clone(), row.clone()))
            .unzip();
        Self {
            samples,
            columns: self.columns.clone(),
            values,
        }
    }

    pub fn factorize(&self, column: &str) -> Result<Labels, KiraError> {
        let values = self
            .column(column)
            .ok_or_else(|| KiraError::MissingColumn(column.to_string()))?;
        let mut levels: Vec<String> = Vec::new();
        let mut index = HashMap::new();
        let codes = values
            .into_iter()
            .map(|value| {
                *index.entry(value).or_insert_with(|| {
                    levels.push(value.to_string());
                    levels.len() - 1
                })
            })
            .collect();
        Ok(Labels { levels, codes })
    }
}

#[derive(Debug, Clone)]
pub struct TableLayout {
    pub delimiter: u8,
    pub sample_column: Option<String>,
    pub metadata_columns: Vec<String>,
}

impl Default for TableLayout {
    fn default() -> Self {
        Self {
            delimiter: b',',
            sample_column: None,
            metadata_columns: Vec::new(),
        }
    }
}

impl TableLayout {
    pub fn for_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let name = name.strip_suffix(".gz").unwrap_or(&name);
        let delimiter = if name.ends_with(".tsv") || name.ends_with(".txt") {
            b'\t'
        } else {
            b','
        };
        Self {
            delimiter,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct OmicsTable {
    pub matrix: AbundanceMatrix<String>,
    pub metadata: SampleMetadata,
}

pub fn read_table(path: &Path, layout: &TableLayout) -> Result<OmicsTable, KiraError> {
    let file = File::open(path).map_err(|err| KiraError::TableRead {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    let is_gzip = path.extension().map(|ext| ext == "gz").unwrap_or(false);
    if is_gzip {
        read_table_from(GzDecoder::new(BufReader::new(file)), layout, path)
    } else {
        read_table_from(BufReader::new(file), layout, path)
    }
}

pub fn read_table_from<R: Read>(
    reader: R,
    layout: &TableLayout,
    source: &Path,
) -> Result<OmicsTable, KiraError> {
    let read_err = |message: String| KiraError::TableRead {
        path: source.to_path_buf(),
        message,
    };
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(layout.delimiter)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader
        .headers()
        .map_err(|err| read_err(err.to_string()))?
        .clone();

    let sample_idx = match &layout.sample_column {
        Some(name) => headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| KiraError::MissingColumn(name.clone()))?,
        None if headers.is_empty() => return Err(read_err("table has no header".to_string())),
        None => 0,
    };
    let metadata_idx = layout
        .metadata_columns
        .iter()
        .map(|name| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| KiraError::MissingColumn(name.clone()))
        })
        .collect::<Result<Vec<_>, KiraError>>()?;
    let value_idx: Vec<usize> = (0..headers.len())
        .filter(|idx| *idx != sample_idx && !metadata_idx.contains(idx))
        .collect();
    let columns: Vec<String> = value_idx.iter().map(|idx| headers[*idx].to_string()).collect();

    let mut samples = Vec::new();
    let mut values = Vec::new();
    let mut metadata_values = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| read_err(err.to_string()))?;
        let sample: SampleId = record[sample_idx].parse()?;
        let row = value_idx
            .iter()
            .map(|idx| {
                parse_cell(&record[*idx]).ok_or_else(|| KiraError::MalformedValue {
                    sample: sample.to_string(),
                    column: headers[*idx].to_string(),
                    value: record[*idx].to_string(),
                })
            })
            .collect::<Result<Vec<_>, KiraError>>()?;
        metadata_values.push(
            metadata_idx
                .iter()
                .map(|idx| record[*idx].to_string())
                .collect::<Vec<_>>(),
        );
        values.push(row);
        samples.push(sample);
    }

    let matrix = AbundanceMatrix::new(samples.clone(), columns, values)?;
    let metadata = SampleMetadata {
        samples,
        columns: layout.metadata_columns.clone(),
        values: metadata_values,
    };
    Ok(OmicsTable { matrix, metadata })
}

/// `Some(None)` for a missing cell, `None` for text that is not a number.
fn parse_cell(raw: &str) -> Option<Option<f64>> {
    let lowered = raw.to_lowercase();
    if MISSING_TOKENS.contains(&lowered.as_str()) {
        return Some(None);
    }
    let value = raw.parse::<f64>().ok()?;
    if value.is_nan() {
        return Some(None);
    }
    value.is_finite().then_some(Some(value))
}

pub fn write_table<W: Write, K: ColumnKey>(
    writer: W,
    matrix: &AbundanceMatrix<K>,
    metadata: Option<&SampleMetadata>,
    layout: &TableLayout,
) -> Result<(), KiraError> {
    let write_err = |err: csv::Error| KiraError::Filesystem(err.to_string());
    let mut writer = csv::WriterBuilder::new()
        .delimiter(layout.delimiter)
        .from_writer(writer);

    let metadata = metadata.filter(|meta| !meta.is_empty());
    let metadata_rows: HashMap<&SampleId, &Vec<String>> = metadata
        .map(|meta| meta.samples.iter().zip(&meta.values).collect())
        .unwrap_or_default();

    let mut header = vec![
        layout
            .sample_column
            .clone()
            .unwrap_or_else(|| "sample".to_string()),
    ];
    if let Some(meta) = metadata {
        header.extend(meta.columns.iter().cloned());
    }
    header.extend(matrix.columns().iter().map(|c| c.to_string()));
    writer.write_record(&header).map_err(write_err)?;

    for (sample, row) in matrix.samples().iter().zip(matrix.rows()) {
        let mut record = vec![sample.to_string()];
        if let Some(meta) = metadata {
            match metadata_rows.get(sample) {
                Some(values) => record.extend(values.iter().cloned()),
                None => record.extend(meta.columns.iter().map(|_| String::new())),
            }
        }
        record.extend(
            row.iter()
                .map(|cell| cell.map(|v| v.to_string()).unwrap_or_default()),
        );
        writer.write_record(&record).map_err(write_err)?;
    }
    writer
        .flush()
        .map_err(|err| KiraError::Filesystem(err.to_string()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn sid(value: &str) -> SampleId {
        value.parse().unwrap()
    }

    const TABLE: &str = "\
sample,Group,glucose,lactate
S1,case,1.5,NA
S2,control,2.5,4
S3,case,,6
";

    fn layout() -> TableLayout {
        TableLayout {
            metadata_columns: vec!["Group".to_string()],
            ..TableLayout::default()
        }
    }

    #[test]
    fn read_splits_metadata_and_missing_values() {
        let table = read_table_from(TABLE.as_bytes(), &layout(), Path::new("mem.csv")).unwrap();
        assert_eq!(table.matrix.columns(), &["glucose", "lactate"]);
        assert_eq!(table.matrix.n_samples(), 3);
        assert_eq!(table.matrix.get(&sid("S1"), &"lactate".to_string()), None);
        assert_eq!(table.matrix.get(&sid("S2"), &"lactate".to_string()), Some(4.0));
        assert_eq!(table.matrix.rows()[2][0], None);
        assert_eq!(
            table.metadata.column("Group").unwrap(),
            vec!["case", "control", "case"]
        );
    }

    #[test]
    fn read_rejects_text_values() {
        let raw = "sample,glucose\nS1,high\n";
        let err = read_table_from(raw.as_bytes(), &TableLayout::default(), Path::new("mem.csv"))
            .unwrap_err();
        assert_matches!(err, KiraError::MalformedValue { .. });
    }

    #[test]
    fn read_rejects_infinite_values() {
        for raw in ["sample,glucose\nS1,inf\n", "sample,glucose\nS1,-Infinity\n"] {
            let err = read_table_from(raw.as_bytes(), &TableLayout::default(), Path::new("mem.csv"))
                .unwrap_err();
            assert_matches!(err, KiraError::MalformedValue { .. });
        }
    }

    #[test]
    fn read_rejects_duplicate_samples() {
        let raw = "sample,glucose\nS1,1\nS1,2\n";
        let err = read_table_from(raw.as_bytes(), &TableLayout::default(), Path::new("mem.csv"))
            .unwrap_err();
        assert_matches!(err, KiraError::DuplicateSample(_));
    }

    #[test]
    fn named_sample_column() {
        let raw = "glucose\tid\n1\tA\n2\tB\n";
        let layout = TableLayout {
            delimiter: b'\t',
            sample_column: Some("id".to_string()),
            metadata_columns: Vec::new(),
        };
        let table = read_table_from(raw.as_bytes(), &layout, Path::new("mem.tsv")).unwrap();
        assert_eq!(table.matrix.samples(), &[sid("A"), sid("B")]);
        assert_eq!(table.matrix.columns(), &["glucose"]);
    }

    #[test]
    fn write_then_read_preserves_layout() {
        let table = read_table_from(TABLE.as_bytes(), &layout(), Path::new("mem.csv")).unwrap();
        let mut buffer = Vec::new();
        write_table(&mut buffer, &table.matrix, Some(&table.metadata), &layout()).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.starts_with("sample,Group,glucose,lactate\nS1,case,1.5,\n"));
    }

    #[test]
    fn standardized_columns() {
        let matrix = AbundanceMatrix::new(
            vec![sid("A"), sid("B"), sid("C")],
            vec!["x", "flat"],
            vec![
                vec![Some(1.0), Some(5.0)],
                vec![Some(3.0), Some(5.0)],
                vec![None, Some(5.0)],
            ],
        )
        .unwrap();
        let scaled = matrix.standardized();
        assert_eq!(scaled.column_values(0), vec![Some(-1.0), Some(1.0), None]);
        assert_eq!(scaled.column_values(1), vec![Some(0.0); 3]);
    }

    #[test]
    fn factorize_in_order_of_appearance() {
        let table = read_table_from(TABLE.as_bytes(), &layout(), Path::new("mem.csv")).unwrap();
        let labels = table.metadata.factorize("Group").unwrap();
        assert_eq!(labels.levels, vec!["case", "control"]);
        assert_eq!(labels.codes, vec![0, 1, 0]);
        assert_matches!(
            table.metadata.factorize("Sex"),
            Err(KiraError::MissingColumn(_))
        );
    }
}
