use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{ChebiId, CompoundName};
use crate::error::KiraError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum MatchFlag {
    Exact,
    Approximate,
    Unmatched,
    Other(String),
}

impl MatchFlag {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "1" | "1.0" => MatchFlag::Exact,
            "2" | "2.0" => MatchFlag::Approximate,
            "0" | "0.0" | "" => MatchFlag::Unmatched,
            other => MatchFlag::Other(other.to_string()),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, MatchFlag::Exact)
    }
}

impl fmt::Display for MatchFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchFlag::Exact => f.write_str("1"),
            MatchFlag::Approximate => f.write_str("2"),
            MatchFlag::Unmatched => f.write_str("0"),
            MatchFlag::Other(value) => f.write_str(value),
        }
    }
}

impl From<String> for MatchFlag {
    fn from(value: String) -> Self {
        MatchFlag::parse(&value)
    }
}

impl From<MatchFlag> for String {
    fn from(value: MatchFlag) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionRecord {
    pub query: CompoundName,
    pub resolved: Option<String>,
    pub flag: MatchFlag,
}

impl ConversionRecord {
    pub fn new(query: CompoundName, resolved: Option<String>, flag: MatchFlag) -> Self {
        let resolved = resolved
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Self {
            query,
            resolved,
            flag,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversionTable {
    records: Vec<ConversionRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    query: String,
    chebi: Option<String>,
    comment: String,
}

impl ConversionTable {
    pub fn new(records: Vec<ConversionRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[ConversionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn read_csv<R: Read>(reader: R) -> Result<Self, KiraError> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut records = Vec::new();
        for row in reader.deserialize::<CsvRow>() {
            let row = row.map_err(|err| KiraError::ConversionParse(err.to_string()))?;
            records.push(ConversionRecord::new(
                row.query.parse()?,
                row.chebi,
                MatchFlag::parse(&row.comment),
            ));
        }
        Ok(Self { records })
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), KiraError> {
        let mut writer = csv::Writer::from_writer(writer);
        for record in &self.records {
            writer
                .serialize(CsvRow {
                    query: record.query.to_string(),
                    chebi: record.resolved.clone(),
                    comment: record.flag.to_string(),
                })
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        writer
            .flush()
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedRecord {
    pub query: CompoundName,
    pub chebi: ChebiId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizedTable {
    records: Vec<NormalizedRecord>,
    malformed: usize,
    unconfirmed: usize,
}

impl NormalizedTable {
    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn malformed(&self) -> usize {
        self.malformed
    }

    pub fn unconfirmed(&self) -> usize {
        self.unconfirmed
    }

    /// Name to id lookup. When a query appears more than once the first
    /// record wins.
    pub fn lookup(&self) -> HashMap<&CompoundName, ChebiId> {
        let mut lookup = HashMap::with_capacity(self.records.len());
        for record in &self.records {
            if let Some(existing) = lookup.get(&record.query) {
                if *existing != record.chebi {
                    debug!(
                        query = %record.query,
                        kept = %existing,
                        ignored = %record.chebi,
                        "duplicate conversion record ignored"
                    );
                }
                continue;
            }
            lookup.insert(&record.query, record.chebi);
        }
        lookup
    }
}

pub fn normalize(table: &ConversionTable) -> NormalizedTable {
    let mut normalized = NormalizedTable::default();
    for record in table.records() {
        let chebi = record.resolved.as_deref().and_then(ChebiId::coerce);
        match chebi {
            None => {
                if record.resolved.is_some() {
                    normalized.malformed += 1;
                }
            }
            Some(_) if !record.flag.is_confirmed() => normalized.unconfirmed += 1,
            Some(chebi) => normalized.records.push(NormalizedRecord {
                query: record.query.clone(),
                chebi,
            }),
        }
    }
    debug!(
        kept = normalized.records.len(),
        malformed = normalized.malformed,
        unconfirmed = normalized.unconfirmed,
        dropped = table.len() - normalized.records.len(),
        "normalised conversion table"
    );
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(query: &str, resolved: Option<&str>, flag: &str) -> ConversionRecord {
        ConversionRecord::new(
            query.parse().unwrap(),
            resolved.map(str::to_string),
            MatchFlag::parse(flag),
        )
    }

    #[test]
    fn normalize_drops_null_malformed_and_unconfirmed() {
        let table = ConversionTable::new(vec![
            record("glucose", Some("17234"), "1"),
            record("lactate", Some("CHEBI:422"), "1"),
            record("unknownXYZ", None, "0"),
            record("broken", Some("NA"), "1"),
            record("negative", Some("-3"), "1"),
            record("fuzzy", Some("1234"), "2"),
        ]);

        let normalized = normalize(&table);
        let ids: Vec<u64> = normalized.records().iter().map(|r| r.chebi.get()).collect();
        assert_eq!(ids, vec![17234, 422]);
        assert_eq!(normalized.malformed(), 2);
        assert_eq!(normalized.unconfirmed(), 1);
        assert!(normalized.records().iter().all(|r| r.chebi.get() > 0));
    }

    #[test]
    fn lookup_keeps_first_duplicate() {
        let table = ConversionTable::new(vec![
            record("glucose", Some("17234"), "1"),
            record("glucose", Some("4167"), "1"),
        ]);
        let normalized = normalize(&table);
        let lookup = normalized.lookup();
        let name: CompoundName = "glucose".parse().unwrap();
        assert_eq!(lookup.get(&name).map(|id| id.get()), Some(17234));
    }

    #[test]
    fn csv_round_trip_keeps_nulls() {
        let table = ConversionTable::new(vec![
            record("glucose", Some("17234"), "1"),
            record("unknownXYZ", None, "0"),
        ]);
        let mut buffer = Vec::new();
        table.write_csv(&mut buffer).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with("query,chebi,comment\n"));

        let parsed = ConversionTable::read_csv(buffer.as_slice()).unwrap();
        assert_eq!(parsed, table);
    }
}
