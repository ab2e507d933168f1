use std::collections::HashMap;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::conversion::{ConversionRecord, ConversionTable, MatchFlag};
use crate::domain::{CompoundName, InputType};
use crate::error::KiraError;

pub const METABOANALYST_MAPPING_URL: &str = "https://www.xialab.ca/api/mapcompounds";

pub trait NameResolver {
    fn resolve(
        &self,
        names: &[CompoundName],
        input_type: InputType,
    ) -> Result<ConversionTable, KiraError>;
}

/// Resolves `names` and checks the service answered every query.
///
/// Any service failure is returned as-is; a table is never assembled from a
/// partial answer.
pub fn build_conversion_table<R: NameResolver + ?Sized>(
    resolver: &R,
    names: &[CompoundName],
    input_type: InputType,
) -> Result<ConversionTable, KiraError> {
    if names.is_empty() {
        return Err(KiraError::EmptyQuery);
    }
    let table = resolver.resolve(names, input_type)?;
    if table.len() != names.len() {
        return Err(KiraError::ResolutionFailure(format!(
            "expected {} records, service returned {}",
            names.len(),
            table.len()
        )));
    }
    let confirmed = table
        .records()
        .iter()
        .filter(|record| record.flag.is_confirmed())
        .count();
    info!(
        queries = names.len(),
        confirmed,
        input_type = %input_type,
        "built conversion table"
    );
    Ok(table)
}

#[derive(Clone)]
pub struct MetaboAnalystClient {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct MappingRequest {
    #[serde(rename = "queryList")]
    query_list: String,
    #[serde(rename = "inputType")]
    input_type: String,
}

impl MetaboAnalystClient {
    pub fn new() -> Result<Self, KiraError> {
        Self::with_endpoint(METABOANALYST_MAPPING_URL)
    }

    pub fn with_endpoint(endpoint: &str) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-pathmap/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::ResolutionHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| KiraError::ResolutionHttp(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, KiraError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "name mapping request failed".to_string());
        Err(KiraError::ResolutionStatus { status, message })
    }
}

impl NameResolver for MetaboAnalystClient {
    fn resolve(
        &self,
        names: &[CompoundName],
        input_type: InputType,
    ) -> Result<ConversionTable, KiraError> {
        let request = MappingRequest {
            query_list: names.iter().map(|name| format!("{name};")).collect(),
            input_type: input_type.as_str().to_string(),
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|err| KiraError::ResolutionHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let raw: Value = response
            .json()
            .map_err(|err| KiraError::ResolutionHttp(err.to_string()))?;
        parse_mapping_response(&raw, names)
    }
}

pub fn parse_mapping_response(
    raw: &Value,
    names: &[CompoundName],
) -> Result<ConversionTable, KiraError> {
    let column = |key: &str| -> Result<Vec<Option<String>>, KiraError> {
        let values = raw
            .get(key)
            .and_then(|v| v.as_array())
            .ok_or_else(|| KiraError::ResolutionFailure(format!("response has no {key} column")))?;
        Ok(values.iter().map(cell_text).collect())
    };

    let queries = column("Query")?;
    let chebi = column("ChEBI")?;
    let comments = column("Comment")?;
    if queries.is_empty() {
        return Err(KiraError::ResolutionFailure(
            "service returned no data".to_string(),
        ));
    }
    if chebi.len() != queries.len() || comments.len() != queries.len() {
        return Err(KiraError::ResolutionFailure(
            "response columns have different lengths".to_string(),
        ));
    }

    if queries.len() != names.len() {
        return Err(KiraError::ResolutionFailure(format!(
            "sent {} queries, service answered {}",
            names.len(),
            queries.len()
        )));
    }

    let records = names
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let echoed = queries[idx].as_deref().unwrap_or_default();
            if !echoed.trim().eq_ignore_ascii_case(name.as_str()) {
                return Err(KiraError::ResolutionFailure(format!(
                    "response row {idx} echoes {echoed:?}, expected {name:?}"
                )));
            }
            let flag = comments[idx]
                .as_deref()
                .map(MatchFlag::parse)
                .unwrap_or(MatchFlag::Unmatched);
            Ok(ConversionRecord::new(name.clone(), chebi[idx].clone(), flag))
        })
        .collect::<Result<Vec<_>, KiraError>>()?;

    Ok(ConversionTable::new(records))
}

fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) if text.eq_ignore_ascii_case("na") || text.is_empty() => None,
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct TableResolver {
    records: HashMap<CompoundName, ConversionRecord>,
}

impl TableResolver {
    pub fn new(table: &ConversionTable) -> Self {
        let mut records = HashMap::new();
        for record in table.records() {
            records
                .entry(record.query.clone())
                .or_insert_with(|| record.clone());
        }
        Self { records }
    }
}

impl NameResolver for TableResolver {
    fn resolve(
        &self,
        names: &[CompoundName],
        _input_type: InputType,
    ) -> Result<ConversionTable, KiraError> {
        let records = names
            .iter()
            .map(|name| {
                self.records.get(name).cloned().unwrap_or_else(|| {
                    ConversionRecord::new(name.clone(), None, MatchFlag::Unmatched)
                })
            })
            .collect();
        Ok(ConversionTable::new(records))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn names(values: &[&str]) -> Vec<CompoundName> {
        values.iter().map(|v| v.parse().unwrap()).collect()
    }

    #[test]
    fn parse_response_in_query_order() {
        let raw = json!({
            "Query": ["glucose", "lactate", "unknownXYZ"],
            "Match": ["D-Glucose", "L-Lactic acid", "NA"],
            "ChEBI": ["17234", "422", "NA"],
            "Comment": ["1", "1", "0"]
        });
        let table =
            parse_mapping_response(&raw, &names(&["glucose", "lactate", "unknownXYZ"])).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.records()[0].resolved.as_deref(), Some("17234"));
        assert_eq!(table.records()[2].resolved, None);
        assert_eq!(table.records()[2].flag, MatchFlag::Unmatched);
    }

    #[test]
    fn parse_response_numeric_cells() {
        let raw = json!({
            "Query": ["glucose"],
            "ChEBI": [17234],
            "Comment": [1]
        });
        let table = parse_mapping_response(&raw, &names(&["glucose"])).unwrap();
        assert_eq!(table.records()[0].resolved.as_deref(), Some("17234"));
        assert!(table.records()[0].flag.is_confirmed());
    }

    #[test]
    fn parse_response_without_data_fails() {
        let raw = json!({ "error": "bad request" });
        let err = parse_mapping_response(&raw, &names(&["glucose"])).unwrap_err();
        assert_matches!(err, KiraError::ResolutionFailure(_));

        let raw = json!({ "Query": [], "ChEBI": [], "Comment": [] });
        let err = parse_mapping_response(&raw, &names(&["glucose"])).unwrap_err();
        assert_matches!(err, KiraError::ResolutionFailure(_));
    }

    #[test]
    fn build_rejects_empty_input() {
        let resolver = TableResolver::new(&ConversionTable::default());
        let err = build_conversion_table(&resolver, &[], InputType::Name).unwrap_err();
        assert_matches!(err, KiraError::EmptyQuery);
    }

    #[test]
    fn table_resolver_answers_unknown_as_unmatched() {
        let stored = ConversionTable::new(vec![ConversionRecord::new(
            "glucose".parse().unwrap(),
            Some("17234".to_string()),
            MatchFlag::Exact,
        )]);
        let resolver = TableResolver::new(&stored);
        let table =
            build_conversion_table(&resolver, &names(&["glucose", "glucose", "x"]), InputType::Name)
                .unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.records()[1].resolved.as_deref(), Some("17234"));
        assert_eq!(table.records()[2].flag, MatchFlag::Unmatched);
    }

    #[test]
    #[ignore]
    fn resolve_real_names() {
        let client = MetaboAnalystClient::new().unwrap();
        let table =
            build_conversion_table(&client, &names(&["glucose", "lactate"]), InputType::Name)
                .unwrap();
        assert!(table.records().iter().any(|r| r.flag.is_confirmed()));
    }
}
