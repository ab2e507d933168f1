use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

static UNIPROT_ACCESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([OPQ][0-9][A-Z0-9]{3}[0-9]|[A-NR-Z][0-9]([A-Z][A-Z0-9]{2}[0-9]){1,2})(-[0-9]+)?$",
    )
    .expect("valid UniProt accession pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OmicsType {
    Metabolomics,
    Proteomics,
}

impl OmicsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OmicsType::Metabolomics => "metabolomics",
            OmicsType::Proteomics => "proteomics",
        }
    }
}

impl fmt::Display for OmicsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OmicsType {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "metabolomics" | "metabolite" | "metabolites" => Ok(OmicsType::Metabolomics),
            "proteomics" | "protein" | "proteins" => Ok(OmicsType::Proteomics),
            _ => Err(KiraError::InvalidLayerSpecifier(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    #[default]
    Name,
    Hmdb,
    Kegg,
    Pubchem,
    Chebi,
    Metlin,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Name => "name",
            InputType::Hmdb => "hmdb",
            InputType::Kegg => "kegg",
            InputType::Pubchem => "pubchem",
            InputType::Chebi => "chebi",
            InputType::Metlin => "metlin",
        }
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputType {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "name" => Ok(InputType::Name),
            "hmdb" => Ok(InputType::Hmdb),
            "kegg" => Ok(InputType::Kegg),
            "pubchem" => Ok(InputType::Pubchem),
            "chebi" => Ok(InputType::Chebi),
            "metlin" => Ok(InputType::Metlin),
            _ => Err(KiraError::InvalidInputType(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CompoundName(String);

impl CompoundName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CompoundName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CompoundName {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(KiraError::InvalidCompoundName(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for CompoundName {
    type Error = KiraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CompoundName> for String {
    fn from(value: CompoundName) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct ChebiId(u64);

impl ChebiId {
    pub fn new(value: u64) -> Result<Self, KiraError> {
        if value == 0 {
            return Err(KiraError::InvalidChebiId(value.to_string()));
        }
        Ok(Self(value))
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    pub fn coerce(value: &str) -> Option<Self> {
        value.parse().ok()
    }
}

impl fmt::Display for ChebiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChebiId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let digits = match trimmed.get(..6) {
            Some(prefix) if prefix.eq_ignore_ascii_case("chebi:") => &trimmed[6..],
            _ => trimmed,
        };
        let invalid = || KiraError::InvalidChebiId(value.to_string());

        // Spreadsheet round trips render integer ids as `17234.0`.
        let integral = match digits.split_once('.') {
            Some((whole, zeros)) if !zeros.is_empty() && zeros.bytes().all(|b| b == b'0') => whole,
            Some(_) => return Err(invalid()),
            None => digits,
        };
        if integral.is_empty() || !integral.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let number = integral.parse::<u64>().map_err(|_| invalid())?;
        Self::new(number).map_err(|_| invalid())
    }
}

impl TryFrom<u64> for ChebiId {
    type Error = KiraError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChebiId> for u64 {
    fn from(value: ChebiId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UniprotAccession(String);

impl UniprotAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UniprotAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UniprotAccession {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !UNIPROT_ACCESSION.is_match(&normalized) {
            return Err(KiraError::InvalidUniprotAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for UniprotAccession {
    type Error = KiraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UniprotAccession> for String {
    fn from(value: UniprotAccession) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MoleculeId {
    Chebi(ChebiId),
    Uniprot(UniprotAccession),
}

impl MoleculeId {
    pub fn omics_type(&self) -> OmicsType {
        match self {
            MoleculeId::Chebi(_) => OmicsType::Metabolomics,
            MoleculeId::Uniprot(_) => OmicsType::Proteomics,
        }
    }

    pub fn parse_as(value: &str, omics: OmicsType) -> Result<Self, KiraError> {
        match omics {
            OmicsType::Metabolomics => Ok(MoleculeId::Chebi(value.parse()?)),
            OmicsType::Proteomics => Ok(MoleculeId::Uniprot(value.parse()?)),
        }
    }
}

impl fmt::Display for MoleculeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoleculeId::Chebi(id) => write!(f, "{id}"),
            MoleculeId::Uniprot(acc) => write!(f, "{acc}"),
        }
    }
}

impl FromStr for MoleculeId {
    type Err = KiraError;

    /// Bare numbers and `CHEBI:` prefixes are ChEBI ids, everything else must
    /// be a UniProt accession.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = value.parse::<ChebiId>() {
            return Ok(MoleculeId::Chebi(id));
        }
        Ok(MoleculeId::Uniprot(value.parse()?))
    }
}

impl TryFrom<String> for MoleculeId {
    type Error = KiraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MoleculeId> for String {
    fn from(value: MoleculeId) -> Self {
        value.to_string()
    }
}

impl From<ChebiId> for MoleculeId {
    fn from(value: ChebiId) -> Self {
        MoleculeId::Chebi(value)
    }
}

impl From<UniprotAccession> for MoleculeId {
    fn from(value: UniprotAccession) -> Self {
        MoleculeId::Uniprot(value)
    }
}

macro_rules! text_id {
    ($name:ident, $err:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = KiraError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Err(KiraError::$err(value.to_string()));
                }
                Ok(Self(trimmed.to_string()))
            }
        }

        impl TryFrom<String> for $name {
            type Error = KiraError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

text_id!(SampleId, InvalidSampleId);
text_id!(PathwayId, InvalidPathwayId);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Organism(String);

impl Organism {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, species: &str) -> bool {
        species
            .split_whitespace()
            .map(str::to_ascii_lowercase)
            .eq(self.0.split_whitespace().map(str::to_ascii_lowercase))
    }

    pub fn slug(&self) -> String {
        self.0
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl Default for Organism {
    fn default() -> Self {
        Self("Homo sapiens".to_string())
    }
}

impl fmt::Display for Organism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Organism {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
        let is_valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, ' ' | '.' | '-' | '_'));
        if !is_valid {
            return Err(KiraError::InvalidOrganism(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for Organism {
    type Error = KiraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Organism> for String {
    fn from(value: Organism) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_chebi_variants() {
        assert_eq!("17234".parse::<ChebiId>().unwrap().get(), 17234);
        assert_eq!("CHEBI:422".parse::<ChebiId>().unwrap().get(), 422);
        assert_eq!("chebi:422".parse::<ChebiId>().unwrap().get(), 422);
        assert_eq!("17234.0".parse::<ChebiId>().unwrap().get(), 17234);
    }

    #[test]
    fn parse_chebi_invalid() {
        for raw in ["", "0", "-5", "12.5", "NA", "nan", "inf", "CHEBI:", "abc", "1e3", "+7", ".0"] {
            let err = raw.parse::<ChebiId>().unwrap_err();
            assert_matches!(err, KiraError::InvalidChebiId(_));
        }
        assert_eq!(ChebiId::coerce("None"), None);
    }

    #[test]
    fn parse_uniprot_accession() {
        let acc: UniprotAccession = "p69905".parse().unwrap();
        assert_eq!(acc.as_str(), "P69905");
        assert!("A0A024RBG1".parse::<UniprotAccession>().is_ok());
        assert!("P69905-2".parse::<UniprotAccession>().is_ok());
        let err = "glucose".parse::<UniprotAccession>().unwrap_err();
        assert_matches!(err, KiraError::InvalidUniprotAccession(_));
    }

    #[test]
    fn molecule_id_routing() {
        assert_matches!("CHEBI:17234".parse::<MoleculeId>().unwrap(), MoleculeId::Chebi(_));
        assert_matches!("P69905".parse::<MoleculeId>().unwrap(), MoleculeId::Uniprot(_));
        assert_matches!(
            MoleculeId::parse_as("P69905", OmicsType::Metabolomics),
            Err(KiraError::InvalidChebiId(_))
        );
    }

    #[test]
    fn organism_slug() {
        let organism: Organism = "  Homo   sapiens ".parse().unwrap();
        assert_eq!(organism.as_str(), "Homo sapiens");
        assert_eq!(organism.slug(), "homo_sapiens");
        assert!(organism.matches("homo sapiens"));
        assert!(!organism.matches("Homo sapiens neanderthalensis"));
        assert!("../etc".parse::<Organism>().is_err());
    }

    #[test]
    fn compound_name_rejects_blank() {
        let err = "   ".parse::<CompoundName>().unwrap_err();
        assert_matches!(err, KiraError::InvalidCompoundName(_));
    }
}
