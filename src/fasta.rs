use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::mass::{mass_bounds, H2O};

/// Header format family a FASTA record was classified as.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DatabaseType {
    UniProt,
    NCBI,
    Generic,
    Unknown,
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseType::UniProt => f.write_str("UniProt"),
            DatabaseType::NCBI => f.write_str("NCBI"),
            DatabaseType::Generic => f.write_str("Generic"),
            DatabaseType::Unknown => f.write_str("Unknown"),
        }
    }
}

fn uniprot_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^>(?:sp|tr)\|([^|\s]+)\|\S*\s*(.*)$").unwrap())
}

fn ncbi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^>gi\|([^|\s]+)(?:\|\S*)?\s*(.*)$").unwrap())
}

fn taxonomy_os_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"OS=(.+?)(?:\s+[A-Z]{2}=|$)").unwrap())
}

fn taxonomy_bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\[\]]+)\]\s*$").unwrap())
}

/// A parsed `>` header line. The raw line is kept verbatim so the file can
/// be rewritten (e.g. when appending decoys) without losing formatting.
#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    pub raw: String,
    pub accession: String,
    pub description: String,
    pub taxonomy: Option<String>,
    pub database_type: DatabaseType,
}

impl Header {
    /// Parse a raw header line. Fails on anything that does not start with
    /// `>` or that yields no accession.
    pub fn parse(line: &str) -> Result<Header, HeaderError> {
        let line = line.trim_end();
        if !line.starts_with('>') {
            return Err(HeaderError::NotAHeader(line.to_string()));
        }

        if let Some(caps) = uniprot_re().captures(line) {
            let description = caps.get(2).map(|m| m.as_str()).unwrap_or("").to_string();
            let taxonomy = taxonomy_os_re()
                .captures(&description)
                .map(|c| c[1].trim().to_string());
            return Ok(Header {
                raw: line.to_string(),
                accession: caps[1].to_string(),
                description,
                taxonomy,
                database_type: DatabaseType::UniProt,
            });
        }

        if let Some(caps) = ncbi_re().captures(line) {
            let description = caps.get(2).map(|m| m.as_str()).unwrap_or("").to_string();
            let taxonomy = taxonomy_bracket_re()
                .captures(&description)
                .map(|c| c[1].trim().to_string());
            return Ok(Header {
                raw: line.to_string(),
                accession: caps[1].to_string(),
                description,
                taxonomy,
                database_type: DatabaseType::NCBI,
            });
        }

        let body = line[1..].trim();
        let mut parts = body.splitn(2, char::is_whitespace);
        match parts.next().filter(|tok| !tok.is_empty()) {
            Some(accession) => {
                let description = parts.next().unwrap_or("").trim().to_string();
                let taxonomy = taxonomy_bracket_re()
                    .captures(&description)
                    .map(|c| c[1].trim().to_string());
                Ok(Header {
                    raw: line.to_string(),
                    accession: accession.to_string(),
                    description,
                    taxonomy,
                    database_type: DatabaseType::Generic,
                })
            }
            None => Err(HeaderError::NoAccession(line.to_string())),
        }
    }

    /// Render the decoy counterpart of this header: the accession is
    /// substring-replaced inside the raw line and the description gets a
    /// `-REVERSED` suffix. Headers without a description get the suffix as
    /// a standalone description so the decoy accession stays intact.
    pub fn decoy_line(&self, decoy_accession: &str) -> String {
        let mut line = self.raw.replacen(&self.accession, decoy_accession, 1);
        if self.description.is_empty() {
            line.push(' ');
        }
        line.push_str("-REVERSED");
        line
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum HeaderError {
    #[error("not a FASTA header line: {0}")]
    NotAHeader(String),
    #[error("no accession could be extracted from header: {0}")]
    NoAccession(String),
    #[error("header contains a quotation mark: {0}")]
    QuotationMark(String),
}

/// A protein record. Immutable after construction; decoy records derived
/// from a target carry the reversed sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct Protein {
    pub accession: String,
    pub sequence: String,
    pub database_type: DatabaseType,
    pub decoy: bool,
}

impl Protein {
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Monoisotopic molecular weight in Da. Ambiguity codes contribute
    /// their minimal possible residue mass; bytes that are not residues
    /// contribute nothing.
    pub fn molecular_weight(&self) -> f32 {
        self.sequence
            .bytes()
            .filter_map(|aa| mass_bounds(aa).map(|(lo, _)| lo))
            .sum::<f32>()
            + H2O
    }
}
